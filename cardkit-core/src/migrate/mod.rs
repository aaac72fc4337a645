//! Schema version migration.
//!
//! Rules form a directed graph whose nodes are schema versions. An edge
//! always points from an older version to a strictly newer one, so the graph
//! is acyclic and a document can never be downgraded. Migrating follows the
//! shortest chain of rules; ties are broken by preferring the smaller
//! intermediate version, which keeps the chosen path stable.

pub mod rules;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use semver::Version;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::card::ModelCard;
use crate::error::{MigrationError, Result};
use crate::schema::{CURRENT_SCHEMA_VERSION, parse_version};

/// A document transformation from one schema version to the next.
pub type RuleFn = dyn Fn(&mut Value) + Send + Sync;

/// An edge in the migration graph.
#[derive(Clone)]
pub struct MigrationRule {
    pub from: Version,
    pub to: Version,
    apply: Arc<RuleFn>,
}

impl MigrationRule {
    pub fn new(from: Version, to: Version, apply: impl Fn(&mut Value) + Send + Sync + 'static) -> Self {
        Self {
            from,
            to,
            apply: Arc::new(apply),
        }
    }

    /// Apply the rule and stamp the target version.
    fn run(&self, document: &mut Value) {
        (self.apply)(document);
        if let Some(root) = document.as_object_mut() {
            root.insert(
                "schema_version".into(),
                Value::String(self.to.to_string()),
            );
        }
    }
}

impl fmt::Debug for MigrationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MigrationRule({} -> {})", self.from, self.to)
    }
}

/// The migration graph.
#[derive(Debug, Default)]
pub struct Migrator {
    graph: DiGraph<Version, MigrationRule>,
    version_index: HashMap<Version, NodeIndex>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A migrator loaded with the rules between the shipped schemas.
    pub fn builtin() -> Self {
        let mut migrator = Self::new();
        let steps: [(&str, &str, fn(&mut Value)); 2] = [
            ("0.0.1", "0.0.2", rules::v0_0_1_to_v0_0_2),
            ("0.0.2", "0.1.0", rules::v0_0_2_to_v0_1_0),
        ];
        for (from, to, apply) in steps {
            if let (Ok(from), Ok(to)) = (parse_version(from), parse_version(to)) {
                let _ = migrator.register(MigrationRule::new(from, to, apply));
            }
        }
        migrator
    }

    fn node(&mut self, version: &Version) -> NodeIndex {
        if let Some(&idx) = self.version_index.get(version) {
            return idx;
        }
        let idx = self.graph.add_node(version.clone());
        self.version_index.insert(version.clone(), idx);
        idx
    }

    /// Add a rule. A second rule for the same version pair replaces the first.
    pub fn register(&mut self, rule: MigrationRule) -> Result<()> {
        if rule.to <= rule.from {
            return Err(MigrationError::InvalidRule {
                from: rule.from.to_string(),
                to: rule.to.to_string(),
                reason: "rules must move to a strictly newer version".into(),
            }
            .into());
        }
        let from = self.node(&rule.from);
        let to = self.node(&rule.to);
        tracing::debug!(from = %rule.from, to = %rule.to, "registered migration rule");
        self.graph.update_edge(from, to, rule);
        Ok(())
    }

    /// Registered rules as `(from, to)` pairs, sorted.
    pub fn rules(&self) -> Vec<(Version, Version)> {
        let mut pairs: Vec<(Version, Version)> = self
            .graph
            .edge_weights()
            .map(|rule| (rule.from.clone(), rule.to.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Shortest chain of rules from `from` to `to`.
    pub fn path(&self, from: &Version, to: &Version) -> Result<Vec<&MigrationRule>> {
        let unsupported = || MigrationError::Unsupported {
            from: from.to_string(),
            to: to.to_string(),
        };
        if from == to {
            return Ok(Vec::new());
        }
        let (Some(&start), Some(&goal)) = (self.version_index.get(from), self.version_index.get(to))
        else {
            return Err(unsupported().into());
        };

        let mut came_from: HashMap<NodeIndex, (NodeIndex, &MigrationRule)> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            if node == goal {
                break;
            }
            let mut edges: Vec<_> = self.graph.edges(node).collect();
            edges.sort_by(|a, b| a.weight().to.cmp(&b.weight().to));
            for edge in edges {
                let next = edge.target();
                if next != start && !came_from.contains_key(&next) {
                    came_from.insert(next, (node, edge.weight()));
                    queue.push_back(next);
                }
            }
        }

        let mut chain = Vec::new();
        let mut cursor = goal;
        while cursor != start {
            let (previous, rule) = came_from.get(&cursor).ok_or_else(unsupported)?;
            chain.push(*rule);
            cursor = *previous;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Migrate a JSON document between any two connected versions.
    pub fn migrate_document(&self, document: &Value, from: &Version, to: &Version) -> Result<Value> {
        let chain = self.path(from, to)?;
        let mut migrated = document.clone();
        for rule in chain {
            tracing::debug!(from = %rule.from, to = %rule.to, "applying migration rule");
            rule.run(&mut migrated);
        }
        Ok(migrated)
    }

    /// Migrate a document to the current card shape and read it as a card.
    ///
    /// `to` must be [`CURRENT_SCHEMA_VERSION`]; older targets only exist as
    /// documents, see [`migrate_document`](Self::migrate_document).
    pub fn migrate(&self, document: &Value, from: &Version, to: &Version) -> Result<ModelCard> {
        if to.to_string() != CURRENT_SCHEMA_VERSION {
            return Err(MigrationError::NotCurrent {
                version: to.to_string(),
            }
            .into());
        }
        let migrated = self.migrate_document(document, from, to)?;
        ModelCard::from_document(&migrated)
    }
}
