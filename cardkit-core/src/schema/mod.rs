//! Versioned JSON Schema registry.
//!
//! Schema sources are registered up front (built-in schemas are embedded in
//! the binary, more can be read from a directory) but only compiled on first
//! use. Compiled schemas are cached behind an `RwLock` and handed out as
//! `Arc<Schema>`, so repeated lookups of one version return the same value.

use semver::Version;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Result, SchemaError};

/// The schema version the in-memory [`ModelCard`](crate::card::ModelCard) is shaped after.
pub const CURRENT_SCHEMA_VERSION: &str = "0.1.0";

/// Selector accepted by [`SchemaRegistry::resolve`] for the newest version.
pub const LATEST: &str = "latest";

const SCHEMA_FILE: &str = "model_card.schema.json";

static BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    (
        "0.0.1",
        include_str!("../../schema/v0.0.1/model_card.schema.json"),
    ),
    (
        "0.0.2",
        include_str!("../../schema/v0.0.2/model_card.schema.json"),
    ),
    (
        "0.1.0",
        include_str!("../../schema/v0.1.0/model_card.schema.json"),
    ),
];

/// Parse a semantic version string.
pub fn parse_version(raw: &str) -> std::result::Result<Version, SchemaError> {
    Version::parse(raw.trim().trim_start_matches('v')).map_err(|_| SchemaError::BadVersion {
        raw: raw.to_string(),
    })
}

#[derive(Debug, Clone)]
enum SchemaSource {
    Embedded(&'static str),
    Inline(String),
    File(PathBuf),
}

impl SchemaSource {
    fn read(&self) -> Result<String> {
        match self {
            SchemaSource::Embedded(text) => Ok((*text).to_string()),
            SchemaSource::Inline(text) => Ok(text.clone()),
            SchemaSource::File(path) => Ok(std::fs::read_to_string(path)?),
        }
    }
}

/// A compiled, immutable schema for one document version.
pub struct Schema {
    version: Version,
    document: Value,
    validator: jsonschema::Validator,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A sequence that holds more entries than its schema allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsExcess {
    pub pointer: String,
    pub max: u64,
    pub actual: usize,
}

impl Schema {
    fn compile(version: Version, text: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(text).map_err(|e| SchemaError::Compile {
            version: version.to_string(),
            message: e.to_string(),
        })?;
        let validator = jsonschema::validator_for(&document).map_err(|e| SchemaError::Compile {
            version: version.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            version,
            document,
            validator,
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The raw JSON Schema document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub(crate) fn validator(&self) -> &jsonschema::Validator {
        &self.validator
    }

    /// Schema-declared `maxItems` for the array at `pointer` (array indices
    /// in the pointer step into `items`).
    pub fn max_items(&self, pointer: &str) -> Option<u64> {
        self.node_at(pointer)?.get("maxItems")?.as_u64()
    }

    /// First array in `document` (depth-first, document order) that holds more
    /// entries than the schema permits.
    pub fn find_max_items_excess(&self, document: &Value) -> Option<ItemsExcess> {
        self.walk_items(&self.document, document, String::new())
    }

    fn walk_items(&self, node: &Value, value: &Value, pointer: String) -> Option<ItemsExcess> {
        let node = self.deref(node)?;
        match value {
            Value::Array(items) => {
                if let Some(max) = node.get("maxItems").and_then(Value::as_u64)
                    && items.len() as u64 > max
                {
                    return Some(ItemsExcess {
                        pointer,
                        max,
                        actual: items.len(),
                    });
                }
                let item_schema = node.get("items")?;
                items.iter().enumerate().find_map(|(i, item)| {
                    self.walk_items(item_schema, item, format!("{}/{}", pointer, i))
                })
            }
            Value::Object(members) => {
                let properties = node.get("properties")?.as_object()?;
                members.iter().find_map(|(key, member)| {
                    let child = properties.get(key)?;
                    self.walk_items(child, member, format!("{}/{}", pointer, escape_token(key)))
                })
            }
            _ => None,
        }
    }

    fn node_at(&self, pointer: &str) -> Option<&Value> {
        let mut node = self.deref(&self.document)?;
        for token in pointer.split('/').skip(1) {
            node = if token.parse::<usize>().is_ok() || token == "-" {
                node.get("items")?
            } else {
                node.get("properties")?.get(unescape_token(token).as_str())?
            };
            node = self.deref(node)?;
        }
        Some(node)
    }

    /// Follow local `$ref`s (`#/definitions/...`).
    fn deref<'a>(&'a self, mut node: &'a Value) -> Option<&'a Value> {
        for _ in 0..32 {
            match node.get("$ref").and_then(Value::as_str) {
                Some(reference) => node = self.document.pointer(reference.strip_prefix('#')?)?,
                None => return Some(node),
            }
        }
        None
    }
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Registry of schema versions, ordered by semantic version.
pub struct SchemaRegistry {
    sources: BTreeMap<Version, SchemaSource>,
    cache: RwLock<BTreeMap<Version, Arc<Schema>>>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("versions", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// A registry holding the schemas shipped with cardkit.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (version, text) in BUILTIN_SCHEMAS {
            if let Ok(version) = parse_version(version) {
                registry
                    .sources
                    .insert(version, SchemaSource::Embedded(*text));
            }
        }
        registry
    }

    /// Process-wide built-in registry, created on first use.
    pub fn shared() -> &'static SchemaRegistry {
        static SHARED: OnceLock<SchemaRegistry> = OnceLock::new();
        SHARED.get_or_init(SchemaRegistry::builtin)
    }

    /// Register a schema from JSON text. Replaces any source for the same
    /// version that has not been compiled yet.
    pub fn register_json(&mut self, version: &str, schema: impl Into<String>) -> Result<()> {
        let version = parse_version(version)?;
        self.insert_source(version, SchemaSource::Inline(schema.into()));
        Ok(())
    }

    /// Register every schema found in `dir`.
    ///
    /// Accepted layouts: `<dir>/<version>/model_card.schema.json` (an
    /// optional `v` prefix on the directory is allowed) and
    /// `<dir>/model_card-<version>.schema.json`. Returns the number of schemas
    /// registered.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(crate::error::ConfigError::DirNotFound {
                path: dir.to_path_buf(),
            }
            .into());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                let file = path.join(SCHEMA_FILE);
                if file.is_file()
                    && let Ok(version) = parse_version(&name)
                {
                    found.push((version, file));
                }
            } else if let Some(raw) = name
                .strip_prefix("model_card-")
                .and_then(|rest| rest.strip_suffix(".schema.json"))
                && let Ok(version) = parse_version(raw)
            {
                found.push((version, path));
            }
        }
        let count = found.len();
        for (version, path) in found {
            tracing::debug!(%version, path = %path.display(), "registering schema file");
            self.insert_source(version, SchemaSource::File(path));
        }
        Ok(count)
    }

    fn insert_source(&mut self, version: Version, source: SchemaSource) {
        self.cache
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&version);
        self.sources.insert(version, source);
    }

    /// Known versions in ascending order.
    pub fn versions(&self) -> Vec<Version> {
        self.sources.keys().cloned().collect()
    }

    pub fn latest_version(&self) -> Option<&Version> {
        self.sources.keys().next_back()
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.sources.contains_key(version)
    }

    /// Resolve `"latest"` or an exact version string.
    pub fn resolve(&self, version_or_latest: &str) -> Result<Arc<Schema>> {
        if version_or_latest == LATEST {
            let latest = self.latest_version().ok_or(SchemaError::Empty)?.clone();
            return self.resolve_version(&latest);
        }
        let version = parse_version(version_or_latest).map_err(|_| SchemaError::NotFound {
            version: version_or_latest.to_string(),
        })?;
        self.resolve_version(&version)
    }

    pub fn resolve_version(&self, version: &Version) -> Result<Arc<Schema>> {
        if let Some(schema) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(version)
        {
            return Ok(Arc::clone(schema));
        }

        let source = self.sources.get(version).ok_or_else(|| SchemaError::NotFound {
            version: version.to_string(),
        })?;
        let text = source.read()?;
        let schema = Arc::new(Schema::compile(version.clone(), &text)?);
        tracing::debug!(%version, "compiled model card schema");

        // Another caller may have compiled the same version meanwhile; keep
        // whichever landed first.
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(version.clone()).or_insert(schema)))
    }
}
