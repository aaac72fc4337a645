//! Pipeline facade: sources → merge → validate → migrate → render.
//!
//! The facade owns one schema registry, migrator and renderer built from a
//! [`CardkitConfig`]. Each stage hands the next a distinct type, so a card
//! cannot reach the renderer without passing validation:
//!
//! ```text
//! ModelCard ──validate/prepare──▶ CardValidation::Valid(ValidatedCard) ──render──▶ bytes
//!                              └▶ CardValidation::Invalid(violations)
//! ```

use semver::Version;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::card::merge::merge_checked;
use crate::card::{ModelCard, PartialModelCard};
use crate::config::CardkitConfig;
use crate::error::{ConfigError, Result};
use crate::migrate::Migrator;
use crate::render::{OutputFormat, Renderer, TemplateSelector};
use crate::schema::{SchemaRegistry, parse_version};
use crate::sources::{MetadataStore, MetricRecord, partial_from_metrics, partial_from_records};
use crate::validate::{
    CardValidation, ValidatedCard, ValidationResult, check_complete, declared_version,
    missing_version, validate, validate_document,
};

#[derive(Debug)]
pub struct Toolkit {
    config: CardkitConfig,
    registry: SchemaRegistry,
    migrator: Migrator,
    renderer: Renderer,
    target: Version,
}

impl Toolkit {
    /// Build the pipeline, registering schemas and templates from the
    /// configured directories.
    pub fn new(config: CardkitConfig) -> Result<Self> {
        let mut registry = SchemaRegistry::builtin();
        if let Some(dir) = &config.schema_dir {
            let count = registry.load_dir(dir)?;
            tracing::info!(dir = %dir.display(), count, "loaded schemas");
        }

        let mut renderer = Renderer::new()?;
        if let Some(dir) = &config.template_dir {
            let count = renderer.load_dir(dir)?;
            tracing::info!(dir = %dir.display(), count, "loaded templates");
        }

        let target = parse_version(&config.target_version).map_err(|_| ConfigError::Invalid {
            message: format!("target_version '{}' is not a semantic version", config.target_version),
        })?;
        if !registry.contains(&target) {
            return Err(ConfigError::Invalid {
                message: format!("target_version {} has no registered schema", target),
            }
            .into());
        }

        Ok(Self {
            config,
            registry,
            migrator: Migrator::builtin(),
            renderer,
            target,
        })
    }

    /// A pipeline with built-in schemas, rules and templates only.
    pub fn builtin() -> Result<Self> {
        Self::new(CardkitConfig::default())
    }

    pub fn config(&self) -> &CardkitConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn target_version(&self) -> &Version {
        &self.target
    }

    /// Assemble a card for `model_id` from its sources.
    ///
    /// Sources are merged in a fixed order: metadata-store records, then
    /// evaluation results, then user annotations, so annotations always have
    /// the last word.
    pub fn scaffold(
        &self,
        model_id: &str,
        store: &dyn MetadataStore,
        metrics: &[MetricRecord],
        annotations: Option<&PartialModelCard>,
    ) -> Result<ModelCard> {
        let schema = self.registry.resolve_version(&self.target)?;
        let records = store.records(model_id)?;
        tracing::info!(model_id, records = records.len(), metrics = metrics.len(), "scaffolding model card");

        let mut card = ModelCard::new(self.target.to_string());
        let from_store = partial_from_records(&records, &self.config.field_mappings)?;
        card = merge_checked(&card, &from_store, &schema)?;
        card = merge_checked(&card, &partial_from_metrics(metrics), &schema)?;
        if let Some(annotations) = annotations {
            card = merge_checked(&card, annotations, &schema)?;
        }
        Ok(card)
    }

    /// Merge an update into a card, enforcing the sequence limits of the
    /// card's schema.
    pub fn merge(&self, base: &ModelCard, update: &PartialModelCard) -> Result<ModelCard> {
        let schema = match base.schema_version() {
            Some(version) => self.registry.resolve(version)?,
            None => self.registry.resolve_version(&self.target)?,
        };
        merge_checked(base, update, &schema)
    }

    /// Validate a card for rendering: schema check plus completeness.
    pub fn validate(&self, card: &ModelCard) -> Result<CardValidation> {
        let document = card.to_document()?;
        let result = validate_document(&document, &self.registry)?.and(check_complete(card));
        Ok(match result {
            ValidationResult::Valid => CardValidation::Valid(ValidatedCard::new(card.clone())),
            ValidationResult::Invalid { violations } => CardValidation::Invalid(violations),
        })
    }

    /// Take a stored document to a renderable card.
    ///
    /// The document is validated against the version it declares, migrated
    /// to the target version when older, validated again, and checked for
    /// completeness. Documents newer than the target are used as they are.
    pub fn prepare(&self, document: &Value) -> Result<CardValidation> {
        let Some(declared) = declared_version(document) else {
            return Ok(CardValidation::Invalid(vec![missing_version()]));
        };
        let schema = self.registry.resolve(declared)?;
        if let ValidationResult::Invalid { violations } = validate(document, &schema) {
            return Ok(CardValidation::Invalid(violations));
        }

        let version = schema.version().clone();
        let migrated = if version < self.target {
            tracing::info!(from = %version, to = %self.target, "migrating model card");
            let migrated = self.migrator.migrate_document(document, &version, &self.target)?;
            let target_schema = self.registry.resolve_version(&self.target)?;
            if let ValidationResult::Invalid { violations } = validate(&migrated, &target_schema) {
                return Ok(CardValidation::Invalid(violations));
            }
            migrated
        } else {
            document.clone()
        };

        let card = ModelCard::from_document(&migrated)?;
        Ok(match check_complete(&card) {
            ValidationResult::Valid => CardValidation::Valid(ValidatedCard::new(card)),
            ValidationResult::Invalid { violations } => CardValidation::Invalid(violations),
        })
    }

    pub fn render(&self, card: &ValidatedCard, selector: &TemplateSelector) -> Result<Vec<u8>> {
        self.renderer.render(card, selector)
    }

    /// Render and write a card. Without an explicit path the file goes to
    /// the configured output directory. Returns the path written.
    pub fn export(
        &self,
        card: &ValidatedCard,
        selector: &TemplateSelector,
        path: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.config.output_path(
                selector
                    .format()
                    .unwrap_or(self.config.render.default_format),
            ),
        };
        self.renderer.export(card, selector, &path)?;
        Ok(path)
    }
}
