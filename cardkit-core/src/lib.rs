//! # Cardkit Core
//!
//! Core library for cardkit, a model card toolkit.
//! Provides the model card data model, a versioned schema registry, the
//! validator, the merge and migration engines, template rendering, and the
//! adapters that pull card content out of metadata stores and evaluation
//! results.

pub mod card;
pub mod config;
pub mod error;
pub mod migrate;
pub mod persistence;
pub mod render;
pub mod schema;
pub mod sources;
pub mod toolkit;
pub mod validate;

// Re-export commonly used types at the crate root.
pub use card::merge::{Merge, MergeKey, merge, merge_checked};
pub use card::{
    ArtifactRef, Citation, ConfidenceInterval, Considerations, Dataset, Graphic,
    GraphicsCollection, License, ModelCard, ModelDetails, ModelParameters, ModelVersion, Owner,
    PartialModelCard, PerformanceMetric, QuantitativeAnalysis, Reference,
};
pub use config::{CardkitConfig, RenderConfig, load_config};
pub use error::{CardError, Result};
pub use migrate::{MigrationRule, Migrator};
pub use render::{OutputFormat, Renderer, TemplateSelector};
pub use schema::{CURRENT_SCHEMA_VERSION, LATEST, Schema, SchemaRegistry};
pub use sources::{
    FieldMapping, InMemoryStore, JsonFileStore, MappingMode, MetadataStore, MetricRecord, Scalar,
    StoreRecord,
};
pub use toolkit::Toolkit;
pub use validate::{CardValidation, ValidatedCard, ValidationResult, Violation};
