//! Error types for the cardkit core library.
//!
//! Uses `thiserror` for public API error types. Each pipeline stage has its own
//! enum so callers can match on the exact condition (unknown schema, merge
//! constraint, migration gap, template failure) instead of parsing messages.
//! Validation failures are not errors: they are returned as
//! [`ValidationResult`](crate::validate::ValidationResult) data.

use std::path::PathBuf;

/// Top-level error type for the cardkit core library.
#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CardError {
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }
}

/// Errors from the schema registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema version not found: {version}")]
    NotFound { version: String },

    #[error("Not a semantic version: '{raw}'")]
    BadVersion { raw: String },

    #[error("Schema {version} failed to compile: {message}")]
    Compile { version: String, message: String },

    #[error("Registry has no schemas loaded")]
    Empty,
}

/// Errors from the merge engine.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Sequence at '{pointer}' has {actual} entries, schema allows at most {max}")]
    Constraint {
        pointer: String,
        max: u64,
        actual: usize,
    },
}

/// Errors from the migration engine.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("No migration path from {from} to {to}")]
    Unsupported { from: String, to: String },

    #[error("Rule {from} -> {to} rejected: {reason}")]
    InvalidRule {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Version {version} does not have the in-memory card shape; migrate the document instead")]
    NotCurrent { version: String },
}

/// Errors from the template renderer.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {name}")]
    NotFound { name: String },

    #[error("Template '{template}' failed to render: {message}")]
    Render { template: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration directory not found: {path}")]
    DirNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `CardError`.
pub type Result<T> = std::result::Result<T, CardError>;
