//! Structural validation of model card documents.
//!
//! Validation never mutates its input and never raises for a bad document:
//! problems come back as an ordered list of [`Violation`]s. Only configuration
//! problems (an unknown schema version) are errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::card::ModelCard;
use crate::error::Result;
use crate::schema::{Schema, SchemaRegistry};

/// One problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Violation {
    /// JSON pointer to the offending member (`""` is the document root).
    pub pointer: String,
    pub message: String,
}

impl Violation {
    pub fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pointer = if self.pointer.is_empty() {
            "/"
        } else {
            &self.pointer
        };
        write!(f, "{}: {}", pointer, self.message)
    }
}

/// Outcome of validating a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    Invalid { violations: Vec<Violation> },
}

impl ValidationResult {
    fn from_violations(mut violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            return Self::Valid;
        }
        violations.sort();
        violations.dedup();
        Self::Invalid { violations }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid => &[],
            Self::Invalid { violations } => violations,
        }
    }

    /// Combine two results; violations from both are kept.
    pub fn and(self, other: ValidationResult) -> ValidationResult {
        let mut violations = self.violations().to_vec();
        violations.extend_from_slice(other.violations());
        Self::from_violations(violations)
    }
}

/// Check `document` against `schema`.
pub fn validate(document: &Value, schema: &Schema) -> ValidationResult {
    let mut violations: Vec<Violation> = schema
        .validator()
        .iter_errors(document)
        .map(|error| {
            let mut pointer = error.instance_path.to_string();
            if let jsonschema::error::ValidationErrorKind::Required { property } = &error.kind
                && let Some(name) = property.as_str()
            {
                pointer = format!("{}/{}", pointer, name.replace('~', "~0").replace('/', "~1"));
            }
            Violation::new(pointer, error.to_string())
        })
        .collect();

    let expected = schema.version().to_string();
    if let Some(declared) = declared_version(document)
        && declared != expected
    {
        violations.push(Violation::new(
            "/schema_version",
            format!(
                "document declares schema version {} but is checked against {}",
                declared, expected
            ),
        ));
    }

    ValidationResult::from_violations(violations)
}

/// The `schema_version` a document declares, if it declares one.
pub fn declared_version(document: &Value) -> Option<&str> {
    document.get("schema_version").and_then(Value::as_str)
}

/// Validate against the schema the document itself declares.
///
/// Fails with [`SchemaError::NotFound`](crate::error::SchemaError::NotFound)
/// when the declared version is unknown to `registry`.
pub fn validate_document(document: &Value, registry: &SchemaRegistry) -> Result<ValidationResult> {
    let Some(version) = declared_version(document) else {
        return Ok(ValidationResult::from_violations(vec![missing_version()]));
    };
    let schema = registry.resolve(version)?;
    Ok(validate(document, &schema))
}

pub(crate) fn missing_version() -> Violation {
    Violation::new(
        "/schema_version",
        "document does not declare a schema_version",
    )
}

/// Check the rule that at most one top-level section of a renderable card
/// may be null.
pub fn check_complete(card: &ModelCard) -> ValidationResult {
    let missing = card.missing_sections();
    if missing.len() <= 1 {
        return ValidationResult::Valid;
    }
    ValidationResult::from_violations(vec![Violation::new(
        "",
        format!(
            "card is incomplete: sections {} are all null",
            missing.join(", ")
        ),
    )])
}

/// A card that passed schema validation and the completeness check.
///
/// The only way to obtain one is through
/// [`Toolkit::validate`](crate::toolkit::Toolkit::validate) or
/// [`Toolkit::prepare`](crate::toolkit::Toolkit::prepare); the renderer
/// accepts nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCard {
    card: ModelCard,
}

impl ValidatedCard {
    pub(crate) fn new(card: ModelCard) -> Self {
        Self { card }
    }

    pub fn card(&self) -> &ModelCard {
        &self.card
    }

    pub fn into_card(self) -> ModelCard {
        self.card
    }
}

/// Outcome of validating a card for rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum CardValidation {
    Valid(ValidatedCard),
    Invalid(Vec<Violation>),
}

impl CardValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid(_) => &[],
            Self::Invalid(violations) => violations,
        }
    }

    pub fn into_validated(self) -> Option<ValidatedCard> {
        match self {
            Self::Valid(card) => Some(card),
            Self::Invalid(_) => None,
        }
    }
}
