//! Model card data model.
//!
//! A [`ModelCard`] is a tree of explicit records. Every record carries an
//! `extra` side-map that captures members the current model does not know
//! about, so documents written by newer tools survive a load/save cycle.
//!
//! The card has two JSON forms:
//! - the **dense** form: every known member is present, absent values are
//!   `null`. This is what serde produces.
//! - the **document** form (pruned): `null` members are removed. This is what
//!   gets validated, rendered and written to disk.
//!
//! Cards are never edited field by field. The root fields are private and the
//! only way to change a card is [`merge`](crate::card::merge::merge), which
//! returns a new snapshot.

pub mod merge;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CardError, Result};

/// Members not modelled by a record, keyed by their JSON name.
pub type Extra = BTreeMap<String, Value>;

/// Names of the top-level sections, in document order.
pub const SECTIONS: [&str; 5] = [
    "model_details",
    "model_parameters",
    "quantitative_analysis",
    "considerations",
    "graphics",
];

/// Root entity of a model card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCard {
    #[serde(default)]
    pub(crate) schema_version: Option<String>,
    #[serde(default)]
    pub(crate) model_details: Option<ModelDetails>,
    #[serde(default)]
    pub(crate) model_parameters: Option<ModelParameters>,
    #[serde(default)]
    pub(crate) quantitative_analysis: Option<QuantitativeAnalysis>,
    #[serde(default)]
    pub(crate) considerations: Option<Considerations>,
    #[serde(default)]
    pub(crate) graphics: Option<GraphicsCollection>,
    /// Provenance back-references into the metadata store.
    #[serde(default)]
    pub(crate) source_artifacts: Vec<ArtifactRef>,
    #[serde(flatten)]
    pub(crate) extra: Extra,
}

/// Identification and licensing of the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub version: Option<ModelVersion>,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    /// What changed relative to the previous version.
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A license, either an SPDX identifier or free text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct License {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub custom_text: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub reference: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub style: Option<String>,
    pub citation: String,
    #[serde(flatten)]
    pub extra: Extra,
}

/// How the model was built and what it consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub model_architecture: Option<String>,
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    /// Training and evaluation datasets.
    #[serde(default)]
    pub data: Vec<Dataset>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    /// Whether the dataset contains sensitive data.
    #[serde(default)]
    pub sensitive: Option<bool>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantitativeAnalysis {
    #[serde(default)]
    pub performance_metrics: Vec<PerformanceMetric>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One evaluation result. Identity within a card is `(name, slice)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub slice: Option<String>,
    #[serde(default)]
    pub confidence_interval: Option<ConfidenceInterval>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl PerformanceMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            ..Default::default()
        }
    }

    pub fn with_slice(mut self, slice: impl Into<String>) -> Self {
        self.slice = Some(slice.into());
        self
    }

    pub fn with_interval(mut self, lower_bound: f64, upper_bound: f64) -> Self {
        self.confidence_interval = Some(ConfidenceInterval {
            lower_bound,
            upper_bound,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Free-text statements about how the model should and should not be used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Considerations {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub tradeoffs: Vec<String>,
    #[serde(default)]
    pub ethical_considerations: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphicsCollection {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub collection: Vec<Graphic>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A named plot, either inlined as base64 or referenced by URI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graphic {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Graphic {
    /// Inline raw image bytes as standard base64.
    pub fn from_image_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            name: name.into(),
            image: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            ..Default::default()
        }
    }

    pub fn from_uri(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    /// Decode the inlined image, if any.
    pub fn image_bytes(&self) -> Option<Result<Vec<u8>>> {
        use base64::Engine;
        self.image.as_deref().map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    CardError::invalid_document(format!(
                        "graphic '{}' is not valid base64: {}",
                        self.name, e
                    ))
                })
        })
    }
}

/// Non-owning reference to a metadata-store record.
///
/// Only the id and kind are kept; the record is looked up again when needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub kind: String,
}

impl ArtifactRef {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

impl ModelCard {
    /// An empty card declaring `schema_version`.
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: Some(schema_version.into()),
            ..Default::default()
        }
    }

    /// Build a card from a JSON document.
    ///
    /// Unknown members land in the `extra` maps. Shape errors (a metric
    /// without a name, a string where an object belongs) are reported as
    /// [`CardError::InvalidDocument`]; run the validator first for
    /// per-field diagnostics.
    pub fn from_document(document: &Value) -> Result<Self> {
        if !document.is_object() {
            return Err(CardError::invalid_document(
                "model card document must be a JSON object",
            ));
        }
        Self::deserialize(document)
            .map_err(|e| CardError::invalid_document(format!("cannot read model card: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_document(&value)
    }

    /// Dense JSON form: absent members are `null`.
    pub fn to_dense(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Pruned JSON form used for validation, rendering and storage.
    pub fn to_document(&self) -> Result<Value> {
        let mut value = self.to_dense()?;
        prune_nulls(&mut value);
        Ok(value)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document()?)?)
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    pub fn model_details(&self) -> Option<&ModelDetails> {
        self.model_details.as_ref()
    }

    pub fn model_parameters(&self) -> Option<&ModelParameters> {
        self.model_parameters.as_ref()
    }

    pub fn quantitative_analysis(&self) -> Option<&QuantitativeAnalysis> {
        self.quantitative_analysis.as_ref()
    }

    pub fn considerations(&self) -> Option<&Considerations> {
        self.considerations.as_ref()
    }

    pub fn graphics(&self) -> Option<&GraphicsCollection> {
        self.graphics.as_ref()
    }

    pub fn source_artifacts(&self) -> &[ArtifactRef] {
        &self.source_artifacts
    }

    pub fn extra(&self) -> &Extra {
        &self.extra
    }

    /// Performance metrics in document order (empty when the section is absent).
    pub fn metrics(&self) -> &[PerformanceMetric] {
        self.quantitative_analysis
            .as_ref()
            .map(|qa| qa.performance_metrics.as_slice())
            .unwrap_or(&[])
    }

    /// Top-level sections that are null.
    pub fn missing_sections(&self) -> Vec<&'static str> {
        let present = [
            self.model_details.is_some(),
            self.model_parameters.is_some(),
            self.quantitative_analysis.is_some(),
            self.considerations.is_some(),
            self.graphics.is_some(),
        ];
        SECTIONS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect()
    }

    /// A card is complete when at most one top-level section is null.
    pub fn is_complete(&self) -> bool {
        self.missing_sections().len() <= 1
    }
}

/// A document fragment holding only the fields a caller wants to merge.
///
/// It has the same shape as a card but is only accepted by the merger, never
/// by the validator or renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialModelCard(pub(crate) ModelCard);

impl PartialModelCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: &Value) -> Result<Self> {
        ModelCard::from_document(document).map(Self)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        ModelCard::from_json(json).map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == ModelCard::default()
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.0.schema_version = Some(version.into());
        self
    }

    pub fn with_model_details(mut self, details: ModelDetails) -> Self {
        self.0.model_details = Some(details);
        self
    }

    pub fn with_model_parameters(mut self, parameters: ModelParameters) -> Self {
        self.0.model_parameters = Some(parameters);
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<PerformanceMetric>) -> Self {
        self.0.quantitative_analysis = Some(QuantitativeAnalysis {
            performance_metrics: metrics,
            extra: Extra::new(),
        });
        self
    }

    pub fn with_considerations(mut self, considerations: Considerations) -> Self {
        self.0.considerations = Some(considerations);
        self
    }

    pub fn with_graphics(mut self, graphics: GraphicsCollection) -> Self {
        self.0.graphics = Some(graphics);
        self
    }

    pub fn with_source_artifact(mut self, artifact: ArtifactRef) -> Self {
        if !self.0.source_artifacts.contains(&artifact) {
            self.0.source_artifacts.push(artifact);
        }
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.extra.insert(key.into(), value);
        self
    }

    pub fn as_card(&self) -> &ModelCard {
        &self.0
    }
}

impl From<ModelCard> for PartialModelCard {
    fn from(card: ModelCard) -> Self {
        Self(card)
    }
}

/// Remove `null` object members recursively. Array elements are kept.
pub(crate) fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                prune_nulls(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                prune_nulls(v);
            }
        }
        _ => {}
    }
}
