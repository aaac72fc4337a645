//! Adapters that turn external records into partial model cards.
//!
//! Two kinds of input feed a card before users annotate it: records from an
//! ML metadata store (artifacts and executions with typed properties) and
//! evaluation metric records. Both are plain data here; talking to a real
//! store is the job of a [`MetadataStore`] implementation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::card::{ArtifactRef, ConfidenceInterval, PartialModelCard, PerformanceMetric};
use crate::error::{CardError, Result};
use crate::persistence;

/// A typed property value as stored by the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Double(d) => Value::from(*d),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(d: f64) -> Self {
        Scalar::Double(d)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// An artifact or execution record from the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Scalar>,
}

impl StoreRecord {
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            uri: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property. `$uri` and `$id` address the record itself.
    pub fn get(&self, property: &str) -> Option<Value> {
        match property {
            "$uri" => self.uri.clone().map(Value::String),
            "$id" => Some(Value::String(self.id.clone())),
            name => self.properties.get(name).map(Scalar::to_json),
        }
    }
}

/// Read access to the records of one model.
pub trait MetadataStore {
    fn artifacts(&self, model_id: &str) -> Result<Vec<StoreRecord>>;
    fn executions(&self, model_id: &str) -> Result<Vec<StoreRecord>>;

    /// Artifacts followed by executions.
    fn records(&self, model_id: &str) -> Result<Vec<StoreRecord>> {
        let mut records = self.artifacts(model_id)?;
        records.extend(self.executions(model_id)?);
        Ok(records)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecords {
    #[serde(default)]
    pub artifacts: Vec<StoreRecord>,
    #[serde(default)]
    pub executions: Vec<StoreRecord>,
}

/// A store held entirely in memory, keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryStore {
    #[serde(default)]
    pub models: BTreeMap<String, ModelRecords>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_artifact(&mut self, model_id: &str, record: StoreRecord) {
        self.models
            .entry(model_id.to_string())
            .or_default()
            .artifacts
            .push(record);
    }

    pub fn add_execution(&mut self, model_id: &str, record: StoreRecord) {
        self.models
            .entry(model_id.to_string())
            .or_default()
            .executions
            .push(record);
    }

    fn model(&self, model_id: &str) -> Option<&ModelRecords> {
        let model = self.models.get(model_id);
        if model.is_none() {
            tracing::warn!(model_id, "model not present in metadata store");
        }
        model
    }
}

impl MetadataStore for InMemoryStore {
    fn artifacts(&self, model_id: &str) -> Result<Vec<StoreRecord>> {
        Ok(self
            .model(model_id)
            .map(|m| m.artifacts.clone())
            .unwrap_or_default())
    }

    fn executions(&self, model_id: &str) -> Result<Vec<StoreRecord>> {
        Ok(self
            .model(model_id)
            .map(|m| m.executions.clone())
            .unwrap_or_default())
    }
}

/// A store backed by an exported JSON snapshot on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    store: InMemoryStore,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let document = persistence::read_document(path)?;
        let store: InMemoryStore = serde_json::from_value(document).map_err(|e| {
            CardError::invalid_document(format!(
                "{} is not a metadata store snapshot: {}",
                path.display(),
                e
            ))
        })?;
        tracing::debug!(path = %path.display(), models = store.models.len(), "opened metadata snapshot");
        Ok(Self {
            path: path.to_path_buf(),
            store,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataStore for JsonFileStore {
    fn artifacts(&self, model_id: &str) -> Result<Vec<StoreRecord>> {
        self.store.artifacts(model_id)
    }

    fn executions(&self, model_id: &str) -> Result<Vec<StoreRecord>> {
        self.store.executions(model_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    /// Write the value at the target, replacing what is there.
    #[default]
    Set,
    /// Push the value onto the array at the target.
    Append,
}

/// Copies one record property into the card.
///
/// A `-` token in `target` addresses a new array element created for the
/// record; later mappings for the same record and array fill that same
/// element, so `Model.name` and `Model.$uri` can land in one dataset entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub record_type: String,
    pub property: String,
    pub target: String,
    #[serde(default)]
    pub mode: MappingMode,
}

impl FieldMapping {
    pub fn new(record_type: &str, property: &str, target: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            property: property.to_string(),
            target: target.to_string(),
            mode: MappingMode::Set,
        }
    }

    pub fn append(mut self) -> Self {
        self.mode = MappingMode::Append;
        self
    }
}

/// Mappings for the record types a training pipeline usually leaves behind.
pub fn default_mappings() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new("Model", "name", "/model_details/name"),
        FieldMapping::new("Model", "version", "/model_details/version/name"),
        FieldMapping::new("Model", "$uri", "/model_details/path"),
        FieldMapping::new("Model", "architecture", "/model_parameters/model_architecture"),
        FieldMapping::new("Model", "license", "/model_details/licenses/-/identifier"),
        FieldMapping::new("Model", "owner", "/model_details/owners/-/name"),
        FieldMapping::new("Examples", "name", "/model_parameters/data/-/name"),
        FieldMapping::new("Examples", "$uri", "/model_parameters/data/-/link"),
    ]
}

/// Per-record slots created for `-` tokens, keyed by array pointer.
type Slots = HashMap<String, usize>;

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Write `value` at `pointer` inside `root`, creating containers as needed.
/// Returns `false` when the pointer runs into a value of the wrong kind.
fn assign(root: &mut Value, pointer: &str, value: Value, mode: MappingMode, slots: &mut Slots) -> bool {
    let tokens: Vec<&str> = pointer.split('/').skip(1).collect();
    if tokens.is_empty() {
        return false;
    }
    let mut current = root;
    let mut path = String::new();
    for (i, token) in tokens.iter().enumerate() {
        let last = i + 1 == tokens.len();
        let next_is_array = tokens.get(i + 1).is_some_and(|t| *t == "-");

        if *token == "-" {
            let Value::Array(items) = current else {
                return false;
            };
            if last {
                items.push(value);
                return true;
            }
            let index = match slots.get(&path) {
                Some(&index) if index < items.len() => index,
                _ => {
                    items.push(Value::Object(Map::new()));
                    slots.insert(path.clone(), items.len() - 1);
                    items.len() - 1
                }
            };
            path.push_str("/-");
            current = &mut items[index];
            continue;
        }

        let Value::Object(members) = current else {
            return false;
        };
        let key = unescape(token);
        path.push('/');
        path.push_str(token);

        if last {
            match mode {
                MappingMode::Set => {
                    members.insert(key, value);
                }
                MappingMode::Append => match members
                    .entry(key)
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    Value::Array(items) => items.push(value),
                    _ => return false,
                },
            }
            return true;
        }

        current = members.entry(key).or_insert_with(|| {
            if next_is_array {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        });
    }
    false
}

/// Text form of a number or boolean, for string-typed targets.
fn as_text(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

/// Apply one mapping to a copy of `document`. The copy is kept only when the
/// result still reads as a card; a number or boolean that does not fit is
/// retried as text before the mapping is given up.
fn apply_mapping(document: &mut Value, slots: &mut Slots, mapping: &FieldMapping, value: Value) -> bool {
    let text = as_text(&value);
    for candidate in std::iter::once(value).chain(text) {
        let mut trial = document.clone();
        let mut trial_slots = slots.clone();
        if assign(&mut trial, &mapping.target, candidate, mapping.mode, &mut trial_slots)
            && PartialModelCard::from_document(&trial).is_ok()
        {
            *document = trial;
            *slots = trial_slots;
            return true;
        }
    }
    false
}

/// Turn store records into a partial card using `mappings`.
///
/// Every record that contributed at least one field is recorded as a
/// back-reference in `source_artifacts`. A mapping whose target conflicts
/// with the fields already written, or whose value has the wrong type, is
/// skipped with a warning.
pub fn partial_from_records(records: &[StoreRecord], mappings: &[FieldMapping]) -> Result<PartialModelCard> {
    let mut document = Value::Object(Map::new());
    let mut contributors = Vec::new();

    for record in records {
        let mut slots = Slots::new();
        let mut contributed = false;
        for mapping in mappings.iter().filter(|m| m.record_type == record.record_type) {
            let Some(value) = record.get(&mapping.property) else {
                continue;
            };
            if apply_mapping(&mut document, &mut slots, mapping, value) {
                contributed = true;
            } else {
                tracing::warn!(
                    record = %record.id,
                    property = %mapping.property,
                    target = %mapping.target,
                    "skipped field mapping: value does not fit target"
                );
            }
        }
        if contributed {
            contributors.push(ArtifactRef::new(record.id.clone(), record.record_type.clone()));
        }
    }

    let mut partial = PartialModelCard::from_document(&document)?;
    for artifact in contributors {
        partial = partial.with_source_artifact(artifact);
    }
    Ok(partial)
}

/// An evaluation result as produced by an evaluation library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub slice: Option<String>,
    #[serde(default)]
    pub confidence_interval: Option<ConfidenceInterval>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            slice: None,
            confidence_interval: None,
            threshold: None,
        }
    }
}

impl From<&MetricRecord> for PerformanceMetric {
    fn from(record: &MetricRecord) -> Self {
        PerformanceMetric {
            name: record.name.clone(),
            value: record.value,
            slice: record.slice.clone(),
            confidence_interval: record.confidence_interval,
            threshold: record.threshold,
            ..Default::default()
        }
    }
}

/// Turn evaluation results into a partial card. Unnamed metrics are dropped.
pub fn partial_from_metrics(metrics: &[MetricRecord]) -> PartialModelCard {
    if metrics.is_empty() {
        return PartialModelCard::new();
    }
    let converted: Vec<PerformanceMetric> = metrics
        .iter()
        .filter(|m| {
            let named = !m.name.trim().is_empty();
            if !named {
                tracing::warn!(value = m.value, "dropping metric without a name");
            }
            named
        })
        .map(PerformanceMetric::from)
        .collect();
    PartialModelCard::new().with_metrics(converted)
}

/// Read a JSON array of metric records.
pub fn load_metrics(path: &Path) -> Result<Vec<MetricRecord>> {
    let document = persistence::read_document(path)?;
    serde_json::from_value(document).map_err(|e| {
        CardError::invalid_document(format!(
            "{} is not a list of metric records: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn model_record() -> StoreRecord {
        StoreRecord::new("12", "Model")
            .with_uri("gs://models/census/12")
            .with_property("name", "census-income")
            .with_property("version", "v3")
            .with_property("license", "Apache-2.0")
            .with_property("owner", "ML Team")
    }

    fn examples_record(id: &str, name: &str) -> StoreRecord {
        StoreRecord::new(id, "Examples")
            .with_uri(format!("gs://data/{}", name))
            .with_property("name", name)
    }

    #[test]
    fn test_default_mappings_fill_details() {
        let partial = partial_from_records(&[model_record()], &default_mappings()).unwrap();
        let card = partial.as_card();
        let details = card.model_details().unwrap();
        assert_eq!(details.name.as_deref(), Some("census-income"));
        assert_eq!(details.path.as_deref(), Some("gs://models/census/12"));
        assert_eq!(details.version.as_ref().unwrap().name.as_deref(), Some("v3"));
        assert_eq!(details.licenses[0].identifier.as_deref(), Some("Apache-2.0"));
        assert_eq!(details.owners[0].name.as_deref(), Some("ML Team"));
        assert_eq!(card.source_artifacts(), &[ArtifactRef::new("12", "Model")]);
    }

    #[test]
    fn test_dash_slot_is_shared_per_record() {
        let records = [examples_record("3", "train"), examples_record("4", "eval")];
        let partial = partial_from_records(&records, &default_mappings()).unwrap();
        let data = &partial.as_card().model_parameters().unwrap().data;
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].name.as_deref(), Some("train"));
        assert_eq!(data[0].link.as_deref(), Some("gs://data/train"));
        assert_eq!(data[1].name.as_deref(), Some("eval"));
        assert_eq!(partial.as_card().source_artifacts().len(), 2);
    }

    #[test]
    fn test_unmapped_records_leave_no_back_reference() {
        let records = [StoreRecord::new("9", "Schema").with_property("name", "s")];
        let partial = partial_from_records(&records, &default_mappings()).unwrap();
        assert!(partial.is_empty());
    }

    #[test]
    fn test_append_mode() {
        let mappings = [FieldMapping::new("Trainer", "caveat", "/considerations/limitations").append()];
        let records = [
            StoreRecord::new("1", "Trainer").with_property("caveat", "small sample"),
            StoreRecord::new("2", "Trainer").with_property("caveat", "no holdout"),
        ];
        let partial = partial_from_records(&records, &mappings).unwrap();
        assert_eq!(
            partial.as_card().considerations().unwrap().limitations,
            vec!["small sample", "no holdout"]
        );
    }

    #[test]
    fn test_conflicting_target_is_skipped() {
        let mappings = [
            FieldMapping::new("Model", "name", "/model_details/name"),
            FieldMapping::new("Model", "version", "/model_details/name/inner"),
        ];
        let partial = partial_from_records(&[model_record()], &mappings).unwrap();
        assert_eq!(
            partial.as_card().model_details().unwrap().name.as_deref(),
            Some("census-income")
        );
    }

    #[test]
    fn test_numeric_property_is_written_as_text() {
        let record = StoreRecord::new("12", "Model")
            .with_property("name", "census-income")
            .with_property("version", 3i64)
            .with_property("owner", true);
        let partial = partial_from_records(&[record], &default_mappings()).unwrap();
        let details = partial.as_card().model_details().unwrap();
        assert_eq!(details.name.as_deref(), Some("census-income"));
        assert_eq!(details.version.as_ref().unwrap().name.as_deref(), Some("3"));
        assert_eq!(details.owners[0].name.as_deref(), Some("true"));
    }

    #[test]
    fn test_mistyped_value_is_skipped() {
        let mappings = [
            FieldMapping::new("Model", "name", "/model_details/name"),
            FieldMapping::new("Model", "version", "/quantitative_analysis/performance_metrics"),
        ];
        let partial = partial_from_records(&[model_record()], &mappings).unwrap();
        let card = partial.as_card();
        assert_eq!(
            card.model_details().unwrap().name.as_deref(),
            Some("census-income")
        );
        assert!(card.metrics().is_empty());
        assert_eq!(card.source_artifacts().len(), 1);
    }

    #[test]
    fn test_partial_from_metrics_drops_unnamed() {
        let mut with_interval = MetricRecord::new("accuracy", 0.9);
        with_interval.confidence_interval = Some(ConfidenceInterval {
            lower_bound: 0.88,
            upper_bound: 0.92,
        });
        let partial = partial_from_metrics(&[with_interval, MetricRecord::new(" ", 0.1)]);
        let metrics = partial.as_card().metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].confidence_interval.unwrap().upper_bound, 0.92);
        assert!(partial_from_metrics(&[]).is_empty());
    }

    #[test]
    fn test_json_file_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mlmd.json");
        std::fs::write(
            &path,
            json!({
                "models": {
                    "census": {
                        "artifacts": [{"id": "12", "type": "Model", "uri": "gs://m", "properties": {"name": "census", "epochs": 10, "calibrated": true}}],
                        "executions": [{"id": "40", "type": "Trainer"}]
                    }
                }
            })
            .to_string(),
        )
        .unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        let artifacts = store.artifacts("census").unwrap();
        assert_eq!(artifacts[0].properties["epochs"], Scalar::Int(10));
        assert_eq!(artifacts[0].properties["calibrated"], Scalar::Bool(true));
        assert_eq!(store.records("census").unwrap().len(), 2);
        assert!(store.artifacts("other").unwrap().is_empty());
    }

    #[test]
    fn test_load_metrics() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eval.json");
        std::fs::write(
            &path,
            r#"[{"name": "auc", "value": 0.87, "slice": "age:<30"}]"#,
        )
        .unwrap();
        let metrics = load_metrics(&path).unwrap();
        assert_eq!(metrics[0].slice.as_deref(), Some("age:<30"));

        std::fs::write(&path, r#"{"name": "auc"}"#).unwrap();
        assert!(matches!(
            load_metrics(&path).unwrap_err(),
            CardError::InvalidDocument { .. }
        ));
    }
}
