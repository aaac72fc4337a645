//! Field-level merge of partial updates into a model card.
//!
//! Rules by field category:
//! - scalars: the update wins when it carries a non-empty value;
//! - keyed sequences: an update entry replaces the base entry with the same
//!   key in place, otherwise it is appended;
//! - text sets: union with exact-string de-duplication, base entries first;
//! - nested records: the same rules applied member by member.
//!
//! Merging is a pure function of two snapshots. It is not commutative for
//! sequences, so callers that combine several sources apply them in a fixed
//! order (see [`Toolkit::scaffold`](crate::toolkit::Toolkit::scaffold)).

use crate::card::{
    ArtifactRef, Citation, Considerations, Dataset, Extra, Graphic, GraphicsCollection, License,
    ModelCard, ModelDetails, ModelParameters, ModelVersion, Owner, PartialModelCard,
    PerformanceMetric, QuantitativeAnalysis, Reference,
};
use crate::error::{MergeError, Result};
use crate::schema::Schema;

/// Field-by-field merge of a record with an update of the same shape.
pub trait Merge {
    fn merge(&self, update: &Self) -> Self;
}

/// Identity of a sequence entry. Entries without a key are always appended.
pub trait MergeKey {
    type Key: PartialEq;

    fn merge_key(&self) -> Option<Self::Key>;
}

/// Merge `update` into `base`, returning a new card.
pub fn merge(base: &ModelCard, update: &PartialModelCard) -> ModelCard {
    base.merge(&update.0)
}

/// Merge and then enforce the sequence limits declared by `schema`.
pub fn merge_checked(
    base: &ModelCard,
    update: &PartialModelCard,
    schema: &Schema,
) -> Result<ModelCard> {
    let merged = merge(base, update);
    let document = merged.to_document()?;
    if let Some(excess) = schema.find_max_items_excess(&document) {
        tracing::debug!(
            pointer = %excess.pointer,
            max = excess.max,
            actual = excess.actual,
            "merge exceeds schema sequence limit"
        );
        return Err(MergeError::Constraint {
            pointer: excess.pointer,
            max: excess.max,
            actual: excess.actual,
        }
        .into());
    }
    Ok(merged)
}

fn scalar(base: &Option<String>, update: &Option<String>) -> Option<String> {
    match update {
        Some(value) if !value.is_empty() => Some(value.clone()),
        _ => base.clone(),
    }
}

fn nested<T: Merge + Default + Clone>(base: &Option<T>, update: &Option<T>) -> Option<T> {
    match (base, update) {
        (_, None) => base.clone(),
        (None, Some(u)) => Some(T::default().merge(u)),
        (Some(b), Some(u)) => Some(b.merge(u)),
    }
}

fn keyed<T: MergeKey + Clone>(base: &[T], update: &[T]) -> Vec<T> {
    let mut merged = base.to_vec();
    for entry in update {
        let position = entry
            .merge_key()
            .and_then(|key| merged.iter().position(|e| e.merge_key().as_ref() == Some(&key)));
        match position {
            Some(pos) => merged[pos] = entry.clone(),
            None => merged.push(entry.clone()),
        }
    }
    merged
}

fn text_set(base: &[String], update: &[String]) -> Vec<String> {
    let mut merged = base.to_vec();
    for entry in update {
        if !entry.is_empty() && !merged.contains(entry) {
            merged.push(entry.clone());
        }
    }
    merged
}

fn extra(base: &Extra, update: &Extra) -> Extra {
    let mut merged = base.clone();
    for (key, value) in update {
        if !value.is_null() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

impl Merge for ModelCard {
    fn merge(&self, update: &Self) -> Self {
        Self {
            schema_version: scalar(&self.schema_version, &update.schema_version),
            model_details: nested(&self.model_details, &update.model_details),
            model_parameters: nested(&self.model_parameters, &update.model_parameters),
            quantitative_analysis: nested(
                &self.quantitative_analysis,
                &update.quantitative_analysis,
            ),
            considerations: nested(&self.considerations, &update.considerations),
            graphics: nested(&self.graphics, &update.graphics),
            source_artifacts: keyed(&self.source_artifacts, &update.source_artifacts),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for ModelDetails {
    fn merge(&self, update: &Self) -> Self {
        Self {
            name: scalar(&self.name, &update.name),
            overview: scalar(&self.overview, &update.overview),
            owners: keyed(&self.owners, &update.owners),
            version: nested(&self.version, &update.version),
            licenses: keyed(&self.licenses, &update.licenses),
            references: keyed(&self.references, &update.references),
            citations: keyed(&self.citations, &update.citations),
            path: scalar(&self.path, &update.path),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for ModelVersion {
    fn merge(&self, update: &Self) -> Self {
        Self {
            name: scalar(&self.name, &update.name),
            date: scalar(&self.date, &update.date),
            diff: scalar(&self.diff, &update.diff),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for ModelParameters {
    fn merge(&self, update: &Self) -> Self {
        Self {
            model_architecture: scalar(&self.model_architecture, &update.model_architecture),
            input_format: scalar(&self.input_format, &update.input_format),
            output_format: scalar(&self.output_format, &update.output_format),
            data: keyed(&self.data, &update.data),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for QuantitativeAnalysis {
    fn merge(&self, update: &Self) -> Self {
        Self {
            performance_metrics: keyed(&self.performance_metrics, &update.performance_metrics),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for Considerations {
    fn merge(&self, update: &Self) -> Self {
        Self {
            users: text_set(&self.users, &update.users),
            use_cases: text_set(&self.use_cases, &update.use_cases),
            limitations: text_set(&self.limitations, &update.limitations),
            tradeoffs: text_set(&self.tradeoffs, &update.tradeoffs),
            ethical_considerations: text_set(
                &self.ethical_considerations,
                &update.ethical_considerations,
            ),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl Merge for GraphicsCollection {
    fn merge(&self, update: &Self) -> Self {
        Self {
            description: scalar(&self.description, &update.description),
            collection: keyed(&self.collection, &update.collection),
            extra: extra(&self.extra, &update.extra),
        }
    }
}

impl MergeKey for PerformanceMetric {
    type Key = (String, Option<String>);

    fn merge_key(&self) -> Option<Self::Key> {
        Some((self.name.clone(), self.slice.clone()))
    }
}

impl MergeKey for Owner {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        self.name.clone().or_else(|| self.contact.clone())
    }
}

impl MergeKey for License {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        self.identifier
            .clone()
            .or_else(|| self.custom_text.clone())
    }
}

impl MergeKey for Reference {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        Some(self.reference.clone())
    }
}

impl MergeKey for Citation {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        Some(self.citation.clone())
    }
}

impl MergeKey for Dataset {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        self.name.clone().or_else(|| self.path.clone())
    }
}

impl MergeKey for Graphic {
    type Key = String;

    fn merge_key(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

impl MergeKey for ArtifactRef {
    type Key = (String, String);

    fn merge_key(&self) -> Option<Self::Key> {
        Some((self.id.clone(), self.kind.clone()))
    }
}
