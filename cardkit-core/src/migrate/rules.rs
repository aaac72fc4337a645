//! Built-in migration rules between the shipped schema versions.
//!
//! Rules are total: members they do not recognise are left alone, so a
//! document carrying extensions keeps them through every step.

use serde_json::{Map, Value, json};

/// `0.0.1` → `0.0.2`: single-valued license, reference and citation fields
/// become lists of records, and the `{train, eval}` data object becomes a
/// dataset list. Data members that are not objects cannot be datasets; they
/// move to a `data_extra` object on `model_parameters`.
pub fn v0_0_1_to_v0_0_2(document: &mut Value) {
    if let Some(details) = object_at(document, "model_details") {
        if let Some(license) = details.remove("license") {
            let entry = match license {
                Value::String(identifier) => json!({ "identifier": identifier }),
                other => other,
            };
            push_to(details, "licenses", entry);
        }

        if let Some(Value::Array(references)) = details.get_mut("references") {
            for reference in references.iter_mut() {
                if let Value::String(text) = reference {
                    *reference = json!({ "reference": std::mem::take(text) });
                }
            }
        }

        if let Some(citation) = details.remove("citation") {
            let entry = match citation {
                Value::String(text) => json!({ "citation": text }),
                other => other,
            };
            push_to(details, "citations", entry);
        }
    }

    if let Some(parameters) = object_at(document, "model_parameters")
        && matches!(parameters.get("data"), Some(Value::Object(_)))
        && let Some(Value::Object(mut data)) = parameters.remove("data")
    {
        let mut datasets = Vec::with_capacity(data.len());
        let mut leftovers = Map::new();
        // train and eval first, then anything else in key order
        let mut keys: Vec<String> = ["train", "eval"]
            .iter()
            .filter(|k| data.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        let mut rest: Vec<String> = data
            .keys()
            .filter(|k| k.as_str() != "train" && k.as_str() != "eval")
            .cloned()
            .collect();
        rest.sort();
        keys.extend(rest);

        for key in keys {
            match data.remove(&key) {
                Some(Value::Object(mut fields)) => {
                    fields
                        .entry("name")
                        .or_insert_with(|| Value::String(key.clone()));
                    datasets.push(Value::Object(fields));
                }
                Some(other) => {
                    leftovers.insert(key, other);
                }
                None => {}
            }
        }
        parameters.insert("data".into(), Value::Array(datasets));
        if !leftovers.is_empty() {
            match parameters
                .entry("data_extra")
                .or_insert_with(|| Value::Object(Map::new()))
            {
                Value::Object(existing) => {
                    for (key, value) in leftovers {
                        existing.entry(key).or_insert(value);
                    }
                }
                _ => tracing::warn!("dropping non-object data members: data_extra is taken"),
            }
        }
    }
}

/// `0.0.2` → `0.1.0`: metrics are keyed by `name` instead of `type`,
/// graphics move to the top level, and provenance back-references appear.
pub fn v0_0_2_to_v0_1_0(document: &mut Value) {
    let mut moved_graphics = None;
    if let Some(analysis) = object_at(document, "quantitative_analysis") {
        if let Some(Value::Array(metrics)) = analysis.get_mut("performance_metrics") {
            for metric in metrics.iter_mut().filter_map(Value::as_object_mut) {
                if !metric.contains_key("name")
                    && let Some(kind) = metric.remove("type")
                {
                    metric.insert("name".into(), kind);
                }
            }
        }
        moved_graphics = analysis.remove("graphics");
    }

    if let (Some(Value::Object(moved)), Some(root)) = (moved_graphics, document.as_object_mut()) {
        match root.get_mut("graphics") {
            Some(Value::Object(existing)) => {
                for (key, value) in moved {
                    if key == "collection" {
                        if let Value::Array(items) = value {
                            for item in items {
                                push_to(existing, "collection", item);
                            }
                        }
                    } else {
                        existing.entry(key).or_insert(value);
                    }
                }
            }
            _ => {
                root.insert("graphics".into(), Value::Object(moved));
            }
        }
    }

    if let Some(root) = document.as_object_mut() {
        root.entry("source_artifacts")
            .or_insert_with(|| Value::Array(Vec::new()));
    }
}

fn object_at<'a>(document: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
    document.get_mut(key)?.as_object_mut()
}

fn push_to(object: &mut Map<String, Value>, key: &str, entry: Value) {
    match object.get_mut(key) {
        Some(Value::Array(items)) => items.push(entry),
        _ => {
            object.insert(key.to_string(), Value::Array(vec![entry]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_license_and_citation_become_lists() {
        let mut doc = json!({
            "schema_version": "0.0.1",
            "model_details": {
                "name": "m",
                "license": "MIT",
                "references": ["https://a", "https://b"],
                "citation": "Doe 2020"
            }
        });
        v0_0_1_to_v0_0_2(&mut doc);
        assert_eq!(
            doc["model_details"],
            json!({
                "name": "m",
                "licenses": [{"identifier": "MIT"}],
                "references": [{"reference": "https://a"}, {"reference": "https://b"}],
                "citations": [{"citation": "Doe 2020"}]
            })
        );
    }

    #[test]
    fn test_data_object_becomes_list() {
        let mut doc = json!({
            "model_parameters": {
                "data": {
                    "eval": {"path": "gs://eval"},
                    "train": {"name": "census-train", "path": "gs://train"}
                }
            }
        });
        v0_0_1_to_v0_0_2(&mut doc);
        assert_eq!(
            doc["model_parameters"]["data"],
            json!([
                {"name": "census-train", "path": "gs://train"},
                {"name": "eval", "path": "gs://eval"}
            ])
        );
    }

    #[test]
    fn test_non_object_data_members_move_aside() {
        let mut doc = json!({
            "model_parameters": {
                "data": {
                    "train": {"path": "gs://train"},
                    "notes": "see wiki",
                    "splits": 3
                }
            }
        });
        v0_0_1_to_v0_0_2(&mut doc);
        assert_eq!(
            doc["model_parameters"]["data"],
            json!([{"name": "train", "path": "gs://train"}])
        );
        assert_eq!(
            doc["model_parameters"]["data_extra"],
            json!({"notes": "see wiki", "splits": 3})
        );
    }

    #[test]
    fn test_metric_type_renamed_and_graphics_lifted() {
        let mut doc = json!({
            "schema_version": "0.0.2",
            "quantitative_analysis": {
                "performance_metrics": [{"type": "accuracy", "value": 0.9}],
                "graphics": {"description": "plots", "collection": [{"name": "roc"}]}
            }
        });
        v0_0_2_to_v0_1_0(&mut doc);
        assert_eq!(
            doc,
            json!({
                "schema_version": "0.0.2",
                "quantitative_analysis": {
                    "performance_metrics": [{"name": "accuracy", "value": 0.9}]
                },
                "graphics": {"description": "plots", "collection": [{"name": "roc"}]},
                "source_artifacts": []
            })
        );
    }

    #[test]
    fn test_lifted_graphics_join_existing_collection() {
        let mut doc = json!({
            "quantitative_analysis": {"graphics": {"collection": [{"name": "pr"}]}},
            "graphics": {"collection": [{"name": "roc"}]}
        });
        v0_0_2_to_v0_1_0(&mut doc);
        assert_eq!(
            doc["graphics"]["collection"],
            json!([{"name": "roc"}, {"name": "pr"}])
        );
    }

    #[test]
    fn test_rules_leave_unknown_members_alone() {
        let mut doc = json!({"model_details": {"name": "m", "team_slack": "#ml"}, "x-owner": 1});
        let before = doc.clone();
        v0_0_1_to_v0_0_2(&mut doc);
        assert_eq!(doc, before);
    }
}
