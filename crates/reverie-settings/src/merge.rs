//! Merge semantics for LLM parameter override blobs.
//!
//! Overrides are stored as untyped JSON at the database boundary and
//! validated against the `LlmParams` whitelist here, at the resolver
//! boundary. Unknown fields are rejected, never stored.

use serde_json::Value;

use reverie_core::types::LlmParams;

/// Result of merging a partial input into the current override blob.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The merged blob to store.
    Merged(Value),
    /// The merge removed every field; the caller should delete the row.
    Empty,
    /// The input violated the partial schema (unknown field or wrong type).
    Invalid(String),
}

/// Merge `input` into `current`.
///
/// Field rules: a non-null input field replaces the stored value; an
/// explicit `null` deletes the stored field; fields absent from the input
/// are left untouched. An input that is not an object, carries a field
/// outside the `LlmParams` whitelist, or has a mistyped value is `Invalid`.
pub fn merge_config_overrides(input: &Value, current: Option<&Value>) -> MergeOutcome {
    let Some(input_map) = input.as_object() else {
        return MergeOutcome::Invalid("overrides must be a JSON object".to_string());
    };

    // Whitelist check: nulls stripped first since null fields are deletions,
    // not values, and the typed parse treats explicit null as absent anyway.
    let non_null: Value = Value::Object(
        input_map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    if let Err(e) = serde_json::from_value::<LlmParams>(non_null.clone()) {
        return MergeOutcome::Invalid(e.to_string());
    }
    // Keys that are null in the input are deletions, but must still name
    // known fields.
    for (key, value) in input_map {
        if value.is_null() && !is_known_field(key) {
            return MergeOutcome::Invalid(format!("unknown field: {key}"));
        }
    }

    let mut merged = current
        .and_then(|c| c.as_object().cloned())
        .unwrap_or_default();

    for (key, value) in input_map {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }

    if merged.is_empty() {
        MergeOutcome::Empty
    } else {
        MergeOutcome::Merged(Value::Object(merged))
    }
}

/// Camel-case field names of the `LlmParams` whitelist.
fn is_known_field(key: &str) -> bool {
    const FIELDS: &[&str] = &[
        "temperature",
        "maxTokens",
        "topP",
        "topK",
        "frequencyPenalty",
        "presencePenalty",
        "repetitionPenalty",
        "minP",
        "topA",
        "seed",
        "stop",
        "logitBias",
        "responseFormat",
        "reasoning",
        "transforms",
        "route",
        "verbosity",
    ];
    FIELDS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_partial_over_current() {
        let current = json!({"temperature": 1.0, "topP": 0.9});
        let input = json!({"temperature": 0.5});
        match merge_config_overrides(&input, Some(&current)) {
            MergeOutcome::Merged(v) => {
                assert_eq!(v["temperature"], json!(0.5));
                assert_eq!(v["topP"], json!(0.9));
            }
            other => panic!("expected Merged, got {other:?}"),
        }
    }

    #[test]
    fn null_deletes_field() {
        let current = json!({"temperature": 1.0, "topP": 0.9});
        let input = json!({"topP": null});
        match merge_config_overrides(&input, Some(&current)) {
            MergeOutcome::Merged(v) => {
                assert!(v.get("topP").is_none());
                assert_eq!(v["temperature"], json!(1.0));
            }
            other => panic!("expected Merged, got {other:?}"),
        }
    }

    #[test]
    fn clearing_everything_yields_empty() {
        let current = json!({"temperature": 1.0});
        let input = json!({"temperature": null});
        assert_eq!(
            merge_config_overrides(&input, Some(&current)),
            MergeOutcome::Empty
        );
    }

    #[test]
    fn empty_input_on_no_current_yields_empty() {
        assert_eq!(
            merge_config_overrides(&json!({}), None),
            MergeOutcome::Empty
        );
    }

    #[test]
    fn unknown_field_is_invalid() {
        let input = json!({"hallucinationRate": 0.0});
        assert!(matches!(
            merge_config_overrides(&input, None),
            MergeOutcome::Invalid(_)
        ));
    }

    #[test]
    fn unknown_null_field_is_invalid() {
        let input = json!({"hallucinationRate": null});
        assert!(matches!(
            merge_config_overrides(&input, None),
            MergeOutcome::Invalid(_)
        ));
    }

    #[test]
    fn non_object_is_invalid() {
        assert!(matches!(
            merge_config_overrides(&json!([1, 2]), None),
            MergeOutcome::Invalid(_)
        ));
    }

    #[test]
    fn mistyped_value_is_invalid() {
        let input = json!({"temperature": "hot"});
        assert!(matches!(
            merge_config_overrides(&input, None),
            MergeOutcome::Invalid(_)
        ));
    }
}
