//! Aggregation pipeline validator and cost estimator.
//!
//! Pure, synchronous, and entirely decoupled from any driver: a pipeline is
//! rejected (or costed) before a connection is ever checked out.

use nimbus_core::{NimbusError, Result};
use serde_json::Value;

/// Maximum number of top-level stages a pipeline may contain.
pub const MAX_TOP_LEVEL_STAGES: usize = 20;
/// Maximum nesting depth for pipelines embedded inside `$lookup`,
/// `$facet`, or `$unionWith`.
pub const MAX_NESTED_DEPTH: usize = 5;

const ALLOWED_STAGES: &[&str] = &[
    "$project",
    "$match",
    "$limit",
    "$skip",
    "$sort",
    "$group",
    "$unwind",
    "$lookup",
    "$addFields",
    "$count",
    "$sample",
    "$replaceRoot",
    "$facet",
    "$bucket",
    "$bucketAuto",
    "$sortByCount",
    "$geoNear",
    "$graphLookup",
    "$redact",
    "$unionWith",
];

const FORBIDDEN_STAGES: &[&str] = &["$out", "$merge", "$where", "$function", "$accumulator"];

/// Validate an aggregation pipeline against the allow-list, forbidden-stage
/// list, and stage-count/nesting-depth bounds.
pub fn validate_pipeline(pipeline: &Value) -> Result<()> {
    let stages = pipeline
        .as_array()
        .ok_or_else(|| NimbusError::pipeline_rejected("pipeline must be a JSON array of stages"))?;

    if stages.len() > MAX_TOP_LEVEL_STAGES {
        return Err(NimbusError::pipeline_rejected(format!(
            "pipeline has {} stages, exceeding the maximum of {MAX_TOP_LEVEL_STAGES}",
            stages.len()
        )));
    }

    for stage in stages {
        validate_stage(stage, 0)?;
    }
    Ok(())
}

fn validate_stage(stage: &Value, depth: usize) -> Result<()> {
    let obj = stage
        .as_object()
        .ok_or_else(|| NimbusError::pipeline_rejected("each stage must be a JSON object"))?;
    if obj.len() != 1 {
        return Err(NimbusError::pipeline_rejected(
            "each stage must have exactly one operator key",
        ));
    }
    let (op, value) = obj.iter().next().expect("checked len == 1 above");

    if FORBIDDEN_STAGES.contains(&op.as_str()) {
        return Err(NimbusError::pipeline_rejected(format!("forbidden stage {op}")));
    }
    if !ALLOWED_STAGES.contains(&op.as_str()) {
        return Err(NimbusError::pipeline_rejected(format!(
            "unrecognized or disallowed stage {op}"
        )));
    }

    match op.as_str() {
        "$match" => reject_code_execution_operators(value),
        "$lookup" => {
            if let Some(from) = value.get("from").and_then(Value::as_str) {
                validate_collection_name(from)?;
            }
            if let Some(sub_pipeline) = value.get("pipeline") {
                validate_nested_pipeline(sub_pipeline, depth + 1)?;
            }
            Ok(())
        }
        "$graphLookup" => {
            if let Some(from) = value.get("from").and_then(Value::as_str) {
                validate_collection_name(from)?;
            }
            Ok(())
        }
        "$facet" => {
            let Some(facets) = value.as_object() else {
                return Err(NimbusError::pipeline_rejected("$facet value must be an object of named sub-pipelines"));
            };
            for sub_pipeline in facets.values() {
                validate_nested_pipeline(sub_pipeline, depth + 1)?;
            }
            Ok(())
        }
        "$unionWith" => {
            if let Some(collection) = value.as_str() {
                validate_collection_name(collection)?;
            } else if let Some(obj) = value.as_object() {
                if let Some(collection) = obj.get("coll").and_then(Value::as_str) {
                    validate_collection_name(collection)?;
                }
                if let Some(sub_pipeline) = obj.get("pipeline") {
                    validate_nested_pipeline(sub_pipeline, depth + 1)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_nested_pipeline(pipeline: &Value, depth: usize) -> Result<()> {
    if depth > MAX_NESTED_DEPTH {
        return Err(NimbusError::pipeline_rejected(format!(
            "pipeline nesting depth {depth} exceeds the maximum of {MAX_NESTED_DEPTH}"
        )));
    }
    let stages = pipeline
        .as_array()
        .ok_or_else(|| NimbusError::pipeline_rejected("nested pipeline must be a JSON array of stages"))?;
    for stage in stages {
        validate_stage(stage, depth)?;
    }
    Ok(())
}

/// Filter documents must not contain `$where` or `$function` at any depth,
/// independent of the forbidden-stages check above — this catches them
/// buried inside a `$match` value rather than as a stage name.
fn reject_code_execution_operators(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key == "$where" || key == "$function" {
                    return Err(NimbusError::pipeline_rejected(format!(
                        "filter documents must not contain {key}"
                    )));
                }
                reject_code_execution_operators(nested)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(reject_code_execution_operators),
        _ => Ok(()),
    }
}

/// Validate a collection name: ≤255 chars, must not start with `system.`,
/// must not contain `$` or NUL.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.len() > 255 {
        return Err(NimbusError::pipeline_rejected("collection name exceeds 255 characters"));
    }
    if name.starts_with("system.") {
        return Err(NimbusError::pipeline_rejected(
            "collection name must not start with 'system.'",
        ));
    }
    if name.contains('$') || name.contains('\0') {
        return Err(NimbusError::pipeline_rejected(
            "collection name must not contain '$' or NUL",
        ));
    }
    Ok(())
}

/// Validate a database name: ≤64 chars, no `/\. "$*<>:|?`.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.len() > 64 {
        return Err(NimbusError::pipeline_rejected("database name exceeds 64 characters"));
    }
    const FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?'];
    if name.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(NimbusError::pipeline_rejected(
            "database name contains a forbidden character",
        ));
    }
    Ok(())
}

/// Assign a numeric complexity score to a pipeline. No threshold is
/// enforced here — rejecting above a threshold is a policy decision left
/// to the caller.
pub fn estimate_cost(pipeline: &Value) -> i64 {
    let Some(stages) = pipeline.as_array() else {
        return 0;
    };
    stages
        .iter()
        .enumerate()
        .filter_map(|(index, stage)| stage.as_object().and_then(|o| o.iter().next()).map(|(op, value)| stage_cost(op, value, index)))
        .sum()
}

fn stage_cost(op: &str, value: &Value, index: usize) -> i64 {
    match op {
        "$lookup" => 20,
        "$graphLookup" => 30,
        "$group" => 10,
        "$sort" => 8,
        "$sample" => 15,
        "$geoNear" => 12,
        "$facet" => value
            .as_object()
            .map(|facets| facets.values().map(estimate_cost).sum())
            .unwrap_or(0),
        "$match" if index == 0 => -3,
        "$limit" if index <= 1 => -2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_an_allow_listed_pipeline_within_bounds() {
        let pipeline = json!([
            {"$match": {"active": true}},
            {"$sort": {"createdAt": -1}},
            {"$limit": 10},
        ]);
        assert!(validate_pipeline(&pipeline).is_ok());
    }

    #[test]
    fn rejects_out_stage() {
        let pipeline = json!([{"$match": {"a": 1}}, {"$out": "x"}]);
        let err = validate_pipeline(&pipeline).unwrap_err();
        assert!(matches!(err, NimbusError::PipelineRejected { .. }));
        assert!(err.to_string().contains("$out"));
    }

    #[test]
    fn rejects_where_buried_inside_match() {
        let pipeline = json!([{"$match": {"$where": "this.a == this.b"}}]);
        assert!(validate_pipeline(&pipeline).is_err());
    }

    #[test]
    fn rejects_more_than_twenty_top_level_stages() {
        let stages: Vec<Value> = (0..21).map(|_| json!({"$skip": 1})).collect();
        let pipeline = Value::Array(stages);
        assert!(validate_pipeline(&pipeline).is_err());
    }

    #[test]
    fn rejects_nesting_beyond_five_levels_inside_a_lookup() {
        let mut nested = json!([{"$match": {"a": 1}}]);
        for _ in 0..6 {
            nested = json!([{"$lookup": {"from": "x", "pipeline": nested}}]);
        }
        assert!(validate_pipeline(&nested).is_err());
    }

    #[test]
    fn accepts_a_facet_with_nested_allow_listed_stages() {
        let pipeline = json!([
            {"$facet": {
                "byCategory": [{"$group": {"_id": "$category", "count": {"$sum": 1}}}],
                "top": [{"$sort": {"score": -1}}, {"$limit": 5}],
            }}
        ]);
        assert!(validate_pipeline(&pipeline).is_ok());
    }

    #[test]
    fn rejects_an_invalid_collection_name_in_a_lookup() {
        let pipeline = json!([{"$lookup": {"from": "system.profile", "pipeline": []}}]);
        assert!(validate_pipeline(&pipeline).is_err());
    }

    #[test]
    fn cost_estimator_weighs_join_and_initial_filter() {
        let pipeline = json!([
            {"$match": {"a": 1}},
            {"$lookup": {"from": "orders", "pipeline": []}},
        ]);
        assert_eq!(estimate_cost(&pipeline), 20 - 3);
    }

    #[test]
    fn cost_estimator_recurses_into_facets() {
        let pipeline = json!([{"$facet": {"a": [{"$sort": {"x": 1}}]}}]);
        assert_eq!(estimate_cost(&pipeline), 8);
    }

    #[test]
    fn database_name_rejects_forbidden_characters() {
        assert!(validate_database_name("bad/name").is_err());
        assert!(validate_database_name("fine_name").is_ok());
    }
}
