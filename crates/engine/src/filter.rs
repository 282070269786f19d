//! Response filtering: project an API response down to the fields a
//! structural schema declares.

use serde_json::Value;

/// Maximum nesting the filter will follow. Responses deeper than this
/// pass the remaining subtree through unfiltered.
const MAX_DEPTH: usize = 16;

/// Extract only the schema-declared fields from a response body.
///
/// Idempotent: filtering an already-filtered payload against the same
/// schema yields the same payload. Non-object data and unknown schema
/// shapes pass through unchanged.
pub fn apply(schema: &Value, data: &Value) -> Value {
    apply_at(schema, data, 0)
}

fn apply_at(schema: &Value, data: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return data.clone();
    }

    match schema.get("type").and_then(|t| t.as_str()) {
        Some("object") | None => {
            let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
                return data.clone();
            };
            let Some(object) = data.as_object() else {
                return data.clone();
            };
            let mut out = serde_json::Map::new();
            for (name, prop_schema) in properties {
                if let Some(value) = object.get(name) {
                    out.insert(name.clone(), apply_at(prop_schema, value, depth + 1));
                }
            }
            Value::Object(out)
        }
        Some("array") => {
            let Some(items) = data.as_array() else {
                return data.clone();
            };
            let item_schema = schema.get("items").cloned().unwrap_or(Value::Null);
            Value::Array(
                items
                    .iter()
                    .map(|item| apply_at(&item_schema, item, depth + 1))
                    .collect(),
            )
        }
        Some(_) => data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pet_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"},
                "owner": {
                    "type": "object",
                    "properties": {"email": {"type": "string"}}
                },
                "tags": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"label": {"type": "string"}}}
                }
            }
        })
    }

    #[test]
    fn keeps_only_declared_fields() {
        let data = json!({
            "id": "42",
            "name": "Rex",
            "internal_flag": true,
            "owner": {"email": "a@b.c", "ssn": "000"},
            "tags": [{"label": "good", "weight": 3}]
        });
        let filtered = apply(&pet_schema(), &data);
        assert_eq!(
            filtered,
            json!({
                "id": "42",
                "name": "Rex",
                "owner": {"email": "a@b.c"},
                "tags": [{"label": "good"}]
            })
        );
    }

    #[test]
    fn missing_declared_fields_are_omitted() {
        let filtered = apply(&pet_schema(), &json!({"name": "Rex"}));
        assert_eq!(filtered, json!({"name": "Rex"}));
    }

    #[test]
    fn filter_is_idempotent() {
        let data = json!({
            "id": "42",
            "name": "Rex",
            "noise": [1, 2, 3],
            "owner": {"email": "a@b.c", "extra": 1}
        });
        let once = apply(&pet_schema(), &data);
        let twice = apply(&pet_schema(), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn non_object_data_passes_through() {
        assert_eq!(apply(&pet_schema(), &json!([1, 2])), json!([1, 2]));
        assert_eq!(apply(&pet_schema(), &json!("plain")), json!("plain"));
    }

    #[test]
    fn schema_without_properties_passes_through() {
        let data = json!({"anything": 1});
        assert_eq!(apply(&json!({"type": "object"}), &data), data);
    }

    #[test]
    fn top_level_array_schema() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"id": {"type": "integer"}}}
        });
        let data = json!([{"id": 1, "x": "drop"}, {"id": 2}]);
        assert_eq!(apply(&schema, &data), json!([{"id": 1}, {"id": 2}]));
    }
}
