//! OpenAPI-style spec reading for custom actions.
//!
//! A spec document describes one HTTP action: its endpoint, verb,
//! declared parameters, auth headers, and response shape. Only the
//! extracted contracts matter to the rest of the system — the document
//! itself is stored sanitized (credentials replaced by a placeholder)
//! and re-parsed on demand.
//!
//! YAML is a superset of JSON here, so both document styles parse
//! through the same path.

use agentry_core::error::SpecError;
use agentry_core::model::ParameterSpec;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::warn;

/// Token written in place of a credential inside stored documents.
pub const CREDENTIAL_PLACEHOLDER: &str = "{{ API_KEY }}";

const HTTP_METHODS: [&str; 6] = ["get", "post", "put", "delete", "patch", "head"];

/// A parsed spec document. Keeps the YAML tree so path/method iteration
/// preserves document order (the first declared operation wins).
#[derive(Debug)]
pub struct SpecDocument {
    root: serde_yaml::Value,
}

impl SpecDocument {
    /// Parse a YAML or JSON document. Failure to parse is a distinct,
    /// reported error kind, never silent.
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let root: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| SpecError::Parse(e.to_string()))?;
        if !root.is_mapping() {
            return Err(SpecError::NotAMapping);
        }
        Ok(Self { root })
    }

    fn get<'a>(&'a self, key: &str) -> Option<&'a serde_yaml::Value> {
        self.root.get(key)
    }

    /// First declared (path, method, operation) triple.
    fn first_operation(&self) -> Option<(&str, &str, &serde_yaml::Value)> {
        let paths = self.get("paths")?.as_mapping()?;
        for (path_key, item) in paths {
            let path = path_key.as_str()?;
            let methods = item.as_mapping()?;
            for (method_key, operation) in methods {
                if let Some(method) = method_key.as_str() {
                    if HTTP_METHODS.contains(&method.to_lowercase().as_str()) {
                        return Some((path, method, operation));
                    }
                }
            }
        }
        None
    }

    /// Full endpoint URL: first server address joined with the first path.
    pub fn endpoint(&self) -> Option<String> {
        let (path, _, _) = self.first_operation()?;
        let server = self
            .get("servers")
            .and_then(|s| s.as_sequence())
            .and_then(|seq| seq.first())
            .and_then(|first| first.get("url"))
            .and_then(|url| url.as_str())
            .unwrap_or("");
        if server.is_empty() {
            Some(path.to_string())
        } else {
            Some(format!("{}{}", server.trim_end_matches('/'), path))
        }
    }

    /// Uppercased verb of the first declared operation.
    pub fn method(&self) -> Option<String> {
        self.first_operation()
            .map(|(_, method, _)| method.to_uppercase())
    }

    /// Declared parameters of the first operation: path/query parameters
    /// plus JSON request-body properties.
    pub fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        let mut out = BTreeMap::new();
        let Some((_, _, operation)) = self.first_operation() else {
            return out;
        };

        if let Some(params) = operation.get("parameters").and_then(|p| p.as_sequence()) {
            for param in params {
                let Some(name) = param.get("name").and_then(|n| n.as_str()) else {
                    continue;
                };
                let param_type = param
                    .get("schema")
                    .and_then(|s| s.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("string")
                    .to_string();
                out.insert(
                    name.to_string(),
                    ParameterSpec {
                        param_type,
                        required: param
                            .get("required")
                            .and_then(|r| r.as_bool())
                            .unwrap_or(false),
                        description: param
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .to_string(),
                    },
                );
            }
        }

        let body_schema = operation
            .get("requestBody")
            .and_then(|b| b.get("content"))
            .and_then(|c| c.get("application/json"))
            .and_then(|j| j.get("schema"));
        if let Some(schema) = body_schema {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(|r| r.as_sequence())
                .map(|seq| seq.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            if let Some(props) = schema.get("properties").and_then(|p| p.as_mapping()) {
                for (prop_key, prop) in props {
                    let Some(name) = prop_key.as_str() else {
                        continue;
                    };
                    out.insert(
                        name.to_string(),
                        ParameterSpec {
                            param_type: prop
                                .get("type")
                                .and_then(|t| t.as_str())
                                .unwrap_or("string")
                                .to_string(),
                            required: required.contains(&name),
                            description: prop
                                .get("description")
                                .and_then(|d| d.as_str())
                                .unwrap_or("")
                                .to_string(),
                        },
                    );
                }
            }
        }

        out
    }

    /// Headers derived from the document's security schemes.
    ///
    /// With a credential supplied, concrete header values are produced;
    /// otherwise template placeholders (`{{ scheme_name }}`) are left for
    /// later substitution.
    pub fn security_headers(&self, credential: Option<&str>) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let schemes = self
            .get("components")
            .and_then(|c| c.get("securitySchemes"))
            .and_then(|s| s.as_mapping());
        let Some(schemes) = schemes else {
            return out;
        };

        for (scheme_key, scheme) in schemes {
            let Some(scheme_name) = scheme_key.as_str() else {
                continue;
            };
            let scheme_type = scheme.get("type").and_then(|t| t.as_str()).unwrap_or("");
            match scheme_type {
                "apiKey" => {
                    let location = scheme.get("in").and_then(|i| i.as_str()).unwrap_or("");
                    if location != "header" {
                        continue;
                    }
                    let header = scheme
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("Authorization");
                    let value = match credential {
                        Some(key) if header.eq_ignore_ascii_case("authorization") => {
                            format!("Bearer {key}")
                        }
                        Some(key) => key.to_string(),
                        None => format!("{{{{ {scheme_name} }}}}"),
                    };
                    out.insert(header.to_string(), value);
                }
                "http" => {
                    let http_scheme = scheme.get("scheme").and_then(|s| s.as_str()).unwrap_or("");
                    if http_scheme != "bearer" {
                        continue;
                    }
                    let value = match credential {
                        Some(key) => format!("Bearer {key}"),
                        None => format!("Bearer {{{{ {scheme_name} }}}}"),
                    };
                    out.insert("Authorization".to_string(), value);
                }
                _ => {}
            }
        }

        out
    }

    /// Response schema of the first operation's first 2xx response, as JSON.
    pub fn response_schema(&self) -> Option<Value> {
        let (_, _, operation) = self.first_operation()?;
        let responses = operation.get("responses")?.as_mapping()?;
        for (code_key, response) in responses {
            // Status codes may parse as integers or strings depending on quoting.
            let code = match code_key {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !code.starts_with('2') {
                continue;
            }
            let schema = response
                .get("content")
                .and_then(|c| c.get("application/json"))
                .and_then(|j| j.get("schema"))?;
            return yaml_to_json(schema);
        }
        None
    }
}

/// Convert a YAML subtree to JSON. Scalar mapping keys are stringified;
/// unrepresentable keys drop the whole subtree with a warning.
fn yaml_to_json(value: &serde_yaml::Value) -> Option<Value> {
    match value {
        serde_yaml::Value::Null => Some(Value::Null),
        serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            serde_json::to_value(n).ok()
        }
        serde_yaml::Value::String(s) => Some(Value::String(s.clone())),
        serde_yaml::Value::Sequence(items) => {
            Some(Value::Array(items.iter().filter_map(yaml_to_json).collect()))
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let key = match key {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        warn!(?other, "Dropping mapping entry with non-scalar key");
                        continue;
                    }
                };
                if let Some(converted) = yaml_to_json(val) {
                    out.insert(key, converted);
                }
            }
            Some(Value::Object(out))
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// A human-scannable preview of a response schema: property names mapped
/// to their types, nested up to three levels, deeper levels elided.
pub fn schema_preview(schema: &Value) -> Value {
    preview_at(schema, 0)
}

fn preview_at(schema: &Value, level: usize) -> Value {
    if level > 3 {
        return Value::String("...".to_string());
    }
    match schema.get("type").and_then(|t| t.as_str()) {
        Some("object") => {
            let mut out = serde_json::Map::new();
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (name, prop) in props {
                    out.insert(name.clone(), preview_at(prop, level + 1));
                }
            }
            Value::Object(out)
        }
        Some("array") => {
            let items = schema.get("items").map(|i| preview_at(i, level + 1));
            json!([items.unwrap_or(Value::String("any".to_string()))])
        }
        Some(other) => Value::String(other.to_string()),
        None if schema.get("properties").is_some() => {
            // Untyped but structured — treat as an object.
            let mut with_type = schema.clone();
            with_type["type"] = json!("object");
            preview_at(&with_type, level)
        }
        None => Value::String("any".to_string()),
    }
}

/// Replace every literal occurrence of a credential in a document with
/// the fixed placeholder, bearer-prefixed occurrences first. Idempotent,
/// and a no-op for documents containing no occurrence.
pub fn sanitize_document(text: &str, credential: Option<&str>) -> String {
    let Some(credential) = credential.filter(|c| !c.is_empty()) else {
        return text.to_string();
    };
    text.replace(
        &format!("Bearer {credential}"),
        &format!("Bearer {CREDENTIAL_PLACEHOLDER}"),
    )
    .replace(credential, CREDENTIAL_PLACEHOLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r#"
openapi: 3.0.0
info:
  title: Pet lookup
servers:
  - url: https://api.example.com/v1
paths:
  /pets/{petId}:
    get:
      summary: Get a pet
      parameters:
        - name: petId
          in: path
          required: true
          description: Pet identifier
          schema:
            type: string
        - name: verbose
          in: query
          schema:
            type: boolean
      responses:
        '200':
          content:
            application/json:
              schema:
                type: object
                properties:
                  id:
                    type: string
                  name:
                    type: string
                  owner:
                    type: object
                    properties:
                      email:
                        type: string
components:
  securitySchemes:
    ApiKeyAuth:
      type: apiKey
      in: header
      name: X-Api-Key
"#;

    #[test]
    fn parse_rejects_malformed_documents() {
        let err = SpecDocument::parse("paths: [unclosed").unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
    }

    #[test]
    fn parse_rejects_non_mapping_roots() {
        let err = SpecDocument::parse("- a\n- b\n").unwrap_err();
        assert!(matches!(err, SpecError::NotAMapping));
    }

    #[test]
    fn endpoint_joins_server_and_path() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        assert_eq!(
            doc.endpoint().unwrap(),
            "https://api.example.com/v1/pets/{petId}"
        );
        assert_eq!(doc.method().unwrap(), "GET");
    }

    #[test]
    fn parameters_merge_path_and_query() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        let params = doc.parameters();
        assert_eq!(params["petId"].param_type, "string");
        assert!(params["petId"].required);
        assert_eq!(params["petId"].description, "Pet identifier");
        assert_eq!(params["verbose"].param_type, "boolean");
        assert!(!params["verbose"].required);
    }

    #[test]
    fn request_body_properties_become_parameters() {
        let doc = SpecDocument::parse(
            r#"
paths:
  /items:
    post:
      requestBody:
        content:
          application/json:
            schema:
              type: object
              required: [title]
              properties:
                title:
                  type: string
                count:
                  type: integer
      responses: {}
"#,
        )
        .unwrap();
        let params = doc.parameters();
        assert!(params["title"].required);
        assert!(!params["count"].required);
        assert_eq!(params["count"].param_type, "integer");
    }

    #[test]
    fn api_key_scheme_without_credential_yields_template() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        let headers = doc.security_headers(None);
        assert_eq!(headers["X-Api-Key"], "{{ ApiKeyAuth }}");
    }

    #[test]
    fn api_key_scheme_with_credential_yields_value() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        let headers = doc.security_headers(Some("sk-123"));
        assert_eq!(headers["X-Api-Key"], "sk-123");
    }

    #[test]
    fn bearer_scheme_produces_authorization_header() {
        let doc = SpecDocument::parse(
            r#"
paths: {}
components:
  securitySchemes:
    BearerAuth:
      type: http
      scheme: bearer
"#,
        )
        .unwrap();
        let headers = doc.security_headers(Some("sk-123"));
        assert_eq!(headers["Authorization"], "Bearer sk-123");
        let templated = doc.security_headers(None);
        assert_eq!(templated["Authorization"], "Bearer {{ BearerAuth }}");
    }

    #[test]
    fn response_schema_takes_first_2xx() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        let schema = doc.response_schema().unwrap();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["name"].is_object());
    }

    #[test]
    fn unquoted_status_codes_still_match() {
        let doc = SpecDocument::parse(
            r#"
paths:
  /a:
    get:
      responses:
        200:
          content:
            application/json:
              schema:
                type: object
                properties:
                  ok:
                    type: boolean
"#,
        )
        .unwrap();
        assert!(doc.response_schema().is_some());
    }

    #[test]
    fn preview_caps_depth() {
        let doc = SpecDocument::parse(PETSTORE).unwrap();
        let preview = schema_preview(&doc.response_schema().unwrap());
        assert_eq!(preview["name"], "string");
        assert_eq!(preview["owner"]["email"], "string");

        let deep = serde_json::json!({
            "type": "object",
            "properties": {"a": {"type": "object", "properties": {"b": {"type": "object",
                "properties": {"c": {"type": "object", "properties": {"d": {"type": "string"}}}}}}}}
        });
        let preview = schema_preview(&deep);
        assert_eq!(preview["a"]["b"]["c"]["d"], "...");
    }

    #[test]
    fn sanitize_removes_every_credential_occurrence() {
        let text = "headers:\n  Authorization: Bearer sk-123\n  X-Key: sk-123\n";
        let cleaned = sanitize_document(text, Some("sk-123"));
        assert!(!cleaned.contains("sk-123"));
        assert!(cleaned.contains("Bearer {{ API_KEY }}"));
        assert!(cleaned.contains("X-Key: {{ API_KEY }}"));
    }

    #[test]
    fn sanitize_is_idempotent_and_safe_without_occurrences() {
        let text = "info:\n  title: clean document\n";
        assert_eq!(sanitize_document(text, Some("sk-123")), text);
        let once = sanitize_document("key: sk-9", Some("sk-9"));
        assert_eq!(sanitize_document(&once, Some("sk-9")), once);
        assert_eq!(sanitize_document(text, None), text);
    }
}
