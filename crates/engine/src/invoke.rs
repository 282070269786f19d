//! External action invocation: one HTTP call described by an action
//! definition.
//!
//! Never raises — every failure path yields an `HttpOutcome` with
//! `success == false` and a distinct failure class. Request preparation
//! is pure and separated from sending so the substitution, placement,
//! and header rules are testable without a network.

use crate::filter;
use agentry_core::context::RunContext;
use agentry_core::model::ActionDefinition;
use agentry_core::outcome::{ActionOutcome, HttpOutcome, InvokeFailure};
use agentry_core::redact::redact_value;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const SUPPORTED_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Known API families for endpoint normalization: a stored path that is
/// not absolute gets one of these bases when the action name or path
/// points at the family.
const KNOWN_BASES: [(&str, &str); 3] = [
    ("rootly", "https://api.rootly.com"),
    ("github", "https://api.github.com"),
    ("slack", "https://slack.com/api"),
];

/// A fully prepared request, ready to send.
#[derive(Debug)]
pub struct PreparedRequest {
    pub url: String,
    pub method: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub path_params_used: Vec<String>,
    pub authentication_used: bool,
}

/// Executes external actions over a shared HTTP client with a fixed
/// per-call ceiling.
#[derive(Clone)]
pub struct Invoker {
    client: reqwest::Client,
    timeout: Duration,
}

impl Invoker {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Invoke one HTTP-described action. The `context` key, if present
    /// in the parameters, is visible to the caller but stripped before
    /// the request is sent.
    pub async fn invoke(
        &self,
        action: &ActionDefinition,
        params: &serde_json::Map<String, Value>,
        _context: &RunContext,
    ) -> ActionOutcome {
        let prepared = match prepare(action, params) {
            Ok(prepared) => prepared,
            Err(outcome) => return ActionOutcome::Http(*outcome),
        };
        ActionOutcome::Http(self.send(action, prepared).await)
    }

    async fn send(&self, action: &ActionDefinition, prepared: PreparedRequest) -> HttpOutcome {
        debug!(
            action = %action.name,
            method = %prepared.method,
            url = %prepared.url,
            "Invoking external action"
        );

        let mut request = match prepared.method.as_str() {
            "GET" => self.client.get(&prepared.url).query(&prepared.query),
            "DELETE" => self.client.delete(&prepared.url).query(&prepared.query),
            "POST" => self
                .client
                .post(&prepared.url)
                .json(prepared.body.as_ref().unwrap_or(&Value::Null)),
            "PUT" => self
                .client
                .put(&prepared.url)
                .json(prepared.body.as_ref().unwrap_or(&Value::Null)),
            // prepare() already rejected anything else
            other => {
                return reject_with_echo(
                    &prepared,
                    InvokeFailure::UnsupportedMethod {
                        method: other.to_string(),
                    },
                    format!("Unsupported HTTP method: {other}"),
                );
            }
        };
        for (name, value) in &prepared.headers {
            request = request.header(name, value);
        }

        let response = match request.timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return reject_with_echo(
                    &prepared,
                    InvokeFailure::Timeout,
                    format!(
                        "Request to {} timed out after {}s",
                        prepared.url,
                        self.timeout.as_secs()
                    ),
                );
            }
            Err(err) => {
                return reject_with_echo(
                    &prepared,
                    InvokeFailure::Connection,
                    format!("Could not reach {}: {err}", prepared.url),
                );
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body_text = response.text().await.unwrap_or_default();

        if status >= 400 {
            let detail = upstream_error_detail(&body_text);
            let mut outcome = reject_with_echo(
                &prepared,
                InvokeFailure::Status { status },
                format!("HTTP {status} from {}: {detail}", prepared.url),
            );
            outcome.status = Some(status);
            return outcome;
        }

        let payload = match serde_json::from_str::<Value>(&body_text) {
            Ok(body) => build_payload(action, body),
            Err(_) => json!({
                "content": body_text,
                "content_type": content_type,
            }),
        };

        HttpOutcome {
            success: true,
            status: Some(status),
            payload: Some(payload),
            error: None,
            failure: None,
            endpoint_called: Some(prepared.url.clone()),
            method: prepared.method.clone(),
            authentication_used: prepared.authentication_used,
            headers_sent: Some(echo_headers(&prepared)),
            params_sent: Some(echo_params(&prepared)),
            path_params_used: prepared.path_params_used,
        }
    }
}

/// Build the response payload, applying the action's response schema
/// when one is configured.
fn build_payload(action: &ActionDefinition, body: Value) -> Value {
    match &action.response_schema {
        Some(schema) if schema.get("properties").is_some() || schema.get("type").is_some() => {
            let filtered = filter::apply(schema, &body);
            json!({
                "filtered_data": filtered,
                "raw_data": body,
                "schema_applied": true,
                "schema_used": schema,
            })
        }
        _ => json!({
            "data": body,
            "schema_applied": false,
            "note": "No response schema configured; returning the raw payload",
        }),
    }
}

/// Precondition checks and request construction, in order: endpoint
/// configured, URL absolute after normalization, every placeholder
/// resolvable (unresolved names reported together), method supported.
/// No request is emitted if any check fails.
pub fn prepare(
    action: &ActionDefinition,
    params: &serde_json::Map<String, Value>,
) -> Result<PreparedRequest, Box<HttpOutcome>> {
    let Some(endpoint) = action.endpoint.as_deref().filter(|e| !e.is_empty()) else {
        return Err(Box::new(HttpOutcome::rejected(
            InvokeFailure::MissingEndpoint,
            format!("Action '{}' has no endpoint configured", action.name),
        )));
    };

    let endpoint = normalize_endpoint(&action.name, endpoint);
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(Box::new(HttpOutcome::rejected(
            InvokeFailure::InvalidUrl {
                endpoint: endpoint.clone(),
            },
            format!(
                "Endpoint '{endpoint}' is not a fully-qualified URL; configure an \
                 absolute http(s) address for action '{}'",
                action.name
            ),
        )));
    }

    // Path placeholder substitution.
    let mut url = endpoint;
    let mut path_params_used = Vec::new();
    for (name, value) in params {
        if name == "context" {
            continue;
        }
        let token = format!("{{{name}}}");
        if !url.contains(&token) {
            continue;
        }
        let mut text = value_as_text(value);
        if text.starts_with("http://") || text.starts_with("https://") {
            if let Some(id) = trailing_identifier(&text) {
                warn!(
                    param = %name,
                    "Parameter value looks like a URL; using its trailing segment"
                );
                text = id;
            }
        }
        url = url.replace(&token, &text);
        path_params_used.push(name.clone());
    }

    let unresolved = placeholder_names(&url);
    if !unresolved.is_empty() {
        return Err(Box::new(HttpOutcome::rejected(
            InvokeFailure::UnresolvedPlaceholders {
                names: unresolved.clone(),
            },
            format!(
                "Missing required path parameters for action '{}': {}",
                action.name,
                unresolved.join(", ")
            ),
        )));
    }

    let method = action
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_uppercase();
    if !SUPPORTED_METHODS.contains(&method.as_str()) {
        return Err(Box::new(HttpOutcome::rejected(
            InvokeFailure::UnsupportedMethod {
                method: method.clone(),
            },
            format!("Unsupported HTTP method: {method}"),
        )));
    }

    // Remaining parameters go to the query string (GET/DELETE) or the
    // JSON body (POST/PUT). The context key is stripped here.
    let remaining: Vec<(&String, &Value)> = params
        .iter()
        .filter(|(name, _)| *name != "context" && !path_params_used.contains(name))
        .collect();
    let (query, body) = if method == "GET" || method == "DELETE" {
        (
            remaining
                .iter()
                .map(|(name, value)| ((*name).clone(), value_as_text(value)))
                .collect(),
            None,
        )
    } else {
        let mut object = serde_json::Map::new();
        for (name, value) in remaining {
            object.insert(name.clone(), value.clone());
        }
        (Vec::new(), Some(Value::Object(object)))
    };

    let (headers, authentication_used) = build_headers(action, &method);

    Ok(PreparedRequest {
        url,
        method,
        query,
        body,
        headers,
        path_params_used,
        authentication_used,
    })
}

/// Merge static headers with defaults and credential injection:
/// - POST gets `Content-Type: application/json` unless configured;
/// - a configured credential becomes `Authorization: Bearer <key>` when
///   no concrete Authorization header exists;
/// - `{{ ... }}` template spans in header values are replaced with the
///   credential.
fn build_headers(
    action: &ActionDefinition,
    method: &str,
) -> (BTreeMap<String, String>, bool) {
    let mut headers = action.headers.clone();

    if method == "POST" && !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let mut authentication_used = false;
    if let Some(key) = action.api_key.as_deref().filter(|k| !k.is_empty()) {
        for value in headers.values_mut() {
            if let Some(substituted) = substitute_template(value, key) {
                *value = substituted;
                authentication_used = true;
            }
        }

        let has_authorization = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"));
        if !has_authorization {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
            authentication_used = true;
        } else {
            authentication_used = true;
        }
    }

    (headers, authentication_used)
}

/// Replace one `{{ ... }}` span with the credential, if present.
fn substitute_template(value: &str, key: &str) -> Option<String> {
    let start = value.find("{{")?;
    let end = value[start..].find("}}").map(|i| start + i + 2)?;
    Some(format!("{}{}{}", &value[..start], key, &value[end..]))
}

/// Heuristic endpoint repair for relative paths whose action name or
/// path identifies a well-known API family. Absolute URLs pass through.
pub fn normalize_endpoint(action_name: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let haystack = format!("{} {}", action_name.to_lowercase(), endpoint.to_lowercase());
    for (family, base) in KNOWN_BASES {
        if haystack.contains(family) {
            let path = if endpoint.starts_with('/') {
                endpoint.to_string()
            } else {
                format!("/{endpoint}")
            };
            return format!("{base}{path}");
        }
    }
    endpoint.to_string()
}

/// All `{name}` tokens remaining in a URL.
fn placeholder_names(url: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = url;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        names.push(rest[start + 1..start + len].to_string());
        rest = &rest[start + len + 1..];
    }
    names
}

/// Last `/`-delimited segment of a URL, when it looks like an identifier.
fn trailing_identifier(url: &str) -> Option<String> {
    let segment = url.trim_end_matches('/').rsplit('/').next()?;
    let identifier_like = segment.len() > 3
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    identifier_like.then(|| segment.to_string())
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn echo_headers(prepared: &PreparedRequest) -> Value {
    redact_value(&json!(prepared.headers))
}

fn echo_params(prepared: &PreparedRequest) -> Value {
    match &prepared.body {
        Some(body) => redact_value(body),
        None => {
            let object: serde_json::Map<String, Value> = prepared
                .query
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect();
            redact_value(&Value::Object(object))
        }
    }
}

fn reject_with_echo(
    prepared: &PreparedRequest,
    failure: InvokeFailure,
    error: String,
) -> HttpOutcome {
    let mut outcome = HttpOutcome::rejected(failure, error);
    outcome.endpoint_called = Some(prepared.url.clone());
    outcome.method = prepared.method.clone();
    outcome.path_params_used = prepared.path_params_used.clone();
    outcome.authentication_used = prepared.authentication_used;
    outcome.headers_sent = Some(echo_headers(prepared));
    outcome.params_sent = Some(echo_params(prepared));
    outcome
}

/// First error-ish field of an upstream error body, else a snippet.
fn upstream_error_detail(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(text) = parsed.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    let snippet: String = body.chars().take(200).collect();
    if snippet.is_empty() {
        "no response body".to_string()
    } else {
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::native_action;
    use agentry_core::model::ActionKind;
    use serde_json::json;

    fn custom_action(endpoint: &str, method: &str) -> ActionDefinition {
        let mut action = native_action("GetItem");
        action.kind = ActionKind::Custom;
        action.endpoint = Some(endpoint.into());
        action.method = Some(method.into());
        action
    }

    fn params(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn placeholder_substitution_builds_final_url() {
        let action = custom_action("https://api.example.com/items/{id}", "GET");
        let prepared = prepare(&action, &params(&[("id", json!("42"))])).unwrap();
        assert_eq!(prepared.url, "https://api.example.com/items/42");
        assert_eq!(prepared.method, "GET");
        assert_eq!(prepared.path_params_used, vec!["id"]);
        assert!(prepared.query.is_empty());
    }

    #[test]
    fn missing_placeholder_is_rejected_with_names() {
        let action = custom_action("https://api.example.com/items/{id}", "GET");
        let outcome = prepare(&action, &serde_json::Map::new()).unwrap_err();
        assert!(!outcome.success);
        assert_eq!(
            outcome.failure,
            Some(InvokeFailure::UnresolvedPlaceholders {
                names: vec!["id".into()]
            })
        );
        assert!(outcome.error.as_ref().unwrap().contains("id"));
    }

    #[test]
    fn all_unresolved_placeholders_reported_together() {
        let action = custom_action("https://api.example.com/{org}/items/{id}", "GET");
        let outcome = prepare(&action, &serde_json::Map::new()).unwrap_err();
        match outcome.failure {
            Some(InvokeFailure::UnresolvedPlaceholders { names }) => {
                assert_eq!(names, vec!["org".to_string(), "id".to_string()]);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn missing_endpoint_rejected() {
        let mut action = native_action("Orphan");
        action.kind = ActionKind::Custom;
        let outcome = prepare(&action, &serde_json::Map::new()).unwrap_err();
        assert_eq!(outcome.failure, Some(InvokeFailure::MissingEndpoint));
    }

    #[test]
    fn relative_endpoint_without_known_family_rejected() {
        let action = custom_action("/v1/items", "GET");
        let outcome = prepare(&action, &serde_json::Map::new()).unwrap_err();
        assert!(matches!(
            outcome.failure,
            Some(InvokeFailure::InvalidUrl { .. })
        ));
    }

    #[test]
    fn known_family_path_gets_a_base() {
        assert_eq!(
            normalize_endpoint("ListRootlyIncidents", "/v1/incidents"),
            "https://api.rootly.com/v1/incidents"
        );
        assert_eq!(
            normalize_endpoint("Anything", "https://x.test/a"),
            "https://x.test/a"
        );
    }

    #[test]
    fn unsupported_method_rejected() {
        let action = custom_action("https://api.example.com/items", "PATCH");
        let outcome = prepare(&action, &serde_json::Map::new()).unwrap_err();
        assert!(matches!(
            outcome.failure,
            Some(InvokeFailure::UnsupportedMethod { .. })
        ));
    }

    #[test]
    fn get_places_remaining_params_in_query() {
        let action = custom_action("https://api.example.com/items/{id}", "GET");
        let prepared = prepare(
            &action,
            &params(&[
                ("id", json!("42")),
                ("verbose", json!(true)),
                ("context", json!({"ignored": true})),
            ]),
        )
        .unwrap();
        assert_eq!(prepared.query, vec![("verbose".to_string(), "true".to_string())]);
        assert!(prepared.body.is_none());
    }

    #[test]
    fn post_places_remaining_params_in_body() {
        let action = custom_action("https://api.example.com/items", "POST");
        let prepared = prepare(
            &action,
            &params(&[("title", json!("hello")), ("context", json!("strip me"))]),
        )
        .unwrap();
        assert_eq!(prepared.body, Some(json!({"title": "hello"})));
        assert_eq!(prepared.headers["Content-Type"], "application/json");
    }

    #[test]
    fn bearer_injected_when_credential_configured() {
        let mut action = custom_action("https://api.example.com/items", "GET");
        action.api_key = Some("sk-secret-1234".into());
        let prepared = prepare(&action, &serde_json::Map::new()).unwrap();
        assert_eq!(prepared.headers["Authorization"], "Bearer sk-secret-1234");
        assert!(prepared.authentication_used);
    }

    #[test]
    fn template_authorization_header_replaced() {
        let mut action = custom_action("https://api.example.com/items", "GET");
        action.api_key = Some("sk-secret-1234".into());
        action
            .headers
            .insert("Authorization".into(), "Bearer {{ BearerAuth }}".into());
        let prepared = prepare(&action, &serde_json::Map::new()).unwrap();
        assert_eq!(prepared.headers["Authorization"], "Bearer sk-secret-1234");
    }

    #[test]
    fn concrete_authorization_header_kept() {
        let mut action = custom_action("https://api.example.com/items", "GET");
        action.api_key = Some("sk-ignored".into());
        action
            .headers
            .insert("Authorization".into(), "Bearer existing-token".into());
        let prepared = prepare(&action, &serde_json::Map::new()).unwrap();
        assert_eq!(prepared.headers["Authorization"], "Bearer existing-token");
    }

    #[test]
    fn url_shaped_parameter_value_trimmed_to_identifier() {
        let action = custom_action("https://api.example.com/items/{id}", "GET");
        let prepared = prepare(
            &action,
            &params(&[("id", json!("https://other.example.com/items/abc-123"))]),
        )
        .unwrap();
        assert_eq!(prepared.url, "https://api.example.com/items/abc-123");
    }

    #[test]
    fn payload_without_schema_flags_no_filtering() {
        let action = custom_action("https://api.example.com/items/{id}", "GET");
        let payload = build_payload(&action, json!({"id": "42", "name": "Rex"}));
        assert_eq!(payload["schema_applied"], false);
        assert_eq!(payload["data"]["name"], "Rex");
    }

    #[test]
    fn payload_with_schema_carries_filtered_and_raw() {
        let mut action = custom_action("https://api.example.com/items/{id}", "GET");
        action.response_schema = Some(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}}
        }));
        let payload = build_payload(&action, json!({"id": "42", "name": "Rex"}));
        assert_eq!(payload["schema_applied"], true);
        assert_eq!(payload["filtered_data"], json!({"name": "Rex"}));
        assert_eq!(payload["raw_data"]["id"], "42");
    }

    #[test]
    fn echoed_headers_are_redacted() {
        let mut action = custom_action("https://api.example.com/items", "GET");
        action.api_key = Some("sk-secret-1234".into());
        let prepared = prepare(&action, &serde_json::Map::new()).unwrap();
        let echoed = echo_headers(&prepared);
        assert_eq!(echoed["Authorization"], "Bearer ***1234");
    }

    #[tokio::test]
    async fn rejected_invocation_never_sends() {
        // An invalid URL never reaches the network, so this cannot flake.
        let invoker = Invoker::new(reqwest::Client::new(), Duration::from_secs(1));
        let action = custom_action("not-a-url", "GET");
        let ctx = RunContext::new("x", "a");
        let outcome = invoker.invoke(&action, &serde_json::Map::new(), &ctx).await;
        match outcome {
            ActionOutcome::Http(http) => {
                assert!(!http.success);
                assert!(matches!(http.failure, Some(InvokeFailure::InvalidUrl { .. })));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_classified() {
        let invoker = Invoker::new(reqwest::Client::new(), Duration::from_secs(1));
        let action = custom_action("http://127.0.0.1:1/items", "GET");
        let ctx = RunContext::new("x", "a");
        let outcome = invoker.invoke(&action, &serde_json::Map::new(), &ctx).await;
        match outcome {
            ActionOutcome::Http(http) => {
                assert!(!http.success);
                assert!(matches!(http.failure, Some(InvokeFailure::Connection)));
                assert!(http.error.unwrap().contains("127.0.0.1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn upstream_error_detail_prefers_error_fields() {
        assert_eq!(
            upstream_error_detail(r#"{"error": "not found"}"#),
            "not found"
        );
        assert_eq!(upstream_error_detail("plain text"), "plain text");
        assert_eq!(upstream_error_detail(""), "no response body");
    }
}
