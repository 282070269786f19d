//! Action outcomes — the closed result union every step execution produces.
//!
//! Each built-in capability and the external-call path yields one of
//! these variants. The flow executor routes on the variant (pause,
//! branch, classify) and the context accumulator folds it in; neither
//! ever inspects free-form strings to decide control flow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict of a decision ("Choice") step. Fail-closed: any evaluation
/// error maps to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Valid,
    Invalid,
}

impl Decision {
    /// Flow tag name of the branch this decision selects.
    pub fn next_flow(&self) -> &'static str {
        match self {
            Decision::Valid => "valid_flow",
            Decision::Invalid => "invalid_flow",
        }
    }
}

/// Distinct failure classes of an external action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvokeFailure {
    /// No endpoint configured on the action.
    MissingEndpoint,
    /// Endpoint is not a fully-qualified absolute URL.
    InvalidUrl { endpoint: String },
    /// `{name}` tokens left unresolved after substitution, reported together.
    UnresolvedPlaceholders { names: Vec<String> },
    /// HTTP verb outside the supported set.
    UnsupportedMethod { method: String },
    /// The per-call ceiling elapsed.
    Timeout,
    /// Could not reach the upstream host.
    Connection,
    /// Upstream answered with an error status.
    Status { status: u16 },
}

/// Result of one external (HTTP-described) action invocation.
///
/// Never constructed by raising: every failure path produces one of
/// these with `success == false` and a human-readable `error`. The
/// echoed headers/params are redacted before they are stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response payload keys: `filtered_data`/`raw_data`/`schema_applied`/
    /// `schema_used` when a schema filtered the body, `data`/`schema_applied`/
    /// `note` when none did, `content`/`content_type` for non-JSON bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<InvokeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_called: Option<String>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path_params_used: Vec<String>,
    #[serde(default)]
    pub authentication_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_sent: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_sent: Option<Value>,
}

impl HttpOutcome {
    /// Build a failure outcome before any request was emitted.
    pub fn rejected(failure: InvokeFailure, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            payload: None,
            error: Some(error.into()),
            failure: Some(failure),
            endpoint_called: None,
            method: String::new(),
            path_params_used: Vec::new(),
            authentication_used: false,
            headers_sent: None,
            params_sent: None,
        }
    }

    /// The value to record under `<action_name>_data`: filtered payload
    /// when present, raw payload otherwise.
    pub fn data_extract(&self) -> Option<&Value> {
        let payload = self.payload.as_ref()?;
        if !self.success {
            return None;
        }
        payload
            .get("filtered_data")
            .or_else(|| payload.get("data"))
    }
}

/// The closed union of step-execution results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Composed analysis prompt, stored as a context entry. Background,
    /// non-terminal, never calls a model itself.
    Thinking { content: String },

    /// Terminal, user-facing answer.
    Response {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        used_custom_prompt: bool,
    },

    /// Suspension request: the run pauses until the user supplies more input.
    Wait { message: String, prompt: String },

    /// Decision result. Always requests branch resolution; the executor
    /// decides whether a matching conditional flow exists.
    Choice {
        decision: Decision,
        #[serde(default)]
        explanation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Unclassified native action: rendered configuration template.
    Generic { content: String },

    /// Completed external call (success or structured failure).
    #[serde(rename = "custom_action")]
    Http(HttpOutcome),
}

impl ActionOutcome {
    /// Stable kind tag used in conversation-log entries and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionOutcome::Thinking { .. } => "thinking",
            ActionOutcome::Response { .. } => "response",
            ActionOutcome::Wait { .. } => "wait",
            ActionOutcome::Choice { .. } => "choice",
            ActionOutcome::Generic { .. } => "generic",
            ActionOutcome::Http(_) => "custom_action",
        }
    }

    /// Does this result short-circuit the flow executor?
    pub fn pauses_execution(&self) -> bool {
        matches!(self, ActionOutcome::Wait { .. })
    }

    /// Is this result hidden from the user (internal work)?
    pub fn is_background(&self) -> bool {
        matches!(self, ActionOutcome::Thinking { .. } | ActionOutcome::Http(_))
    }

    /// Is this a terminal, user-facing answer?
    pub fn is_user_message(&self) -> bool {
        matches!(self, ActionOutcome::Response { .. })
    }

    /// Decision verdict, when this outcome requests branch resolution.
    pub fn branch_request(&self) -> Option<Decision> {
        match self {
            ActionOutcome::Choice { decision, .. } => Some(*decision),
            _ => None,
        }
    }

    /// Human-readable content of the result, where one exists.
    pub fn content(&self) -> Option<&str> {
        match self {
            ActionOutcome::Thinking { content }
            | ActionOutcome::Response { content, .. }
            | ActionOutcome::Generic { content } => Some(content),
            ActionOutcome::Wait { message, .. } => Some(message),
            ActionOutcome::Choice { explanation, .. } => Some(explanation),
            ActionOutcome::Http(_) => None,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            ActionOutcome::Http(http) => http.success,
            ActionOutcome::Choice { error, .. } | ActionOutcome::Response { error, .. } => {
                error.is_none()
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wait_pauses_execution() {
        let outcome = ActionOutcome::Wait {
            message: "need more info".into(),
            prompt: "what city?".into(),
        };
        assert!(outcome.pauses_execution());
        assert!(!outcome.is_user_message());
    }

    #[test]
    fn data_extract_prefers_filtered_payload() {
        let outcome = HttpOutcome {
            success: true,
            status: Some(200),
            payload: Some(json!({
                "filtered_data": {"id": 1},
                "raw_data": {"id": 1, "noise": true},
                "schema_applied": true
            })),
            error: None,
            failure: None,
            endpoint_called: None,
            method: "GET".into(),
            path_params_used: vec![],
            authentication_used: false,
            headers_sent: None,
            params_sent: None,
        };
        assert_eq!(outcome.data_extract(), Some(&json!({"id": 1})));
    }

    #[test]
    fn data_extract_skips_failures() {
        let outcome = HttpOutcome::rejected(InvokeFailure::MissingEndpoint, "no endpoint");
        assert!(outcome.data_extract().is_none());
    }

    #[test]
    fn choice_serializes_with_type_tag() {
        let outcome = ActionOutcome::Choice {
            decision: Decision::Invalid,
            explanation: "missing id".into(),
            error: None,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["type"], "choice");
        assert_eq!(value["decision"], "invalid");
    }
}
