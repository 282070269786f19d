//! The shared run context — the accumulator threaded through every step.
//!
//! Created fresh at run start (or rebuilt from a caller-held snapshot on
//! resume), never persisted by the runtime, never shared across runs.
//! Well-known fields are typed; capability-specific extras go in the
//! extension bag. The contract is "subsequent steps see everything prior
//! steps produced".

use crate::outcome::ActionOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One appended thinking-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtEntry {
    pub action: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One appended conversation-log entry. Every folded result adds one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub action: String,
    pub kind: String,
    pub content: String,
    pub background: bool,
}

/// Counts reported back to the caller after a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub entities_extracted: usize,
    pub thinking_steps: usize,
    pub data_retrieved: usize,
}

/// The per-run shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub user_input: String,
    pub agent_name: String,
    #[serde(default)]
    pub available_actions: Vec<String>,
    /// Raw result per action name; a repeated action overwrites its prior entry.
    #[serde(default)]
    pub action_results: BTreeMap<String, ActionOutcome>,
    #[serde(default)]
    pub thinking_process: Vec<ThoughtEntry>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationEntry>,
    /// Reserved; not populated by the built-in capabilities.
    #[serde(default)]
    pub extracted_entities: serde_json::Map<String, Value>,
    /// Reserved; not populated by the built-in capabilities.
    #[serde(default)]
    pub session_data: serde_json::Map<String, Value>,
    /// `<action_name>_data` extracts from successful external calls.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    /// Extension bag for capability-specific keys.
    #[serde(default)]
    pub extensions: serde_json::Map<String, Value>,
}

impl RunContext {
    pub fn new(user_input: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            agent_name: agent_name.into(),
            available_actions: Vec::new(),
            action_results: BTreeMap::new(),
            thinking_process: Vec::new(),
            conversation_history: Vec::new(),
            extracted_entities: serde_json::Map::new(),
            session_data: serde_json::Map::new(),
            data: BTreeMap::new(),
            extensions: serde_json::Map::new(),
        }
    }

    /// Fold one step result into the context. Applied unconditionally
    /// per step, in order:
    /// 1. record the raw result under the per-action table;
    /// 2. store a `<name>_data` extract for successful external results;
    /// 3. append thinking results to the thinking log;
    /// 4. always append a conversation-log entry.
    pub fn fold(&mut self, action_name: &str, outcome: &ActionOutcome) {
        if let ActionOutcome::Http(http) = outcome {
            if let Some(extract) = http.data_extract() {
                self.data
                    .insert(format!("{action_name}_data"), extract.clone());
            }
        }

        if let ActionOutcome::Thinking { content } = outcome {
            self.thinking_process.push(ThoughtEntry {
                action: action_name.to_string(),
                content: content.clone(),
                timestamp: Utc::now(),
            });
        }

        self.conversation_history.push(ConversationEntry {
            action: action_name.to_string(),
            kind: outcome.kind().to_string(),
            content: outcome
                .content()
                .map(str::to_string)
                .unwrap_or_else(|| summarize_http(outcome)),
            background: outcome.is_background(),
        });

        self.action_results
            .insert(action_name.to_string(), outcome.clone());
    }

    /// Append new user text for a resumed run. The original input is
    /// never dropped.
    pub fn extend_input(&mut self, new_input: &str) {
        if new_input.is_empty() {
            return;
        }
        if self.user_input.is_empty() {
            self.user_input = new_input.to_string();
        } else {
            self.user_input = format!("{} {}", self.user_input, new_input);
        }
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            entities_extracted: self.extracted_entities.len(),
            thinking_steps: self.thinking_process.len(),
            data_retrieved: self.data.len(),
        }
    }

    /// The whole context as a JSON value, for embedding into prompts.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn summarize_http(outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Http(http) if http.success => {
            format!("external call succeeded ({})", http.method)
        }
        ActionOutcome::Http(http) => http
            .error
            .clone()
            .unwrap_or_else(|| "external call failed".to_string()),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Decision, HttpOutcome};
    use serde_json::json;

    fn http_success(payload: Value) -> ActionOutcome {
        ActionOutcome::Http(HttpOutcome {
            success: true,
            status: Some(200),
            payload: Some(payload),
            error: None,
            failure: None,
            endpoint_called: Some("https://api.example.com/items/42".into()),
            method: "GET".into(),
            path_params_used: vec!["id".into()],
            authentication_used: false,
            headers_sent: None,
            params_sent: None,
        })
    }

    #[test]
    fn fold_records_data_extract_for_external_results() {
        let mut ctx = RunContext::new("fetch item 42", "fetcher");
        ctx.fold(
            "GetItem",
            &http_success(json!({"data": {"id": 42}, "schema_applied": false})),
        );
        assert_eq!(ctx.data["GetItem_data"], json!({"id": 42}));
        assert!(ctx.action_results.contains_key("GetItem"));
        assert_eq!(ctx.conversation_history.len(), 1);
    }

    #[test]
    fn fold_appends_thinking_entries() {
        let mut ctx = RunContext::new("hi", "greeter");
        ctx.fold(
            "Thinking",
            &ActionOutcome::Thinking {
                content: "analyze the request".into(),
            },
        );
        assert_eq!(ctx.thinking_process.len(), 1);
        assert_eq!(ctx.thinking_process[0].action, "Thinking");
        assert!(ctx.conversation_history[0].background);
    }

    #[test]
    fn repeated_action_overwrites_prior_result() {
        let mut ctx = RunContext::new("hi", "greeter");
        ctx.fold(
            "Choice",
            &ActionOutcome::Choice {
                decision: Decision::Valid,
                explanation: "first".into(),
                error: None,
            },
        );
        ctx.fold(
            "Choice",
            &ActionOutcome::Choice {
                decision: Decision::Invalid,
                explanation: "second".into(),
                error: None,
            },
        );
        assert_eq!(ctx.action_results.len(), 1);
        assert_eq!(
            ctx.action_results["Choice"].branch_request(),
            Some(Decision::Invalid)
        );
        // Both folds leave a conversation trace.
        assert_eq!(ctx.conversation_history.len(), 2);
    }

    #[test]
    fn extend_input_keeps_original_text() {
        let mut ctx = RunContext::new("book a flight", "travel");
        ctx.extend_input("to Lisbon");
        assert_eq!(ctx.user_input, "book a flight to Lisbon");
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let mut ctx = RunContext::new("hello", "greeter");
        ctx.fold(
            "Wait",
            &ActionOutcome::Wait {
                message: "need a date".into(),
                prompt: "when?".into(),
            },
        );
        let snapshot = serde_json::to_string(&ctx).unwrap();
        let restored: RunContext = serde_json::from_str(&snapshot).unwrap();
        assert_eq!(restored.user_input, "hello");
        assert_eq!(restored.conversation_history.len(), 1);
        assert!(restored.action_results["Wait"].pauses_execution());
    }
}
