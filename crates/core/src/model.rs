//! Configuration records: language models, actions, agents.
//!
//! These are the persisted definitions the runtime executes against.
//! Agents reference actions by *name* (not by key), so dangling
//! references are possible and handled gracefully at execution time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider tag for a language-model definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Lmstudio,
    Ollama,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Lmstudio => "lmstudio",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Custom => "custom",
        }
    }
}

/// A stored language-model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDefinition {
    pub id: i64,
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model_name: String,
    #[serde(default = "default_context_window")]
    pub context_window: i64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_context_window() -> i64 {
    4096
}
fn default_max_tokens() -> i64 {
    1000
}
fn default_temperature() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}

/// Payload for creating a language-model definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLlmDefinition {
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model_name: String,
    #[serde(default = "default_context_window")]
    pub context_window: i64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

/// Partial update for a language-model definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub context_window: Option<i64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Whether an action is a built-in capability or an HTTP-described call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Native,
    Custom,
}

/// One declared parameter of a custom action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// A stored action definition.
///
/// For custom actions the endpoint may contain `{name}` placeholders that
/// are substituted from extracted parameters at invocation time. The spec
/// document, if present, has been sanitized: credential occurrences were
/// replaced with a placeholder token before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub kind: ActionKind,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating an action definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_kind")]
    pub kind: ActionKind,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default)]
    pub response_schema: Option<Value>,
    #[serde(default)]
    pub spec_document: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_kind() -> ActionKind {
    ActionKind::Custom
}

/// Partial update for an action definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: Option<BTreeMap<String, ParameterSpec>>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub config: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub response_schema: Option<Value>,
    #[serde(default)]
    pub spec_document: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Which logical flow a step belongs to within an agent's flat step list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTag {
    Main,
    ValidFlow,
    InvalidFlow,
}

impl Default for FlowTag {
    fn default() -> Self {
        FlowTag::Main
    }
}

impl FlowTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowTag::Main => "main",
            FlowTag::ValidFlow => "valid_flow",
            FlowTag::InvalidFlow => "invalid_flow",
        }
    }
}

/// One ordered step of an agent's action list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    pub action_name: String,
    /// Prompt/instruction specific to this step's role in the flow.
    #[serde(default)]
    pub prompt: String,
    /// Follow-up question a suspension step asks alongside its message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default)]
    pub flow: FlowTag,
}

/// A branch pair attached to a decision ("Choice") step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalFlow {
    /// Name of the decision action step that triggers this branch.
    pub decision_action: String,
    #[serde(default)]
    pub valid_flow: Vec<ActionStep>,
    #[serde(default)]
    pub invalid_flow: Vec<ActionStep>,
}

/// A stored agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    pub llm_id: i64,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub conditional_flows: Vec<ConditionalFlow>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentDefinition {
    /// First conditional flow registered for a decision action, if any.
    pub fn conditional_flow_for(&self, decision_action: &str) -> Option<&ConditionalFlow> {
        self.conditional_flows
            .iter()
            .find(|f| f.decision_action == decision_action)
    }
}

/// Payload for creating an agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    pub llm_id: i64,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub conditional_flows: Vec<ConditionalFlow>,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
}

/// Partial update for an agent definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub llm_id: Option<i64>,
    #[serde(default)]
    pub steps: Option<Vec<ActionStep>>,
    #[serde(default)]
    pub conditional_flows: Option<Vec<ConditionalFlow>>,
    #[serde(default)]
    pub config: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// The closed set of built-in capabilities.
///
/// Dispatch is by enumeration, not by string comparison at the call
/// sites — adding a capability is a compile-time change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Thinking,
    Respond,
    Wait,
    Choice,
    Generic,
}

impl Capability {
    /// Classify a native action by name. Unknown names fall back to `Generic`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Thinking" => Capability::Thinking,
            "Respond" => Capability::Respond,
            "Wait" => Capability::Wait,
            "Choice" => Capability::Choice,
            _ => Capability::Generic,
        }
    }

    /// Can this capability end a run with a user-facing answer?
    pub fn is_terminal(&self) -> bool {
        matches!(self, Capability::Respond)
    }

    /// Can this capability suspend a run awaiting user input?
    pub fn is_suspending(&self) -> bool {
        matches!(self, Capability::Wait)
    }
}
