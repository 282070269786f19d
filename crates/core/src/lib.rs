//! # Agentry Core
//!
//! Domain types, traits, and error definitions for the Agentry
//! configurable agent-runner platform. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is defined as a trait here (language-model
//! capability, action catalog). Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod catalog;
pub mod context;
pub mod error;
pub mod llm;
pub mod model;
pub mod outcome;
pub mod redact;

// Re-export key types at crate root for ergonomics
pub use catalog::ActionCatalog;
pub use context::{ContextSummary, ConversationEntry, RunContext, ThoughtEntry};
pub use error::{Error, ProviderError, Result, SpecError, StoreError};
pub use llm::{AskOptions, Exchange, LanguageModel, LLM_ERROR_PREFIX, is_error_answer};
pub use model::{
    ActionDefinition, ActionKind, ActionStep, ActionUpdate, AgentDefinition, AgentUpdate,
    Capability, ConditionalFlow, FlowTag, LlmDefinition, LlmUpdate, NewActionDefinition,
    NewAgentDefinition, NewLlmDefinition, ParameterSpec, ProviderKind,
};
pub use outcome::{ActionOutcome, Decision, HttpOutcome, InvokeFailure};
pub use redact::{is_sensitive_key, mask_credential, redact_value};
