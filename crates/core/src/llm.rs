//! The language-model capability seam.
//!
//! One abstracted operation: ask the model a question, get a text
//! answer. `ask` never fails — provider-specific failures must be
//! caught by the implementation and turned into an error-prefixed text
//! answer, because several capabilities treat the return value as
//! always-present text and inspect it for conventional prefixes
//! (`VALID:`/`INVALID:`).

use crate::model::LlmDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One prior question/answer pair supplied as conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// Per-call sampling overrides. Unset fields fall back to the
/// definition's defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
}

impl AskOptions {
    pub fn temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// Conventional prefix of an answer produced from a failed call.
pub const LLM_ERROR_PREFIX: &str = "Error calling LLM:";

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Ask the model a question. Infallible by contract: failures come
    /// back as text beginning with [`LLM_ERROR_PREFIX`].
    async fn ask(
        &self,
        definition: &LlmDefinition,
        prompt: &str,
        history: &[Exchange],
        options: AskOptions,
    ) -> String;
}

/// Did this answer come from a failed call?
pub fn is_error_answer(answer: &str) -> bool {
    answer.starts_with(LLM_ERROR_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_answers_are_detectable() {
        assert!(is_error_answer("Error calling LLM: timeout"));
        assert!(!is_error_answer("VALID: looks good"));
    }
}
