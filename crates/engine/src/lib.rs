//! # Agentry Engine
//!
//! The action-flow execution core: parameter extraction, built-in
//! capability dispatch, external action invocation, response filtering,
//! flow execution with conditional branching, and the top-level agent
//! runner with suspend/resume.
//!
//! Execution is single-threaded and synchronous per run: one action at a
//! time, strictly in list order. Independent runs share nothing but the
//! configuration store, so no locking lives here.

pub mod capability;
pub mod extract;
pub mod filter;
pub mod flow;
pub mod invoke;
pub mod runner;

use agentry_core::catalog::ActionCatalog;
use agentry_core::llm::LanguageModel;
use std::sync::Arc;

pub use flow::{ActionRecord, FlowOutput, ResumePoint, Suspension};
pub use invoke::Invoker;
pub use runner::{RunOutcome, SessionSnapshot};

/// The assembled execution engine. Cheap to clone; one instance serves
/// every concurrent run.
#[derive(Clone)]
pub struct Engine {
    pub(crate) catalog: Arc<dyn ActionCatalog>,
    pub(crate) llm: Arc<dyn LanguageModel>,
    pub(crate) invoker: Invoker,
}

impl Engine {
    pub fn new(
        catalog: Arc<dyn ActionCatalog>,
        llm: Arc<dyn LanguageModel>,
        invoker: Invoker,
    ) -> Self {
        Self {
            catalog,
            llm,
            invoker,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared stubs for engine tests: a scripted language model and an
    //! in-memory action catalog.

    use agentry_core::catalog::ActionCatalog;
    use agentry_core::error::StoreError;
    use agentry_core::llm::{AskOptions, Exchange, LanguageModel};
    use agentry_core::model::{
        ActionDefinition, ActionKind, AgentDefinition, LlmDefinition, ProviderKind,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Returns queued answers in order, then repeats the last one.
    pub struct ScriptedModel {
        answers: Mutex<Vec<String>>,
        pub asked: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn ask(
            &self,
            _definition: &LlmDefinition,
            prompt: &str,
            _history: &[Exchange],
            _options: AskOptions,
        ) -> String {
            self.asked.lock().unwrap().push(prompt.to_string());
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop().unwrap()
            } else {
                answers.first().cloned().unwrap_or_default()
            }
        }
    }

    pub struct MapCatalog {
        actions: HashMap<String, ActionDefinition>,
    }

    impl MapCatalog {
        pub fn new(actions: Vec<ActionDefinition>) -> Self {
            Self {
                actions: actions.into_iter().map(|a| (a.name.clone(), a)).collect(),
            }
        }
    }

    #[async_trait]
    impl ActionCatalog for MapCatalog {
        async fn action_by_name(
            &self,
            name: &str,
        ) -> std::result::Result<Option<ActionDefinition>, StoreError> {
            Ok(self.actions.get(name).cloned())
        }
    }

    pub fn native_action(name: &str) -> ActionDefinition {
        ActionDefinition {
            id: 1,
            name: name.into(),
            description: String::new(),
            endpoint: None,
            method: None,
            parameters: Default::default(),
            headers: Default::default(),
            kind: ActionKind::Native,
            config: serde_json::Map::new(),
            response_schema: None,
            spec_document: None,
            api_key: None,
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn llm_definition() -> LlmDefinition {
        LlmDefinition {
            id: 1,
            name: "test-llm".into(),
            provider: ProviderKind::Openai,
            api_key: None,
            base_url: None,
            model_name: "test-model".into(),
            context_window: 4096,
            max_tokens: 1000,
            temperature: 0.1,
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn agent(steps: Vec<agentry_core::model::ActionStep>) -> AgentDefinition {
        AgentDefinition {
            id: 1,
            name: "test-agent".into(),
            description: String::new(),
            system_prompt: String::new(),
            llm_id: 1,
            steps,
            conditional_flows: vec![],
            config: serde_json::Map::new(),
            is_active: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    pub fn step(action: &str, prompt: &str) -> agentry_core::model::ActionStep {
        agentry_core::model::ActionStep {
            action_name: action.into(),
            prompt: prompt.into(),
            wait_prompt: None,
            order: None,
            flow: agentry_core::model::FlowTag::Main,
        }
    }
}
