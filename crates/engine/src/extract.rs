//! Parameter extraction: turn free-text user input into a structured
//! parameter set for one action, using the agent's language model.
//!
//! The model's answer is treated as a parser input with a defined
//! grammar: the outermost `{...}` substring must be a JSON object.
//! Anything else degrades to "no parameters extracted" — extraction
//! failures never abort a run.

use agentry_core::context::RunContext;
use agentry_core::llm::{AskOptions, LanguageModel, is_error_answer};
use agentry_core::model::{ActionDefinition, LlmDefinition};
use serde_json::Value;
use tracing::{debug, warn};

const EXTRACTION_TEMPERATURE: f64 = 0.1;

/// Extract declared parameters for an action from the user's input and
/// the accumulated context. Returns an empty map when the action
/// declares no parameters, no model is available, or the answer does
/// not conform.
pub async fn extract_parameters(
    llm: &dyn LanguageModel,
    llm_def: Option<&LlmDefinition>,
    action: &ActionDefinition,
    context: &RunContext,
) -> serde_json::Map<String, Value> {
    if action.parameters.is_empty() {
        return serde_json::Map::new();
    }
    let Some(llm_def) = llm_def else {
        return serde_json::Map::new();
    };

    let prompt = extraction_prompt(action, context);
    let answer = llm
        .ask(
            llm_def,
            &prompt,
            &[],
            AskOptions::temperature(EXTRACTION_TEMPERATURE),
        )
        .await;
    if is_error_answer(&answer) {
        warn!(action = %action.name, "Parameter extraction call failed");
        return serde_json::Map::new();
    }

    let Some(parsed) = outermost_json_object(&answer) else {
        debug!(action = %action.name, "No JSON object in extraction answer");
        return serde_json::Map::new();
    };

    // Keep declared, non-null fields only.
    let mut out = serde_json::Map::new();
    for (name, value) in parsed {
        if action.parameters.contains_key(&name) && !value.is_null() {
            out.insert(name, value);
        }
    }
    debug!(action = %action.name, count = out.len(), "Extracted parameters");
    out
}

fn extraction_prompt(action: &ActionDefinition, context: &RunContext) -> String {
    let schema = serde_json::to_string_pretty(&action.parameters).unwrap_or_default();
    format!(
        "Extract the parameters for the action \"{name}\" from the user's request.\n\
         \n\
         Declared parameters (JSON schema):\n{schema}\n\
         \n\
         User request: {input}\n\
         \n\
         Data gathered so far: {data}\n\
         \n\
         Reply with a single JSON object mapping parameter names to values.\n\
         Omit parameters the request does not specify. Reply with {{}} if none apply.",
        name = action.name,
        schema = schema,
        input = context.user_input,
        data = serde_json::to_string(&context.data).unwrap_or_default(),
    )
}

/// The outermost `{...}` substring of an answer, parsed as a JSON object.
fn outermost_json_object(answer: &str) -> Option<serde_json::Map<String, Value>> {
    let start = answer.find('{')?;
    let end = answer.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&answer[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
