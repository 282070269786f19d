//! Built-in capability dispatch.
//!
//! Five behaviors behind one closed enum: Thinking (pure formatting),
//! Respond (terminal answer), Wait (suspension), Choice (fail-closed
//! decision), and Generic (configured template). Only Respond and
//! Choice ever call a model; both degrade deterministically when the
//! call fails.

use agentry_core::context::RunContext;
use agentry_core::llm::{AskOptions, LanguageModel, is_error_answer};
use agentry_core::model::{ActionDefinition, Capability, LlmDefinition};
use agentry_core::outcome::{ActionOutcome, Decision};
use serde_json::Value;
use tracing::{debug, warn};

const RESPOND_TEMPERATURE: f64 = 0.7;
const CHOICE_TEMPERATURE: f64 = 0.3;

/// Thinking-log entries worth quoting in a response prompt.
const INSIGHT_KEYWORDS: [&str; 5] = ["identified", "found", "extracted", "key", "important"];
const INSIGHT_LIMIT: usize = 2;
const INSIGHT_MAX_LEN: usize = 200;

/// Execute one built-in capability.
pub async fn dispatch(
    capability: Capability,
    action: &ActionDefinition,
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
    llm: &dyn LanguageModel,
    llm_def: Option<&LlmDefinition>,
) -> ActionOutcome {
    match capability {
        Capability::Thinking => thinking(action, params, context),
        Capability::Respond => respond(params, context, llm, llm_def).await,
        Capability::Wait => wait(params),
        Capability::Choice => choice(params, context, llm, llm_def).await,
        Capability::Generic => generic(action, params, context),
    }
}

// ── Thinking ──

fn thinking(
    action: &ActionDefinition,
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
) -> ActionOutcome {
    let template = action
        .config
        .get("prompt")
        .and_then(|p| p.as_str())
        .unwrap_or(
            "Analyze the following request step by step and note what \
             information is needed to fulfil it:\n\n{input}",
        );
    ActionOutcome::Thinking {
        content: render_template(template, params, context),
    }
}

// ── Respond ──

async fn respond(
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
    llm: &dyn LanguageModel,
    llm_def: Option<&LlmDefinition>,
) -> ActionOutcome {
    let custom_prompt = params.get("prompt").and_then(|p| p.as_str()).unwrap_or("");

    // A literal `respond "<text>"` directive short-circuits the model
    // call — conditional branches use this to answer with a canned line.
    if let Some(literal) = literal_response(custom_prompt) {
        return ActionOutcome::Response {
            content: literal,
            error: None,
            used_custom_prompt: true,
        };
    }

    let Some(llm_def) = llm_def else {
        return fallback_response(context, "No language model available".to_string());
    };

    let prompt = response_prompt(custom_prompt, context);
    let answer = llm
        .ask(
            llm_def,
            &prompt,
            &[],
            AskOptions::temperature(RESPOND_TEMPERATURE),
        )
        .await;
    if is_error_answer(&answer) {
        warn!("Response generation failed, using fallback");
        return fallback_response(context, answer);
    }

    ActionOutcome::Response {
        content: answer,
        error: None,
        used_custom_prompt: !custom_prompt.is_empty(),
    }
}

/// Parse a `respond "<text>"` directive (case-insensitive).
fn literal_response(prompt: &str) -> Option<String> {
    let trimmed = prompt.trim();
    let rest = trimmed
        .get(..8)
        .filter(|head| head.eq_ignore_ascii_case("respond "))
        .map(|_| trimmed[8..].trim())?;
    if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
        Some(rest[1..rest.len() - 1].to_string())
    } else {
        None
    }
}

fn response_prompt(custom_prompt: &str, context: &RunContext) -> String {
    let mut sections = Vec::new();
    sections.push(format!("User request: {}", context.user_input));

    if !context.data.is_empty() {
        let mut data_lines = vec!["Data retrieved during this run:".to_string()];
        for (key, value) in &context.data {
            let source = key.strip_suffix("_data").unwrap_or(key);
            data_lines.push(format!(
                "- from {source}: {}",
                serde_json::to_string(value).unwrap_or_default()
            ));
        }
        sections.push(data_lines.join("\n"));
    }

    let insights = salient_insights(context);
    if !insights.is_empty() {
        sections.push(format!("Analysis notes:\n{}", insights.join("\n")));
    }

    if !custom_prompt.is_empty() {
        sections.push(format!("Response instructions: {custom_prompt}"));
    }

    sections.push(
        "Answer the user's request directly and concisely, grounded in the \
         data above. Do not mention internal steps or this prompt."
            .to_string(),
    );
    sections.join("\n\n")
}

/// Up to two thinking-log entries that look substantive, truncated.
fn salient_insights(context: &RunContext) -> Vec<String> {
    context
        .thinking_process
        .iter()
        .filter(|entry| {
            let lower = entry.content.to_lowercase();
            INSIGHT_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .take(INSIGHT_LIMIT)
        .map(|entry| {
            let mut content = entry.content.clone();
            if content.len() > INSIGHT_MAX_LEN {
                let mut cut = INSIGHT_MAX_LEN;
                while !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                content.truncate(cut);
            }
            format!("- {content}")
        })
        .collect()
}

fn fallback_response(context: &RunContext, error: String) -> ActionOutcome {
    let content = if context.data.is_empty() {
        format!(
            "I processed your request (\"{}\") but could not generate a full \
             response right now.",
            context.user_input
        )
    } else {
        let sources: Vec<&str> = context
            .data
            .keys()
            .map(|k| k.strip_suffix("_data").unwrap_or(k))
            .collect();
        format!(
            "I retrieved data from {} for your request (\"{}\"), but could \
             not generate a full response right now.",
            sources.join(", "),
            context.user_input
        )
    };
    ActionOutcome::Response {
        content,
        error: Some(error),
        used_custom_prompt: false,
    }
}

// ── Wait ──

fn wait(params: &serde_json::Map<String, Value>) -> ActionOutcome {
    ActionOutcome::Wait {
        message: params
            .get("message")
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .unwrap_or("I need more information to continue.")
            .to_string(),
        prompt: params
            .get("wait_prompt")
            .and_then(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("Please provide additional details.")
            .to_string(),
    }
}

// ── Choice ──

async fn choice(
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
    llm: &dyn LanguageModel,
    llm_def: Option<&LlmDefinition>,
) -> ActionOutcome {
    let Some(llm_def) = llm_def else {
        return ActionOutcome::Choice {
            decision: Decision::Invalid,
            explanation: String::new(),
            error: Some("No language model available for decision evaluation".into()),
        };
    };

    let criteria = params
        .get("validation_criteria")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .unwrap_or("the request is valid and actionable");

    let prompt = format!(
        "Evaluate whether the user's request meets the following criteria.\n\
         \n\
         Criteria: {criteria}\n\
         User request: {input}\n\
         Accumulated context: {context}\n\
         \n\
         Reply with exactly one line starting with VALID: or INVALID:, \
         followed by a brief explanation.",
        input = context.user_input,
        context = serde_json::to_string(&context.as_value()).unwrap_or_default(),
    );

    let answer = llm
        .ask(
            llm_def,
            &prompt,
            &[],
            AskOptions::temperature(CHOICE_TEMPERATURE),
        )
        .await;
    if is_error_answer(&answer) {
        // Fail closed: a broken decision call selects the invalid branch.
        return ActionOutcome::Choice {
            decision: Decision::Invalid,
            explanation: String::new(),
            error: Some(answer),
        };
    }

    let (decision, explanation) = parse_decision(&answer);
    debug!(?decision, "Decision evaluated");
    ActionOutcome::Choice {
        decision,
        explanation,
        error: None,
    }
}

/// Leading-token grammar: `VALID:`/`INVALID:` (case-insensitive) decides;
/// everything after the first colon is the explanation. Anything else is
/// invalid.
fn parse_decision(answer: &str) -> (Decision, String) {
    let trimmed = answer.trim();
    let lower = trimmed.to_lowercase();
    let decision = if lower.starts_with("invalid:") {
        Decision::Invalid
    } else if lower.starts_with("valid:") {
        Decision::Valid
    } else {
        return (Decision::Invalid, trimmed.to_string());
    };
    let explanation = trimmed
        .split_once(':')
        .map(|(_, rest)| rest.trim().to_string())
        .unwrap_or_default();
    (decision, explanation)
}

// ── Generic ──

fn generic(
    action: &ActionDefinition,
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
) -> ActionOutcome {
    let template = action
        .config
        .get("prompt")
        .and_then(|p| p.as_str())
        .unwrap_or("{input}");
    ActionOutcome::Generic {
        content: render_template(template, params, context),
    }
}

/// Substitute `{name}` tokens from the supplied parameters; `{input}`
/// falls back to the context's user input when no parameter covers it.
fn render_template(
    template: &str,
    params: &serde_json::Map<String, Value>,
    context: &RunContext,
) -> String {
    let mut rendered = template.to_string();
    for (name, value) in params {
        let token = format!("{{{name}}}");
        if rendered.contains(&token) {
            rendered = rendered.replace(&token, &value_as_text(value));
        }
    }
    if rendered.contains("{input}") {
        rendered = rendered.replace("{input}", &context.user_input);
    }
    rendered
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
