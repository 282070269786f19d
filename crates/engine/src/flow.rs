//! Flow execution: ordered steps, conditional branching, suspension.
//!
//! The executor walks an explicit frame stack instead of recursing:
//! each frame is one flow (the main list or one conditional branch)
//! with a cursor. A decision result pushes a branch frame; an exhausted
//! frame pops. A Wait result short-circuits the whole stack and hands
//! back a resume point naming where execution stopped.

use crate::capability;
use crate::extract;
use crate::Engine;
use agentry_core::context::RunContext;
use agentry_core::model::{
    ActionDefinition, ActionKind, ActionStep, AgentDefinition, Capability, FlowTag,
    LlmDefinition,
};
use agentry_core::outcome::{ActionOutcome, Decision};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

const RECORD_SUMMARY_LEN: usize = 150;

/// One executed step, classified for the caller's report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub kind: String,
    pub success: bool,
    pub summary: String,
}

/// Where a suspended run picks up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum ResumePoint {
    /// Next step index in the agent's main list.
    Main { next_index: usize },
    /// Next step index inside a conditional branch. Branch positions
    /// cannot be re-entered later; resumption refuses them.
    Branch {
        decision_action: String,
        flow: FlowTag,
        next_index: usize,
    },
}

/// A Wait result that stopped the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspension {
    pub message: String,
    pub prompt: String,
    pub resume: ResumePoint,
}

/// Everything a flow execution produced. The run context is mutated in
/// place by the caller's reference.
#[derive(Debug, Default)]
pub struct FlowOutput {
    pub actions_used: Vec<String>,
    pub background_actions: Vec<ActionRecord>,
    pub user_facing_actions: Vec<ActionRecord>,
    pub suspension: Option<Suspension>,
}

/// One flow being walked: its tag, its steps, and a cursor.
struct Frame {
    tag: FlowTag,
    steps: Vec<ActionStep>,
    index: usize,
    /// Decision action that opened this frame; `None` for the main list.
    origin: Option<String>,
}

impl Frame {
    fn main(agent: &AgentDefinition, start_index: usize) -> Self {
        Self {
            tag: FlowTag::Main,
            steps: ordered(&agent.steps),
            index: start_index,
            origin: None,
        }
    }

    fn branch(decision_action: &str, tag: FlowTag, steps: &[ActionStep]) -> Self {
        Self {
            tag,
            steps: ordered(steps),
            index: 0,
            origin: Some(decision_action.to_string()),
        }
    }

    fn resume_point(&self) -> ResumePoint {
        match &self.origin {
            None => ResumePoint::Main {
                next_index: self.index,
            },
            Some(decision_action) => ResumePoint::Branch {
                decision_action: decision_action.clone(),
                flow: self.tag,
                next_index: self.index,
            },
        }
    }
}

/// Steps in execution order: explicit `order` values win, declaration
/// order breaks ties and covers unordered steps.
fn ordered(steps: &[ActionStep]) -> Vec<ActionStep> {
    let mut out = steps.to_vec();
    if out.iter().any(|s| s.order.is_some()) {
        out.sort_by_key(|s| s.order.unwrap_or(i64::MAX));
    }
    out
}

impl Engine {
    /// Execute an agent's flow from `start_index` in the main list.
    pub(crate) async fn execute_flow(
        &self,
        agent: &AgentDefinition,
        llm_def: Option<&LlmDefinition>,
        ctx: &mut RunContext,
        start_index: usize,
    ) -> FlowOutput {
        let mut stack = vec![Frame::main(agent, start_index)];
        let mut out = FlowOutput::default();

        loop {
            let (step, resume) = {
                let Some(frame) = stack.last_mut() else { break };
                match frame.steps.get(frame.index) {
                    None => {
                        stack.pop();
                        continue;
                    }
                    Some(step) if step.flow != frame.tag => {
                        frame.index += 1;
                        continue;
                    }
                    Some(step) => {
                        let step = step.clone();
                        frame.index += 1;
                        (step, frame.resume_point())
                    }
                }
            };

            let action = match self.catalog.action_by_name(&step.action_name).await {
                Ok(Some(action)) if action.is_active => action,
                Ok(_) => {
                    // Unknown or deactivated action: record and keep going.
                    warn!(action = %step.action_name, "Configured action not available");
                    self.record_skip(
                        ctx,
                        &mut out,
                        &step.action_name,
                        format!("Action '{}' is not available", step.action_name),
                    );
                    continue;
                }
                Err(err) => {
                    warn!(action = %step.action_name, error = %err, "Action lookup failed");
                    self.record_skip(
                        ctx,
                        &mut out,
                        &step.action_name,
                        format!("Could not load action '{}': {err}", step.action_name),
                    );
                    continue;
                }
            };

            let params = self
                .step_parameters(&action, &step, llm_def, ctx)
                .await;
            let outcome = self.run_action(&action, &params, ctx, llm_def).await;

            if outcome.pauses_execution() {
                let (message, prompt) = match &outcome {
                    ActionOutcome::Wait { message, prompt } => {
                        (message.clone(), prompt.clone())
                    }
                    _ => (String::new(), String::new()),
                };
                ctx.fold(&step.action_name, &outcome);
                out.actions_used.push(step.action_name.clone());
                out.user_facing_actions
                    .push(record(&step.action_name, &outcome, ctx));
                out.suspension = Some(Suspension {
                    message,
                    prompt,
                    resume,
                });
                break;
            }

            ctx.fold(&step.action_name, &outcome);
            out.actions_used.push(step.action_name.clone());
            let entry = record(&step.action_name, &outcome, ctx);
            // Only a terminal answer is user-facing; decisions, generic
            // results, and completed external calls are background work.
            if outcome.is_user_message() {
                out.user_facing_actions.push(entry);
            } else {
                out.background_actions.push(entry);
            }

            if let Some(decision) = outcome.branch_request() {
                self.push_branch(agent, &step.action_name, decision, &mut stack);
            }
        }

        out
    }

    /// Extract declared parameters, then overlay the step's fixed inputs.
    async fn step_parameters(
        &self,
        action: &ActionDefinition,
        step: &ActionStep,
        llm_def: Option<&LlmDefinition>,
        ctx: &RunContext,
    ) -> serde_json::Map<String, Value> {
        let mut params =
            extract::extract_parameters(self.llm.as_ref(), llm_def, action, ctx).await;
        params
            .entry("input".to_string())
            .or_insert_with(|| json!(ctx.user_input));

        if let ActionKind::Native = action.kind {
            match Capability::from_name(&action.name) {
                Capability::Respond if !step.prompt.is_empty() => {
                    params.insert("prompt".to_string(), json!(step.prompt));
                }
                Capability::Wait => {
                    if !step.prompt.is_empty() {
                        params.insert("message".to_string(), json!(step.prompt));
                    }
                    if let Some(prompt) =
                        step.wait_prompt.as_deref().filter(|p| !p.is_empty())
                    {
                        params.insert("wait_prompt".to_string(), json!(prompt));
                    }
                }
                Capability::Choice if !step.prompt.is_empty() => {
                    params.insert("validation_criteria".to_string(), json!(step.prompt));
                }
                _ => {}
            }
        }
        params
    }

    async fn run_action(
        &self,
        action: &ActionDefinition,
        params: &serde_json::Map<String, Value>,
        ctx: &RunContext,
        llm_def: Option<&LlmDefinition>,
    ) -> ActionOutcome {
        match action.kind {
            ActionKind::Native => {
                let cap = Capability::from_name(&action.name);
                capability::dispatch(cap, action, params, ctx, self.llm.as_ref(), llm_def)
                    .await
            }
            ActionKind::Custom => self.invoker.invoke(action, params, ctx).await,
        }
    }

    fn push_branch(
        &self,
        agent: &AgentDefinition,
        decision_action: &str,
        decision: Decision,
        stack: &mut Vec<Frame>,
    ) {
        let Some(flow) = agent.conditional_flow_for(decision_action) else {
            // Inert decision: recorded in context, no branch configured.
            debug!(action = %decision_action, "Decision has no conditional flow");
            return;
        };
        let (steps, tag) = match decision {
            Decision::Valid => (&flow.valid_flow, FlowTag::ValidFlow),
            Decision::Invalid => (&flow.invalid_flow, FlowTag::InvalidFlow),
        };
        debug!(
            action = %decision_action,
            branch = decision.next_flow(),
            steps = steps.len(),
            "Entering conditional branch"
        );
        stack.push(Frame::branch(decision_action, tag, steps));
    }

    fn record_skip(
        &self,
        ctx: &mut RunContext,
        out: &mut FlowOutput,
        action_name: &str,
        message: String,
    ) {
        let outcome = ActionOutcome::Generic {
            content: message.clone(),
        };
        ctx.fold(action_name, &outcome);
        out.actions_used.push(action_name.to_string());
        out.background_actions.push(ActionRecord {
            action: action_name.to_string(),
            kind: "skipped".to_string(),
            success: false,
            summary: truncate(&message),
        });
    }
}

/// Build a report record from the freshest conversation entry.
fn record(action_name: &str, outcome: &ActionOutcome, ctx: &RunContext) -> ActionRecord {
    let summary = ctx
        .conversation_history
        .last()
        .map(|entry| truncate(&entry.content))
        .unwrap_or_default();
    ActionRecord {
        action: action_name.to_string(),
        kind: outcome.kind().to_string(),
        success: outcome.success(),
        summary,
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= RECORD_SUMMARY_LEN {
        return text.to_string();
    }
    let mut end = RECORD_SUMMARY_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
