//! The agent runner: whole-run orchestration over the flow executor.
//!
//! `run` starts a fresh context, `resume` continues a suspended one from
//! a caller-held snapshot. The runtime keeps no session state of its
//! own; everything a resumption needs travels in the snapshot.

use crate::Engine;
use crate::capability;
use crate::flow::{ActionRecord, FlowOutput, ResumePoint};
use agentry_core::context::{ContextSummary, RunContext};
use agentry_core::model::{
    ActionDefinition, ActionKind, AgentDefinition, Capability, LlmDefinition,
};
use agentry_core::outcome::ActionOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Caller-held continuation state for a suspended run. Opaque to the
/// caller; posted back verbatim to continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub context: RunContext,
    pub actions_used: Vec<String>,
    pub resume: ResumePoint,
}

/// Result of a run or resumption.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    /// The run paused on a Wait step and can be continued.
    Suspended {
        wait_required: bool,
        wait_message: String,
        wait_prompt: String,
        actions_used: Vec<String>,
        session: SessionSnapshot,
    },
    /// The run finished with a user-facing answer.
    Completed {
        response: String,
        actions_used: Vec<String>,
        background_actions: Vec<ActionRecord>,
        user_facing_actions: Vec<ActionRecord>,
        context_summary: ContextSummary,
    },
    /// The run ended without executing to an answer (nothing user-facing
    /// was reachable, or a resumption was refused).
    Message {
        message: String,
        actions_used: Vec<String>,
        context_summary: ContextSummary,
    },
    Error {
        error: String,
    },
}

impl Engine {
    /// Execute an agent against fresh user input.
    pub async fn run(
        &self,
        agent: &AgentDefinition,
        llm_def: Option<&LlmDefinition>,
        user_input: &str,
    ) -> RunOutcome {
        if !has_user_surface(agent) {
            return RunOutcome::Message {
                message: format!(
                    "Agent '{}' has no Respond or Wait step in any of its flows, \
                     so a run could never produce an answer. Add one and retry.",
                    agent.name
                ),
                actions_used: Vec::new(),
                context_summary: RunContext::new(user_input, &agent.name).summary(),
            };
        }

        info!(agent = %agent.name, "Starting agent run");
        let mut ctx = RunContext::new(user_input, &agent.name);
        ctx.available_actions = configured_actions(agent);
        let out = self.execute_flow(agent, llm_def, &mut ctx, 0).await;
        finish(ctx, out, Vec::new())
    }

    /// Continue a suspended run with additional user input.
    pub async fn resume(
        &self,
        agent: &AgentDefinition,
        llm_def: Option<&LlmDefinition>,
        snapshot: SessionSnapshot,
        new_input: &str,
    ) -> RunOutcome {
        let next_index = match snapshot.resume {
            ResumePoint::Main { next_index } => next_index,
            ResumePoint::Branch { .. } => {
                // Branch positions are not re-enterable: the decision that
                // selected the branch was made against the old input.
                return RunOutcome::Message {
                    message: "This run paused inside a conditional branch and \
                              cannot be continued; start a new run with the \
                              complete request."
                        .to_string(),
                    actions_used: snapshot.actions_used,
                    context_summary: snapshot.context.summary(),
                };
            }
        };

        info!(agent = %agent.name, next_index, "Resuming agent run");
        let mut ctx = snapshot.context;
        ctx.extend_input(new_input);
        let out = self.execute_flow(agent, llm_def, &mut ctx, next_index).await;
        finish(ctx, out, snapshot.actions_used)
    }

    /// Execute a single action ad hoc, outside any agent flow. Used by
    /// the action-test endpoints.
    pub async fn test_action(
        &self,
        action: &ActionDefinition,
        params: serde_json::Map<String, Value>,
        llm_def: Option<&LlmDefinition>,
    ) -> ActionOutcome {
        let input = params
            .get("input")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let ctx = RunContext::new(input, "action-test");
        match action.kind {
            ActionKind::Native => {
                let cap = Capability::from_name(&action.name);
                capability::dispatch(cap, action, &params, &ctx, self.llm.as_ref(), llm_def)
                    .await
            }
            ActionKind::Custom => self.invoker.invoke(action, &params, &ctx).await,
        }
    }
}

/// Does any flow of this agent contain a step that can surface to the
/// user (a terminal answer or a suspension)?
fn has_user_surface(agent: &AgentDefinition) -> bool {
    let surfaces = |name: &str| {
        let cap = Capability::from_name(name);
        cap.is_terminal() || cap.is_suspending()
    };
    agent.steps.iter().any(|s| surfaces(&s.action_name))
        || agent.conditional_flows.iter().any(|flow| {
            flow.valid_flow
                .iter()
                .chain(flow.invalid_flow.iter())
                .any(|s| surfaces(&s.action_name))
        })
}

/// Unique action names across the main list and every conditional flow,
/// in declaration order.
fn configured_actions(agent: &AgentDefinition) -> Vec<String> {
    let mut names = Vec::new();
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };
    for step in &agent.steps {
        push(&step.action_name);
    }
    for flow in &agent.conditional_flows {
        for step in flow.valid_flow.iter().chain(flow.invalid_flow.iter()) {
            push(&step.action_name);
        }
    }
    names
}

fn finish(ctx: RunContext, out: FlowOutput, prior_actions: Vec<String>) -> RunOutcome {
    let mut actions_used = prior_actions;
    actions_used.extend(out.actions_used);

    if let Some(suspension) = out.suspension {
        return RunOutcome::Suspended {
            wait_required: true,
            wait_message: suspension.message,
            wait_prompt: suspension.prompt,
            actions_used: actions_used.clone(),
            session: SessionSnapshot {
                context: ctx,
                actions_used,
                resume: suspension.resume,
            },
        };
    }

    // Freshest terminal answer wins.
    let response = ctx
        .conversation_history
        .iter()
        .rev()
        .find(|entry| entry.kind == "response")
        .map(|entry| entry.content.clone());

    match response {
        Some(response) => RunOutcome::Completed {
            response,
            actions_used,
            background_actions: out.background_actions,
            user_facing_actions: out.user_facing_actions,
            context_summary: ctx.summary(),
        },
        None => RunOutcome::Message {
            message: "The configured steps completed without producing a direct \
                      answer."
                .to_string(),
            actions_used,
            context_summary: ctx.summary(),
        },
    }
}
