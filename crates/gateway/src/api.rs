//! REST API — configuration CRUD plus the run/continue surface.
//!
//! Endpoints:
//!
//! - `GET    /llms`                        — List LLM definitions
//! - `POST   /llms`                        — Create an LLM definition
//! - `GET    /llms/{id}`                   — Get one LLM definition
//! - `PUT    /llms/{id}`                   — Update an LLM definition
//! - `DELETE /llms/{id}`                   — Delete an LLM definition
//! - `GET    /actions`                     — List actions
//! - `POST   /actions`                     — Create an action
//! - `GET    /actions/native`              — Built-in capability catalog
//! - `POST   /actions/parse-spec`          — Preview an OpenAPI-style document
//! - `GET    /actions/{id}`                — Get one action
//! - `PUT    /actions/{id}`                — Update an action
//! - `DELETE /actions/{id}`                — Delete an action
//! - `POST   /actions/{id}/test`           — Execute one action ad hoc
//! - `POST   /actions/test-by-name/{name}` — Execute one action by name
//! - `POST   /actions/{id}/fix-endpoint`   — Repair a relative endpoint
//! - `GET    /agents`                      — List agents
//! - `POST   /agents`                      — Create an agent
//! - `GET    /agents/{id}`                 — Get one agent
//! - `PUT    /agents/{id}`                 — Update an agent
//! - `DELETE /agents/{id}`                 — Delete an agent
//! - `GET    /agents/{id}/actions`         — The agent's step configuration
//! - `PUT    /agents/{id}/actions`         — Replace the step configuration
//! - `POST   /agents/{id}/run`             — Run the agent
//! - `POST   /agents/{id}/continue`        — Continue a suspended run
//!
//! Credentials never leave this API in cleartext: every read of a
//! definition masks its stored key, and parse-spec previews use
//! placeholder templates instead of the supplied credential.

use crate::{ApiError, SharedState, not_found, unprocessable};
use agentry_core::model::{
    ActionDefinition, ActionStep, ActionUpdate, AgentUpdate, ConditionalFlow, LlmDefinition,
    LlmUpdate, NewActionDefinition, NewAgentDefinition, NewLlmDefinition,
};
use agentry_core::outcome::ActionOutcome;
use agentry_core::redact::mask_credential;
use agentry_engine::RunOutcome;
use agentry_engine::SessionSnapshot;
use agentry_engine::invoke::normalize_endpoint;
use agentry_spec::{SpecDocument, sanitize_document, schema_preview};
use agentry_store::native_catalog;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Build the API router. Merged into the main router at the root.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/llms", get(list_llms).post(create_llm))
        .route(
            "/llms/{id}",
            get(get_llm).put(update_llm).delete(delete_llm),
        )
        .route("/actions", get(list_actions).post(create_action))
        .route("/actions/native", get(native_actions))
        .route("/actions/parse-spec", post(parse_spec))
        .route(
            "/actions/{id}",
            get(get_action).put(update_action).delete(delete_action),
        )
        .route("/actions/{id}/test", post(test_action))
        .route("/actions/test-by-name/{name}", post(test_action_by_name))
        .route("/actions/{id}/fix-endpoint", post(fix_endpoint))
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/{id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route(
            "/agents/{id}/actions",
            get(get_agent_actions).put(put_agent_actions),
        )
        .route("/agents/{id}/run", post(run_agent))
        .route("/agents/{id}/continue", post(continue_agent))
        .with_state(state)
}

// ── Credential masking ──

fn redacted_llm(mut llm: LlmDefinition) -> LlmDefinition {
    llm.api_key = llm.api_key.as_deref().map(mask_credential);
    llm
}

fn redacted_action(mut action: ActionDefinition) -> ActionDefinition {
    action.api_key = action.api_key.as_deref().map(mask_credential);
    action
}

// ── LLM definitions ──

async fn list_llms(
    State(state): State<SharedState>,
) -> Result<Json<Vec<LlmDefinition>>, ApiError> {
    let llms = state.store.list_llms().await?;
    Ok(Json(llms.into_iter().map(redacted_llm).collect()))
}

async fn create_llm(
    State(state): State<SharedState>,
    Json(payload): Json<NewLlmDefinition>,
) -> Result<(StatusCode, Json<LlmDefinition>), ApiError> {
    let created = state.store.create_llm(payload).await?;
    info!(name = %created.name, "LLM definition created");
    Ok((StatusCode::CREATED, Json(redacted_llm(created))))
}

async fn get_llm(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<LlmDefinition>, ApiError> {
    let llm = state
        .store
        .llm_by_id(id)
        .await?
        .ok_or_else(|| not_found("LLM definition"))?;
    Ok(Json(redacted_llm(llm)))
}

async fn update_llm(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<LlmUpdate>,
) -> Result<Json<LlmDefinition>, ApiError> {
    let updated = state.store.update_llm(id, payload).await?;
    Ok(Json(redacted_llm(updated)))
}

async fn delete_llm(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_llm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Action definitions ──

async fn list_actions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ActionDefinition>>, ApiError> {
    let actions = state.store.list_actions().await?;
    Ok(Json(actions.into_iter().map(redacted_action).collect()))
}

async fn create_action(
    State(state): State<SharedState>,
    Json(payload): Json<NewActionDefinition>,
) -> Result<(StatusCode, Json<ActionDefinition>), ApiError> {
    let created = state.store.create_action(payload).await?;
    info!(name = %created.name, "Action definition created");
    Ok((StatusCode::CREATED, Json(redacted_action(created))))
}

#[derive(Serialize)]
struct NativeActionDto {
    name: &'static str,
    description: &'static str,
    config: serde_json::Map<String, Value>,
}

async fn native_actions() -> Json<Vec<NativeActionDto>> {
    Json(
        native_catalog()
            .into_iter()
            .map(|(name, description, config)| NativeActionDto {
                name,
                description,
                config,
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct ParseSpecRequest {
    spec_document: String,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ParseSpecResponse {
    endpoint: Option<String>,
    method: Option<String>,
    parameters: std::collections::BTreeMap<String, agentry_core::model::ParameterSpec>,
    headers: std::collections::BTreeMap<String, String>,
    response_schema: Option<Value>,
    sanitized_document: String,
}

async fn parse_spec(
    Json(payload): Json<ParseSpecRequest>,
) -> Result<Json<ParseSpecResponse>, ApiError> {
    let doc = SpecDocument::parse(&payload.spec_document).map_err(|e| {
        unprocessable(format!("Could not parse spec document: {e}"))
    })?;
    // The preview keeps credential placeholders; the real key is only
    // injected at invocation time.
    Ok(Json(ParseSpecResponse {
        endpoint: doc.endpoint(),
        method: doc.method(),
        parameters: doc.parameters(),
        headers: doc.security_headers(None),
        response_schema: doc.response_schema().map(|s| schema_preview(&s)),
        sanitized_document: sanitize_document(&payload.spec_document, payload.api_key.as_deref()),
    }))
}

async fn get_action(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<ActionDefinition>, ApiError> {
    let action = state
        .store
        .action_by_id(id)
        .await?
        .ok_or_else(|| not_found("Action definition"))?;
    Ok(Json(redacted_action(action)))
}

async fn update_action(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<ActionUpdate>,
) -> Result<Json<ActionDefinition>, ApiError> {
    let updated = state.store.update_action(id, payload).await?;
    Ok(Json(redacted_action(updated)))
}

async fn delete_action(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_action(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct TestActionRequest {
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
    /// Optional model to use for capabilities that call one.
    #[serde(default)]
    llm_id: Option<i64>,
}

async fn test_action(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<TestActionRequest>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let action = state
        .store
        .action_by_id(id)
        .await?
        .ok_or_else(|| not_found("Action definition"))?;
    run_test(&state, action, payload).await
}

async fn test_action_by_name(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(payload): Json<TestActionRequest>,
) -> Result<Json<ActionOutcome>, ApiError> {
    let action = state
        .store
        .action_by_name_opt(&name)
        .await?
        .ok_or_else(|| not_found("Action definition"))?;
    run_test(&state, action, payload).await
}

async fn run_test(
    state: &SharedState,
    action: ActionDefinition,
    payload: TestActionRequest,
) -> Result<Json<ActionOutcome>, ApiError> {
    let llm_def = match payload.llm_id {
        Some(id) => state.store.llm_by_id(id).await?,
        None => None,
    };
    let outcome = state
        .engine
        .test_action(&action, payload.parameters, llm_def.as_ref())
        .await;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct FixEndpointResponse {
    endpoint: String,
    changed: bool,
}

async fn fix_endpoint(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<FixEndpointResponse>, ApiError> {
    let action = state
        .store
        .action_by_id(id)
        .await?
        .ok_or_else(|| not_found("Action definition"))?;
    let Some(endpoint) = action.endpoint.clone() else {
        return Err(unprocessable("Action has no endpoint to repair"));
    };

    let repaired = normalize_endpoint(&action.name, &endpoint);
    let changed = repaired != endpoint;
    if changed {
        state
            .store
            .update_action(
                id,
                ActionUpdate {
                    endpoint: Some(repaired.clone()),
                    ..Default::default()
                },
            )
            .await?;
        info!(action = %action.name, endpoint = %repaired, "Endpoint repaired");
    }
    Ok(Json(FixEndpointResponse {
        endpoint: repaired,
        changed,
    }))
}

// ── Agent definitions ──

async fn list_agents(
    State(state): State<SharedState>,
) -> Result<Json<Vec<agentry_core::model::AgentDefinition>>, ApiError> {
    Ok(Json(state.store.list_agents().await?))
}

async fn create_agent(
    State(state): State<SharedState>,
    Json(payload): Json<NewAgentDefinition>,
) -> Result<(StatusCode, Json<agentry_core::model::AgentDefinition>), ApiError> {
    let created = state.store.create_agent(payload).await?;
    info!(name = %created.name, "Agent definition created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_agent(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<agentry_core::model::AgentDefinition>, ApiError> {
    let agent = state
        .store
        .agent_by_id(id)
        .await?
        .ok_or_else(|| not_found("Agent definition"))?;
    Ok(Json(agent))
}

async fn update_agent(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<AgentUpdate>,
) -> Result<Json<agentry_core::model::AgentDefinition>, ApiError> {
    Ok(Json(state.store.update_agent(id, payload).await?))
}

async fn delete_agent(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_agent(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AgentActionsDto {
    steps: Vec<ActionStep>,
    #[serde(default)]
    conditional_flows: Vec<ConditionalFlow>,
}

/// Step configuration resolved against the action store. Dangling
/// references are reported, never treated as an error: the run path
/// skips them the same way.
#[derive(Serialize)]
struct AgentActionsView {
    steps: Vec<ActionStep>,
    conditional_flows: Vec<ConditionalFlow>,
    missing_actions: Vec<String>,
}

async fn resolve_actions_view(
    state: &SharedState,
    steps: Vec<ActionStep>,
    conditional_flows: Vec<ConditionalFlow>,
) -> Result<AgentActionsView, ApiError> {
    let mut missing_actions = Vec::new();
    let referenced: Vec<&String> = steps
        .iter()
        .map(|s| &s.action_name)
        .chain(
            conditional_flows
                .iter()
                .flat_map(|f| f.valid_flow.iter().chain(f.invalid_flow.iter()))
                .map(|s| &s.action_name),
        )
        .collect();
    for name in referenced {
        if missing_actions.contains(name) {
            continue;
        }
        if state.store.action_by_name_opt(name).await?.is_none() {
            missing_actions.push(name.clone());
        }
    }
    Ok(AgentActionsView {
        steps,
        conditional_flows,
        missing_actions,
    })
}

async fn get_agent_actions(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<AgentActionsView>, ApiError> {
    let agent = state
        .store
        .agent_by_id(id)
        .await?
        .ok_or_else(|| not_found("Agent definition"))?;
    let view = resolve_actions_view(&state, agent.steps, agent.conditional_flows).await?;
    Ok(Json(view))
}

async fn put_agent_actions(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<AgentActionsDto>,
) -> Result<Json<AgentActionsView>, ApiError> {
    let updated = state
        .store
        .update_agent(
            id,
            AgentUpdate {
                steps: Some(payload.steps),
                conditional_flows: Some(payload.conditional_flows),
                ..Default::default()
            },
        )
        .await?;
    let view = resolve_actions_view(&state, updated.steps, updated.conditional_flows).await?;
    Ok(Json(view))
}

// ── Run / continue ──

#[derive(Deserialize)]
struct RunRequest {
    message: String,
}

async fn run_agent(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunOutcome>, ApiError> {
    let agent = state
        .store
        .agent_by_id(id)
        .await?
        .ok_or_else(|| not_found("Agent definition"))?;
    if !agent.is_active {
        return Err(unprocessable("Agent is not active"));
    }
    let llm_def = state.store.llm_by_id(agent.llm_id).await?;
    if llm_def.is_none() {
        return Ok(Json(RunOutcome::Error {
            error: format!(
                "Agent '{}' references a language model definition that no longer exists",
                agent.name
            ),
        }));
    }
    info!(agent = %agent.name, "Run requested");
    let outcome = state
        .engine
        .run(&agent, llm_def.as_ref(), &payload.message)
        .await;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ContinueRequest {
    #[serde(default)]
    message: String,
    session: SessionSnapshot,
}

async fn continue_agent(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<ContinueRequest>,
) -> Result<Json<RunOutcome>, ApiError> {
    let agent = state
        .store
        .agent_by_id(id)
        .await?
        .ok_or_else(|| not_found("Agent definition"))?;
    let llm_def = state.store.llm_by_id(agent.llm_id).await?;
    if llm_def.is_none() {
        return Ok(Json(RunOutcome::Error {
            error: format!(
                "Agent '{}' references a language model definition that no longer exists",
                agent.name
            ),
        }));
    }
    info!(agent = %agent.name, "Continuation requested");
    let outcome = state
        .engine
        .resume(&agent, llm_def.as_ref(), payload.session, &payload.message)
        .await;
    Ok(Json(outcome))
}
