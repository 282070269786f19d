//! `agentry serve` — assemble the engine and start the HTTP gateway.

use agentry_config::AppConfig;
use agentry_engine::{Engine, Invoker};
use agentry_gateway::AppState;
use agentry_providers::LlmClient;
use agentry_store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let port = port.unwrap_or(config.server.port);

    let store = Arc::new(SqliteStore::new(&config.database.path).await?);
    let seeded = store.seed_native_actions().await?;
    if seeded > 0 {
        info!("Seeded {seeded} built-in actions");
    }

    let llm = LlmClient::new(Duration::from_secs(config.http.llm_timeout_secs))?;
    let invoker = Invoker::new(
        reqwest::Client::new(),
        Duration::from_secs(config.http.action_timeout_secs),
    );
    let engine = Engine::new(store.clone(), Arc::new(llm), invoker);

    let state = Arc::new(AppState {
        store,
        engine,
    });

    agentry_gateway::serve(&config.server.host, port, state, config.server.cors).await?;
    Ok(())
}
