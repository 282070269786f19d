//! SQLite configuration store.
//!
//! One database file, three tables: `llm_definitions`,
//! `action_definitions`, `agent_definitions`. Structured fields
//! (parameters, steps, conditional flows, configs) are stored as JSON
//! text; timestamps as RFC 3339 text. Names are unique per table and
//! serve as the human-facing key; agents additionally hold a foreign
//! key to their language model.
//!
//! Credentials never reach the `spec_document` column in cleartext:
//! create and update paths run the document through the sanitizer
//! before binding it.

use agentry_core::catalog::ActionCatalog;
use agentry_core::error::StoreError;
use agentry_core::model::{
    ActionDefinition, ActionKind, ActionUpdate, AgentDefinition, AgentUpdate, LlmDefinition,
    LlmUpdate, NewActionDefinition, NewAgentDefinition, NewLlmDefinition, ProviderKind,
};
use agentry_spec::sanitize_document;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// The production configuration store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    /// Pass `"sqlite::memory:"` for an ephemeral database in tests.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Configuration store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS llm_definitions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                name           TEXT UNIQUE NOT NULL,
                provider       TEXT NOT NULL,
                api_key        TEXT,
                base_url       TEXT,
                model_name     TEXT NOT NULL,
                context_window INTEGER NOT NULL DEFAULT 4096,
                max_tokens     INTEGER NOT NULL DEFAULT 1000,
                temperature    REAL NOT NULL DEFAULT 0.1,
                is_active      INTEGER NOT NULL DEFAULT 1,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("llm_definitions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_definitions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT UNIQUE NOT NULL,
                description     TEXT NOT NULL DEFAULT '',
                endpoint        TEXT,
                method          TEXT,
                parameters      TEXT NOT NULL DEFAULT '{}',
                headers         TEXT NOT NULL DEFAULT '{}',
                kind            TEXT NOT NULL,
                config          TEXT NOT NULL DEFAULT '{}',
                response_schema TEXT,
                spec_document   TEXT,
                api_key         TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("action_definitions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_definitions (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                name              TEXT UNIQUE NOT NULL,
                description       TEXT NOT NULL DEFAULT '',
                system_prompt     TEXT NOT NULL DEFAULT '',
                llm_id            INTEGER NOT NULL REFERENCES llm_definitions(id),
                steps             TEXT NOT NULL DEFAULT '[]',
                conditional_flows TEXT NOT NULL DEFAULT '[]',
                config            TEXT NOT NULL DEFAULT '{}',
                is_active         INTEGER NOT NULL DEFAULT 1,
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_definitions table: {e}")))?;

        debug!("Store migrations complete");
        Ok(())
    }

    /// Insert the built-in capability actions that are missing. Existing
    /// rows (including user-modified ones) are left untouched. Returns
    /// the number of rows inserted.
    pub async fn seed_native_actions(&self) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for (name, description, config) in native_catalog() {
            if self.action_by_name_opt(name).await?.is_some() {
                continue;
            }
            self.create_action(NewActionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                endpoint: None,
                method: None,
                parameters: Default::default(),
                headers: Default::default(),
                kind: ActionKind::Native,
                config,
                response_schema: None,
                spec_document: None,
                api_key: None,
            })
            .await?;
            inserted += 1;
        }
        if inserted > 0 {
            info!(inserted, "Seeded built-in actions");
        }
        Ok(inserted)
    }

    // ── LLM definitions ──

    pub async fn create_llm(&self, new: NewLlmDefinition) -> Result<LlmDefinition, StoreError> {
        if self.llm_by_name(&new.name).await?.is_some() {
            return Err(StoreError::Duplicate {
                kind: "LLM",
                name: new.name,
            });
        }
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO llm_definitions
                (name, provider, api_key, base_url, model_name, context_window,
                 max_tokens, temperature, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)
            "#,
        )
        .bind(&new.name)
        .bind(new.provider.as_str())
        .bind(&new.api_key)
        .bind(&new.base_url)
        .bind(&new.model_name)
        .bind(new.context_window)
        .bind(new.max_tokens)
        .bind(new.temperature)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT llm: {e}")))?;

        debug!(name = %new.name, "Created LLM definition");
        self.llm_required(result.last_insert_rowid()).await
    }

    pub async fn list_llms(&self) -> Result<Vec<LlmDefinition>, StoreError> {
        let rows = sqlx::query("SELECT * FROM llm_definitions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT llms: {e}")))?;
        rows.iter().map(row_to_llm).collect()
    }

    pub async fn llm_by_id(&self, id: i64) -> Result<Option<LlmDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM llm_definitions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT llm by id: {e}")))?;
        row.as_ref().map(row_to_llm).transpose()
    }

    pub async fn llm_by_name(&self, name: &str) -> Result<Option<LlmDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM llm_definitions WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT llm by name: {e}")))?;
        row.as_ref().map(row_to_llm).transpose()
    }

    pub async fn update_llm(
        &self,
        id: i64,
        update: LlmUpdate,
    ) -> Result<LlmDefinition, StoreError> {
        let mut current = self.llm_required(id).await?;

        if let Some(name) = update.name {
            if name != current.name && self.llm_by_name(&name).await?.is_some() {
                return Err(StoreError::Duplicate { kind: "LLM", name });
            }
            current.name = name;
        }
        if let Some(provider) = update.provider {
            current.provider = provider;
        }
        if let Some(api_key) = update.api_key {
            current.api_key = Some(api_key);
        }
        if let Some(base_url) = update.base_url {
            current.base_url = Some(base_url);
        }
        if let Some(model_name) = update.model_name {
            current.model_name = model_name;
        }
        if let Some(context_window) = update.context_window {
            current.context_window = context_window;
        }
        if let Some(max_tokens) = update.max_tokens {
            current.max_tokens = max_tokens;
        }
        if let Some(temperature) = update.temperature {
            current.temperature = temperature;
        }
        if let Some(is_active) = update.is_active {
            current.is_active = is_active;
        }

        sqlx::query(
            r#"
            UPDATE llm_definitions SET
                name = ?1, provider = ?2, api_key = ?3, base_url = ?4,
                model_name = ?5, context_window = ?6, max_tokens = ?7,
                temperature = ?8, is_active = ?9, updated_at = ?10
            WHERE id = ?11
            "#,
        )
        .bind(&current.name)
        .bind(current.provider.as_str())
        .bind(&current.api_key)
        .bind(&current.base_url)
        .bind(&current.model_name)
        .bind(current.context_window)
        .bind(current.max_tokens)
        .bind(current.temperature)
        .bind(current.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE llm: {e}")))?;

        self.llm_required(id).await
    }

    pub async fn delete_llm(&self, id: i64) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM agent_definitions WHERE llm_id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("SELECT agents by llm: {e}")))?;
        let in_use: i64 = get(&row, "n")?;
        if in_use > 0 {
            return Err(StoreError::InvalidReference(format!(
                "{in_use} agent definition(s) still reference LLM id {id}"
            )));
        }

        let result = sqlx::query("DELETE FROM llm_definitions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE llm: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "LLM",
                name: id.to_string(),
            });
        }
        Ok(())
    }

    async fn llm_required(&self, id: i64) -> Result<LlmDefinition, StoreError> {
        self.llm_by_id(id).await?.ok_or(StoreError::NotFound {
            kind: "LLM",
            name: id.to_string(),
        })
    }

    // ── Action definitions ──

    pub async fn create_action(
        &self,
        new: NewActionDefinition,
    ) -> Result<ActionDefinition, StoreError> {
        if self.action_by_name_opt(&new.name).await?.is_some() {
            return Err(StoreError::Duplicate {
                kind: "Action",
                name: new.name,
            });
        }
        let spec_document = new
            .spec_document
            .as_deref()
            .map(|doc| sanitize_document(doc, new.api_key.as_deref()));
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO action_definitions
                (name, description, endpoint, method, parameters, headers, kind,
                 config, response_schema, spec_document, api_key, is_active,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12, ?12)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.endpoint)
        .bind(&new.method)
        .bind(to_json_text(&new.parameters)?)
        .bind(to_json_text(&new.headers)?)
        .bind(kind_str(new.kind))
        .bind(to_json_text(&new.config)?)
        .bind(new.response_schema.as_ref().map(to_json_text).transpose()?)
        .bind(&spec_document)
        .bind(&new.api_key)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT action: {e}")))?;

        debug!(name = %new.name, "Created action definition");
        self.action_required(result.last_insert_rowid()).await
    }

    pub async fn list_actions(&self) -> Result<Vec<ActionDefinition>, StoreError> {
        let rows = sqlx::query("SELECT * FROM action_definitions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT actions: {e}")))?;
        rows.iter().map(row_to_action).collect()
    }

    pub async fn action_by_id(&self, id: i64) -> Result<Option<ActionDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM action_definitions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT action by id: {e}")))?;
        row.as_ref().map(row_to_action).transpose()
    }

    pub async fn action_by_name_opt(
        &self,
        name: &str,
    ) -> Result<Option<ActionDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM action_definitions WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT action by name: {e}")))?;
        row.as_ref().map(row_to_action).transpose()
    }

    pub async fn update_action(
        &self,
        id: i64,
        update: ActionUpdate,
    ) -> Result<ActionDefinition, StoreError> {
        let mut current = self.action_required(id).await?;

        if let Some(name) = update.name {
            if name != current.name && self.action_by_name_opt(&name).await?.is_some() {
                return Err(StoreError::Duplicate {
                    kind: "Action",
                    name,
                });
            }
            current.name = name;
        }
        if let Some(description) = update.description {
            current.description = description;
        }
        if let Some(endpoint) = update.endpoint {
            current.endpoint = Some(endpoint);
        }
        if let Some(method) = update.method {
            current.method = Some(method);
        }
        if let Some(parameters) = update.parameters {
            current.parameters = parameters;
        }
        if let Some(headers) = update.headers {
            current.headers = headers;
        }
        if let Some(config) = update.config {
            current.config = config;
        }
        if let Some(response_schema) = update.response_schema {
            current.response_schema = Some(response_schema);
        }
        if let Some(api_key) = update.api_key {
            current.api_key = Some(api_key);
        }
        if let Some(spec_document) = update.spec_document {
            current.spec_document = Some(spec_document);
        }
        if let Some(is_active) = update.is_active {
            current.is_active = is_active;
        }

        // Re-sanitize on every update: a new credential or a new document
        // must never leave cleartext behind.
        let spec_document = current
            .spec_document
            .as_deref()
            .map(|doc| sanitize_document(doc, current.api_key.as_deref()));

        sqlx::query(
            r#"
            UPDATE action_definitions SET
                name = ?1, description = ?2, endpoint = ?3, method = ?4,
                parameters = ?5, headers = ?6, config = ?7, response_schema = ?8,
                spec_document = ?9, api_key = ?10, is_active = ?11, updated_at = ?12
            WHERE id = ?13
            "#,
        )
        .bind(&current.name)
        .bind(&current.description)
        .bind(&current.endpoint)
        .bind(&current.method)
        .bind(to_json_text(&current.parameters)?)
        .bind(to_json_text(&current.headers)?)
        .bind(to_json_text(&current.config)?)
        .bind(
            current
                .response_schema
                .as_ref()
                .map(to_json_text)
                .transpose()?,
        )
        .bind(&spec_document)
        .bind(&current.api_key)
        .bind(current.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE action: {e}")))?;

        self.action_required(id).await
    }

    pub async fn delete_action(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM action_definitions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE action: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "Action",
                name: id.to_string(),
            });
        }
        Ok(())
    }

    async fn action_required(&self, id: i64) -> Result<ActionDefinition, StoreError> {
        self.action_by_id(id).await?.ok_or(StoreError::NotFound {
            kind: "Action",
            name: id.to_string(),
        })
    }

    // ── Agent definitions ──

    pub async fn create_agent(
        &self,
        new: NewAgentDefinition,
    ) -> Result<AgentDefinition, StoreError> {
        if self.agent_by_name(&new.name).await?.is_some() {
            return Err(StoreError::Duplicate {
                kind: "Agent",
                name: new.name,
            });
        }
        if self.llm_by_id(new.llm_id).await?.is_none() {
            return Err(StoreError::InvalidReference(format!(
                "No LLM definition with id {}",
                new.llm_id
            )));
        }
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO agent_definitions
                (name, description, system_prompt, llm_id, steps,
                 conditional_flows, config, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.system_prompt)
        .bind(new.llm_id)
        .bind(to_json_text(&new.steps)?)
        .bind(to_json_text(&new.conditional_flows)?)
        .bind(to_json_text(&new.config)?)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT agent: {e}")))?;

        debug!(name = %new.name, "Created agent definition");
        self.agent_required(result.last_insert_rowid()).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentDefinition>, StoreError> {
        let rows = sqlx::query("SELECT * FROM agent_definitions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT agents: {e}")))?;
        rows.iter().map(row_to_agent).collect()
    }

    pub async fn agent_by_id(&self, id: i64) -> Result<Option<AgentDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_definitions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT agent by id: {e}")))?;
        row.as_ref().map(row_to_agent).transpose()
    }

    pub async fn agent_by_name(&self, name: &str) -> Result<Option<AgentDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_definitions WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("SELECT agent by name: {e}")))?;
        row.as_ref().map(row_to_agent).transpose()
    }

    pub async fn update_agent(
        &self,
        id: i64,
        update: AgentUpdate,
    ) -> Result<AgentDefinition, StoreError> {
        let mut current = self.agent_required(id).await?;

        if let Some(name) = update.name {
            if name != current.name && self.agent_by_name(&name).await?.is_some() {
                return Err(StoreError::Duplicate { kind: "Agent", name });
            }
            current.name = name;
        }
        if let Some(description) = update.description {
            current.description = description;
        }
        if let Some(system_prompt) = update.system_prompt {
            current.system_prompt = system_prompt;
        }
        if let Some(llm_id) = update.llm_id {
            if self.llm_by_id(llm_id).await?.is_none() {
                return Err(StoreError::InvalidReference(format!(
                    "No LLM definition with id {llm_id}"
                )));
            }
            current.llm_id = llm_id;
        }
        if let Some(steps) = update.steps {
            current.steps = steps;
        }
        if let Some(conditional_flows) = update.conditional_flows {
            current.conditional_flows = conditional_flows;
        }
        if let Some(config) = update.config {
            current.config = config;
        }
        if let Some(is_active) = update.is_active {
            current.is_active = is_active;
        }

        sqlx::query(
            r#"
            UPDATE agent_definitions SET
                name = ?1, description = ?2, system_prompt = ?3, llm_id = ?4,
                steps = ?5, conditional_flows = ?6, config = ?7, is_active = ?8,
                updated_at = ?9
            WHERE id = ?10
            "#,
        )
        .bind(&current.name)
        .bind(&current.description)
        .bind(&current.system_prompt)
        .bind(current.llm_id)
        .bind(to_json_text(&current.steps)?)
        .bind(to_json_text(&current.conditional_flows)?)
        .bind(to_json_text(&current.config)?)
        .bind(current.is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE agent: {e}")))?;

        self.agent_required(id).await
    }

    pub async fn delete_agent(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM agent_definitions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE agent: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "Agent",
                name: id.to_string(),
            });
        }
        Ok(())
    }

    async fn agent_required(&self, id: i64) -> Result<AgentDefinition, StoreError> {
        self.agent_by_id(id).await?.ok_or(StoreError::NotFound {
            kind: "Agent",
            name: id.to_string(),
        })
    }
}

#[async_trait]
impl ActionCatalog for SqliteStore {
    async fn action_by_name(&self, name: &str) -> Result<Option<ActionDefinition>, StoreError> {
        self.action_by_name_opt(name).await
    }
}

// ── Row mapping ──

fn row_to_llm(row: &sqlx::sqlite::SqliteRow) -> Result<LlmDefinition, StoreError> {
    Ok(LlmDefinition {
        id: get(row, "id")?,
        name: get(row, "name")?,
        provider: provider_from_str(&get::<String>(row, "provider")?),
        api_key: get(row, "api_key")?,
        base_url: get(row, "base_url")?,
        model_name: get(row, "model_name")?,
        context_window: get(row, "context_window")?,
        max_tokens: get(row, "max_tokens")?,
        temperature: get(row, "temperature")?,
        is_active: get(row, "is_active")?,
        created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        updated_at: parse_timestamp(&get::<String>(row, "updated_at")?),
    })
}

fn row_to_action(row: &sqlx::sqlite::SqliteRow) -> Result<ActionDefinition, StoreError> {
    Ok(ActionDefinition {
        id: get(row, "id")?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        endpoint: get(row, "endpoint")?,
        method: get(row, "method")?,
        parameters: from_json_text(&get::<String>(row, "parameters")?),
        headers: from_json_text(&get::<String>(row, "headers")?),
        kind: kind_from_str(&get::<String>(row, "kind")?),
        config: from_json_text(&get::<String>(row, "config")?),
        response_schema: get::<Option<String>>(row, "response_schema")?
            .and_then(|text| serde_json::from_str(&text).ok()),
        spec_document: get(row, "spec_document")?,
        api_key: get(row, "api_key")?,
        is_active: get(row, "is_active")?,
        created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        updated_at: parse_timestamp(&get::<String>(row, "updated_at")?),
    })
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentDefinition, StoreError> {
    Ok(AgentDefinition {
        id: get(row, "id")?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        system_prompt: get(row, "system_prompt")?,
        llm_id: get(row, "llm_id")?,
        steps: from_json_text(&get::<String>(row, "steps")?),
        conditional_flows: from_json_text(&get::<String>(row, "conditional_flows")?),
        config: from_json_text(&get::<String>(row, "config")?),
        is_active: get(row, "is_active")?,
        created_at: parse_timestamp(&get::<String>(row, "created_at")?),
        updated_at: parse_timestamp(&get::<String>(row, "updated_at")?),
    })
}

fn get<'r, T>(row: &'r sqlx::sqlite::SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("JSON encode: {e}")))
}

fn from_json_text<T: serde::de::DeserializeOwned + Default>(text: &str) -> T {
    serde_json::from_str(text).unwrap_or_default()
}

fn kind_str(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Native => "native",
        ActionKind::Custom => "custom",
    }
}

fn kind_from_str(text: &str) -> ActionKind {
    match text {
        "native" => ActionKind::Native,
        _ => ActionKind::Custom,
    }
}

fn provider_from_str(text: &str) -> ProviderKind {
    match text {
        "openai" => ProviderKind::Openai,
        "lmstudio" => ProviderKind::Lmstudio,
        "ollama" => ProviderKind::Ollama,
        _ => ProviderKind::Custom,
    }
}

/// The built-in capability catalog: name, description, default config.
pub fn native_catalog() -> Vec<(&'static str, &'static str, serde_json::Map<String, serde_json::Value>)>
{
    let config = |value: serde_json::Value| match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    vec![
        (
            "Thinking",
            "Analyze the request step by step before acting",
            config(json!({
                "prompt": "Analyze the following request step by step and note \
                           what information is needed to fulfil it:\n\n{input}"
            })),
        ),
        (
            "Respond",
            "Generate the final user-facing response",
            config(json!({})),
        ),
        (
            "Wait",
            "Pause the run and ask the user for more input",
            config(json!({
                "message": "I need more information to continue.",
                "wait_prompt": "Please provide additional details."
            })),
        ),
        (
            "Choice",
            "Evaluate the request against validation criteria and branch",
            config(json!({
                "validation_criteria": "the request is valid and actionable"
            })),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentry_core::model::{ActionStep, ConditionalFlow, FlowTag};
    use agentry_spec::CREDENTIAL_PLACEHOLDER;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn new_llm(name: &str) -> NewLlmDefinition {
        NewLlmDefinition {
            name: name.into(),
            provider: ProviderKind::Openai,
            api_key: Some("sk-test".into()),
            base_url: None,
            model_name: "gpt-4o-mini".into(),
            context_window: 4096,
            max_tokens: 1000,
            temperature: 0.1,
        }
    }

    fn new_action(name: &str) -> NewActionDefinition {
        NewActionDefinition {
            name: name.into(),
            description: "test action".into(),
            endpoint: Some("https://api.example.com/items/{id}".into()),
            method: Some("GET".into()),
            parameters: Default::default(),
            headers: Default::default(),
            kind: ActionKind::Custom,
            config: serde_json::Map::new(),
            response_schema: None,
            spec_document: None,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_llm() {
        let store = test_store().await;
        let created = store.create_llm(new_llm("primary")).await.unwrap();
        assert!(created.id > 0);
        assert!(created.is_active);

        let fetched = store.llm_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "primary");
        assert_eq!(fetched.provider, ProviderKind::Openai);
        assert_eq!(fetched.context_window, 4096);

        let by_name = store.llm_by_name("primary").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
    }

    #[tokio::test]
    async fn duplicate_llm_name_rejected() {
        let store = test_store().await;
        store.create_llm(new_llm("primary")).await.unwrap();
        let err = store.create_llm(new_llm("primary")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { kind: "LLM", .. }));
    }

    #[tokio::test]
    async fn partial_llm_update_leaves_other_fields() {
        let store = test_store().await;
        let created = store.create_llm(new_llm("primary")).await.unwrap();

        let updated = store
            .update_llm(
                created.id,
                LlmUpdate {
                    temperature: Some(0.9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "primary");
        assert_eq!(updated.model_name, "gpt-4o-mini");
        assert!((updated.temperature - 0.9).abs() < f64::EPSILON);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn delete_llm_then_not_found() {
        let store = test_store().await;
        let created = store.create_llm(new_llm("primary")).await.unwrap();
        store.delete_llm(created.id).await.unwrap();
        assert!(store.llm_by_id(created.id).await.unwrap().is_none());

        let err = store.delete_llm(created.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "LLM", .. }));
    }

    #[tokio::test]
    async fn delete_llm_in_use_is_rejected() {
        let store = test_store().await;
        let llm = store.create_llm(new_llm("primary")).await.unwrap();
        store
            .create_agent(NewAgentDefinition {
                name: "support".into(),
                description: String::new(),
                system_prompt: String::new(),
                llm_id: llm.id,
                steps: vec![],
                conditional_flows: vec![],
                config: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let err = store.delete_llm(llm.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));
        assert!(store.llm_by_id(llm.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn spec_document_is_stored_sanitized() {
        let store = test_store().await;
        let mut action = new_action("GetPet");
        action.api_key = Some("sk-123".into());
        action.spec_document = Some(
            "paths:\n  /pets/{id}:\n    get:\n      security: Bearer sk-123\n".into(),
        );

        let created = store.create_action(action).await.unwrap();
        let doc = created.spec_document.unwrap();
        assert!(!doc.contains("sk-123"));
        assert!(doc.contains(CREDENTIAL_PLACEHOLDER));
        // The credential itself is still stored on its own column.
        assert_eq!(created.api_key.as_deref(), Some("sk-123"));
    }

    #[tokio::test]
    async fn update_resanitizes_spec_document() {
        let store = test_store().await;
        let mut action = new_action("GetPet");
        action.api_key = Some("sk-123".into());
        let created = store.create_action(action).await.unwrap();

        let updated = store
            .update_action(
                created.id,
                ActionUpdate {
                    spec_document: Some("auth: sk-123 and Bearer sk-123".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.spec_document.unwrap().contains("sk-123"));
    }

    #[tokio::test]
    async fn action_json_fields_round_trip() {
        let store = test_store().await;
        let mut action = new_action("GetPet");
        action.parameters.insert(
            "id".into(),
            agentry_core::model::ParameterSpec {
                param_type: "string".into(),
                required: true,
                description: "pet id".into(),
            },
        );
        action
            .headers
            .insert("Accept".into(), "application/json".into());
        action.response_schema = Some(json!({"type": "object", "properties": {}}));

        let created = store.create_action(action).await.unwrap();
        let fetched = store.action_by_id(created.id).await.unwrap().unwrap();
        assert!(fetched.parameters["id"].required);
        assert_eq!(fetched.headers["Accept"], "application/json");
        assert!(fetched.response_schema.is_some());
        assert_eq!(fetched.kind, ActionKind::Custom);
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = test_store().await;
        assert_eq!(store.seed_native_actions().await.unwrap(), 4);
        assert_eq!(store.seed_native_actions().await.unwrap(), 0);

        let thinking = store.action_by_name_opt("Thinking").await.unwrap().unwrap();
        assert_eq!(thinking.kind, ActionKind::Native);
        assert!(thinking.config.contains_key("prompt"));
    }

    #[tokio::test]
    async fn seeding_preserves_user_modified_rows() {
        let store = test_store().await;
        store.seed_native_actions().await.unwrap();
        let wait = store.action_by_name_opt("Wait").await.unwrap().unwrap();
        store
            .update_action(
                wait.id,
                ActionUpdate {
                    description: Some("customized".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store.seed_native_actions().await.unwrap();
        let wait = store.action_by_name_opt("Wait").await.unwrap().unwrap();
        assert_eq!(wait.description, "customized");
    }

    #[tokio::test]
    async fn agent_requires_existing_llm() {
        let store = test_store().await;
        let err = store
            .create_agent(NewAgentDefinition {
                name: "support".into(),
                description: String::new(),
                system_prompt: String::new(),
                llm_id: 999,
                steps: vec![],
                conditional_flows: vec![],
                config: serde_json::Map::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn agent_steps_and_flows_round_trip() {
        let store = test_store().await;
        let llm = store.create_llm(new_llm("primary")).await.unwrap();

        let created = store
            .create_agent(NewAgentDefinition {
                name: "support".into(),
                description: "support agent".into(),
                system_prompt: "be helpful".into(),
                llm_id: llm.id,
                steps: vec![ActionStep {
                    action_name: "Choice".into(),
                    prompt: "request names an order".into(),
                    wait_prompt: None,
                    order: Some(1),
                    flow: FlowTag::Main,
                }],
                conditional_flows: vec![ConditionalFlow {
                    decision_action: "Choice".into(),
                    valid_flow: vec![ActionStep {
                        action_name: "Respond".into(),
                        prompt: String::new(),
                        wait_prompt: None,
                        order: None,
                        flow: FlowTag::ValidFlow,
                    }],
                    invalid_flow: vec![],
                }],
                config: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let fetched = store.agent_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.steps[0].order, Some(1));
        assert_eq!(fetched.conditional_flows[0].decision_action, "Choice");
        assert_eq!(
            fetched.conditional_flows[0].valid_flow[0].flow,
            FlowTag::ValidFlow
        );
    }

    #[tokio::test]
    async fn agent_update_validates_new_llm_reference() {
        let store = test_store().await;
        let llm = store.create_llm(new_llm("primary")).await.unwrap();
        let agent = store
            .create_agent(NewAgentDefinition {
                name: "support".into(),
                description: String::new(),
                system_prompt: String::new(),
                llm_id: llm.id,
                steps: vec![],
                conditional_flows: vec![],
                config: serde_json::Map::new(),
            })
            .await
            .unwrap();

        let err = store
            .update_agent(
                agent.id,
                AgentUpdate {
                    llm_id: Some(12345),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn catalog_trait_resolves_actions_by_name() {
        let store = test_store().await;
        store.seed_native_actions().await.unwrap();
        let catalog: &dyn ActionCatalog = &store;
        let action = catalog.action_by_name("Respond").await.unwrap().unwrap();
        assert_eq!(action.kind, ActionKind::Native);
        assert!(catalog.action_by_name("Nope").await.unwrap().is_none());
    }
}
