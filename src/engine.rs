//! # Query Engine
//!
//! The inbound boundary: `compile_and_execute(action, filters)` always
//! returns an [`ExecutionResult`]. Unknown actions are rejected before the
//! catalog or the database is touched; validation errors are reported
//! before any SQL is dispatched.
//!
//! `compile_and_execute_in_session` layers a [`SessionStore`] on top:
//! remembered filters fill keys the caller left out, every intent is kept
//! in the session's history, and the entity selector of a successful call
//! becomes the session default.

use crate::compiler::{is_entity_key, CompiledPlan, Compiler, CompilerSettings};
use crate::config::Config;
use crate::error::{IntentError, IntentResult};
use crate::execution::{Database, Executor, PostgresDatabase};
use crate::intent::{Action, Intent};
use crate::result::ExecutionResult;
use crate::schema::{SchemaCatalog, SchemaSource};
use crate::session::SessionStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Compiler plus executor
#[derive(Debug, Clone)]
pub struct QueryEngine {
    compiler: Compiler,
    executor: Executor,
    sessions: Arc<SessionStore>,
}

impl QueryEngine {
    pub fn new(compiler: Compiler, executor: Executor, sessions: Arc<SessionStore>) -> Self {
        QueryEngine {
            compiler,
            executor,
            sessions,
        }
    }

    /// Postgres-backed engine; the database doubles as the catalog's
    /// introspection source
    pub fn from_config(config: &Config) -> Self {
        let db = Arc::new(PostgresDatabase::from_config(&config.database));
        Self::with_backends(config, db.clone(), db)
    }

    /// Engine over arbitrary backends, configured from `config`
    pub fn with_backends(
        config: &Config,
        source: Arc<dyn SchemaSource>,
        db: Arc<dyn Database>,
    ) -> Self {
        let catalog = Arc::new(SchemaCatalog::new(source).with_ttl(config.catalog.ttl()));
        Self::new(
            Compiler::new(catalog, CompilerSettings::from_config(config)),
            Executor::new(db, config.execution.query_timeout()),
            Arc::new(SessionStore::new(&config.session)),
        )
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        self.compiler.catalog()
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Compile without executing
    pub async fn compile(
        &self,
        action: &str,
        filters: &Map<String, Value>,
    ) -> IntentResult<CompiledPlan> {
        let action = Action::parse(action).ok_or_else(|| IntentError::UnsupportedAction {
            action: action.to_string(),
        })?;
        self.compiler.compile(action, filters).await
    }

    pub async fn compile_and_execute(
        &self,
        action: &str,
        filters: &Map<String, Value>,
    ) -> ExecutionResult {
        let Some(parsed) = Action::parse(action) else {
            info!(action, "unsupported action rejected");
            return ExecutionResult::failure(
                IntentError::UnsupportedAction {
                    action: action.to_string(),
                },
                None,
            );
        };
        info!(action = %parsed, filters = filters.len(), "dispatching intent");

        let plan = match self.compiler.compile(parsed, filters).await {
            Ok(plan) => plan,
            Err(err) => {
                info!(action = %parsed, error = %err, "intent rejected");
                return ExecutionResult::failure(err, None);
            }
        };

        match self.executor.run(&plan).await {
            Ok(rows) => ExecutionResult::success(&plan, rows),
            Err(err) => {
                error!(action = %parsed, sql = %plan.sql_text(), error = %err, "query failed");
                ExecutionResult::failure(err, Some(&plan))
            }
        }
    }

    /// `compile_and_execute` with session defaults. An entity given
    /// explicitly replaces the remembered one, whichever key selects it.
    pub async fn compile_and_execute_in_session(
        &self,
        session: &str,
        action: &str,
        filters: &Map<String, Value>,
    ) -> ExecutionResult {
        let explicit_entity = filters
            .iter()
            .any(|(key, value)| is_entity_key(key) && !value.is_null());

        let mut merged = self.sessions.merge_defaults(session, filters);
        if explicit_entity {
            merged.retain(|key, _| !is_entity_key(key) || filters.contains_key(key));
        }
        debug!(session, defaults = merged.len().saturating_sub(filters.len()), "session defaults merged");

        let intent = Intent::new(action, filters.clone());
        let recorded = serde_json::to_string(&intent).unwrap_or_else(|_| action.to_string());
        self.sessions.store_query(session, &recorded);

        let result = self.compile_and_execute(action, &merged).await;
        if explicit_entity && !result.is_error() {
            for key in self.sessions.defaults(session).keys() {
                if is_entity_key(key) && !filters.contains_key(key) {
                    self.sessions.forget(session, key);
                }
            }
            for (key, value) in filters {
                if is_entity_key(key) && !value.is_null() {
                    self.sessions.remember(session, key, value.clone());
                }
            }
        }
        result
    }

    pub async fn execute(&self, intent: &Intent) -> ExecutionResult {
        self.compile_and_execute(&intent.action, &intent.filters)
            .await
    }
}
