//! # intentsql
//!
//! Intent-to-SQL compiler and execution guard. An intent is an action tag
//! plus a flat filter map; the crate turns it into parameterized SQL whose
//! identifiers have all been checked against the live schema, runs it
//! under a deadline, and returns normalized rows with the SQL trace.
//!
//! ## Pipeline
//!
//! ```text
//! Intent {action, filters}
//!     ↓
//! [Action::parse]          → unknown tag: UnsupportedAction, nothing touched
//!     ↓
//! [Compiler::validate]     → identifiers checked via SchemaCatalog
//!     ↓
//! [ValidatedIntent::compile] → CompiledPlan (SQL text with %s + parameters)
//!     ↓
//! [Executor::run]          → rows per statement, bounded wait
//!     ↓
//! [ExecutionResult]        → rows (or one error record) + SQL trace
//! ```
//!
//! ## Injection safety
//!
//! Only identifiers reach SQL text, and only after they were found in the
//! catalog or in a fixed whitelist (operators, join types, directions).
//! Every value travels as a bound parameter.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use intentsql::{Config, QueryEngine};
//! use serde_json::json;
//!
//! let config = Config::load()?;
//! let engine = QueryEngine::from_config(&config);
//!
//! let filters = json!({
//!     "table": "users",
//!     "columns": ["id", "name"],
//!     "condition": {"column": "age", "operator": ">", "value": 25},
//!     "limit": 5
//! });
//! let result = engine
//!     .compile_and_execute("fetch-records", filters.as_object().unwrap())
//!     .await;
//! // result.sql_query == Some("SELECT id, name FROM users WHERE age > %s LIMIT %s")
//! // result.sql_params == [25, 5]
//! ```

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod intent;
pub mod result;
pub mod schema;
pub mod session;
pub mod value;

pub use compiler::{CompiledPlan, CompiledQuery, Compiler, CompilerSettings, ValidatedIntent};
pub use config::Config;
pub use engine::QueryEngine;
pub use error::{ErrorKind, IntentError, IntentResult};
pub use execution::{Connection, Database, Deadline, Executor, PostgresDatabase};
pub use intent::{Action, Intent};
pub use result::{ExecutionResult, Row, Visualization};
pub use schema::{SchemaCatalog, SchemaSource, StaticSchema, TableSchema};
pub use session::{SessionId, SessionStore};
pub use value::SqlValue;
