//! Query Execution Module
//!
//! Runs compiled plans against the database with:
//! - A bounded wait per call (see [`Deadline`])
//! - One connection per call, released when the worker finishes
//! - Statements of a plan executed in order on that connection

pub mod postgres;
mod timeout;

pub use postgres::PostgresDatabase;
pub use timeout::Deadline;

use crate::compiler::{CompiledPlan, CompiledQuery};
use crate::error::IntentResult;
use crate::result::Row;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Source of connections
#[async_trait]
pub trait Database: Send + Sync + 'static {
    async fn connect(&self) -> IntentResult<Box<dyn Connection>>;
}

/// One open connection. Dropping it releases it.
#[async_trait]
pub trait Connection: Send {
    /// Execute one statement, binding `query.parameters` to its `%s`
    /// placeholders in order
    async fn query(&mut self, query: &CompiledQuery) -> IntentResult<Vec<Row>>;
}

/// Executes plans under a timeout
#[derive(Clone)]
pub struct Executor {
    db: Arc<dyn Database>,
    timeout: Duration,
}

impl Executor {
    pub fn new(db: Arc<dyn Database>, timeout: Duration) -> Self {
        Executor { db, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Rows of every statement in the plan, in statement order.
    ///
    /// Waits at most the configured timeout. On `QueryTimeout` the worker
    /// is left running and still releases its connection when done.
    pub async fn run(&self, plan: &CompiledPlan) -> IntentResult<Vec<Vec<Row>>> {
        let db = Arc::clone(&self.db);
        let statements = plan.statements.clone();
        let action = plan.action;

        Deadline::after(self.timeout)
            .run(async move {
                let mut conn = db.connect().await?;
                let mut results = Vec::with_capacity(statements.len());
                for (i, statement) in statements.iter().enumerate() {
                    debug!(
                        action = %action,
                        statement = i,
                        sql = %statement.sql_text,
                        params = statement.parameters.len(),
                        "executing statement"
                    );
                    results.push(conn.query(statement).await?);
                }
                Ok(results)
            })
            .await
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntentError;
    use crate::intent::Action;
    use crate::value::SqlValue;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every statement with one row echoing its text
    struct EchoDb {
        delay: Duration,
        open: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    struct EchoConn {
        delay: Duration,
        open: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Drop for EchoConn {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Database for EchoDb {
        async fn connect(&self) -> IntentResult<Box<dyn Connection>> {
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoConn {
                delay: self.delay,
                open: Arc::clone(&self.open),
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    #[async_trait]
    impl Connection for EchoConn {
        async fn query(&mut self, query: &CompiledQuery) -> IntentResult<Vec<Row>> {
            tokio::time::sleep(self.delay).await;
            if query.sql_text.contains("missing_table") {
                return Err(IntentError::DatabaseError {
                    message: "relation \"missing_table\" does not exist".to_string(),
                });
            }
            self.seen.lock().push(query.sql_text.clone());
            let mut row = Row::new();
            row.insert("sql".to_string(), json!(query.sql_text));
            Ok(vec![row])
        }
    }

    fn echo(delay: Duration) -> (Arc<EchoDb>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let open = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let db = Arc::new(EchoDb {
            delay,
            open: Arc::clone(&open),
            seen: Arc::clone(&seen),
        });
        (db, open, seen)
    }

    fn plan(sqls: &[&str]) -> CompiledPlan {
        let mut plan = CompiledPlan::rows(
            Action::TableSummary,
            CompiledQuery::new(sqls[0], vec![SqlValue::Int(1)]),
        );
        for sql in &sqls[1..] {
            plan.statements.push(CompiledQuery::new(*sql, Vec::new()));
        }
        plan
    }

    #[tokio::test]
    async fn test_statements_run_in_order() {
        let (db, open, seen) = echo(Duration::ZERO);
        let executor = Executor::new(db, Duration::from_secs(5));
        let rows = executor.run(&plan(&["SELECT 1", "SELECT 2", "SELECT 3"])).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0]["sql"], json!("SELECT 3"));
        assert_eq!(*seen.lock(), vec!["SELECT 1", "SELECT 2", "SELECT 3"]);
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_database_error_releases_connection() {
        let (db, open, seen) = echo(Duration::ZERO);
        let executor = Executor::new(db, Duration::from_secs(5));
        let err = executor
            .run(&plan(&["SELECT 1", "SELECT * FROM missing_table", "SELECT 3"]))
            .await
            .unwrap_err();

        assert!(matches!(err, IntentError::DatabaseError { .. }));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_then_connection_released() {
        let (db, open, _) = echo(Duration::from_millis(150));
        let executor = Executor::new(db, Duration::from_millis(20));
        let err = executor.run(&plan(&["SELECT pg_sleep(1)"])).await.unwrap_err();

        assert_eq!(err, IntentError::QueryTimeout { timeout_ms: 20 });
        assert_eq!(open.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }
}
