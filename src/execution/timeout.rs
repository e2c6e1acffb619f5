//! Query Deadline Module
//!
//! Bounds how long a caller waits for database work.
//!
//! ## Design
//!
//! The work runs as its own tokio task. The caller waits on the task's
//! handle for at most the deadline; when the deadline passes first, the
//! handle is dropped, which detaches the task without cancelling it.
//! The statement is therefore not cancelled on the server: a timed-out
//! query may still complete after `QueryTimeout` has been reported, and
//! the task releases its connection when it does.

use crate::error::{IntentError, IntentResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::error;

/// Wall-clock budget for one call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// When the budget started
    start_time: Instant,

    /// Maximum wait
    budget: Duration,
}

impl Deadline {
    /// Start a budget of `budget` from now
    pub fn after(budget: Duration) -> Self {
        Deadline {
            start_time: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time since the budget started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time left before the deadline (zero once passed)
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start_time.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `work` on a detached task and wait for it until the deadline.
    ///
    /// Errors from `work` pass through unchanged. A task that panics is
    /// reported as a `DatabaseError`.
    pub async fn run<T, F>(self, work: F) -> IntentResult<T>
    where
        F: Future<Output = IntentResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(work);
        match tokio::time::timeout(self.remaining(), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!(error = %join_error, "query worker failed");
                Err(IntentError::DatabaseError {
                    message: format!("query worker failed: {join_error}"),
                })
            }
            Err(_) => {
                let timeout_ms = self.budget.as_millis() as u64;
                error!(
                    timeout_ms,
                    elapsed_ms = self.elapsed().as_millis() as u64,
                    "query exceeded deadline, worker left running"
                );
                Err(IntentError::QueryTimeout { timeout_ms })
            }
        }
    }
}
