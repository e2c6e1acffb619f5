//! Error types for intent compilation and execution.
//!
//! Every failure a caller can observe is one of these variants. Validation
//! kinds are raised before any SQL reaches the database; only
//! [`IntentError::QueryTimeout`] and [`IntentError::DatabaseError`] can happen
//! after a statement has been dispatched.

use serde::{Deserialize, Serialize};

/// Intent compilation / execution error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntentError {
    // Schema errors
    /// Table is not present in the target schema
    #[error("Table '{table}' not found in the target schema")]
    UnknownTable { table: String },

    /// Column referenced by a condition or aggregate is not in the table
    #[error("Column '{column}' not found in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Unprefixed column exists in both tables of a join
    #[error(
        "Column '{column}' exists in both tables '{table_a}' and '{table_b}'; \
         use a table prefix (e.g. '{table_a}.{column}')"
    )]
    AmbiguousColumn {
        column: String,
        table_a: String,
        table_b: String,
    },

    // Clause errors
    /// Join column missing from its table's catalog
    #[error("Join column '{column}' not found in table '{table}'")]
    InvalidJoinColumn { table: String, column: String },

    /// Join type outside the whitelist
    #[error("Invalid join type '{join_type}'. Valid types: INNER, LEFT, RIGHT, FULL, FULL OUTER")]
    InvalidJoinType { join_type: String },

    /// ORDER BY target missing from the resolved table
    #[error("Order column '{column}' not found in table '{table}'")]
    InvalidOrderColumn { table: String, column: String },

    /// Sort direction other than ASC / DESC
    #[error("Invalid order direction '{direction}'. Valid directions: ASC, DESC")]
    InvalidSortDirection { direction: String },

    /// Condition operator outside the whitelist
    #[error(
        "Unsupported operator '{operator}'. Valid operators: =, >, <, >=, <=, !=, LIKE, ILIKE, \
         BETWEEN, IN, IS NULL, IS NOT NULL"
    )]
    UnsupportedOperator { operator: String },

    /// Union of two tables without shared columns
    #[error("No common columns found between tables '{table_a}' and '{table_b}'")]
    NoCommonColumns { table_a: String, table_b: String },

    // Filter errors
    /// Domain action without entity identifier or name
    #[error("Action '{action}' requires an entity identifier (ent_id) or name (company_name)")]
    MissingIdentifier { action: String },

    /// Date filter not in YYYY-MM-DD form
    #[error("Invalid date '{value}'. Expected format: YYYY-MM-DD")]
    InvalidDateFormat { value: String },

    /// Required filter key absent
    #[error("Missing required filter '{key}'")]
    MissingFilter { key: String },

    /// Filter value has the wrong shape
    #[error("Invalid filter '{key}': {reason}")]
    InvalidFilter { key: String, reason: String },

    // Execution errors
    /// Caller stopped waiting for the query
    #[error("Query timeout: execution exceeded {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Driver-level failure, original message preserved
    #[error("Database error: {message}")]
    DatabaseError { message: String },

    /// Database connection could not be configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Action tag not in the template dictionary
    #[error("Unsupported action '{action}'")]
    UnsupportedAction { action: String },
}

/// Wire-level classification of an [`IntentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTable,
    UnknownColumn,
    AmbiguousColumn,
    InvalidJoinColumn,
    InvalidJoinType,
    InvalidOrderColumn,
    InvalidSortDirection,
    UnsupportedOperator,
    NoCommonColumns,
    MissingIdentifier,
    InvalidDateFormat,
    MissingFilter,
    InvalidFilter,
    QueryTimeout,
    DatabaseError,
    Configuration,
    UnsupportedAction,
}

impl IntentError {
    /// Classification used in serialized results
    pub fn kind(&self) -> ErrorKind {
        match self {
            IntentError::UnknownTable { .. } => ErrorKind::UnknownTable,
            IntentError::UnknownColumn { .. } => ErrorKind::UnknownColumn,
            IntentError::AmbiguousColumn { .. } => ErrorKind::AmbiguousColumn,
            IntentError::InvalidJoinColumn { .. } => ErrorKind::InvalidJoinColumn,
            IntentError::InvalidJoinType { .. } => ErrorKind::InvalidJoinType,
            IntentError::InvalidOrderColumn { .. } => ErrorKind::InvalidOrderColumn,
            IntentError::InvalidSortDirection { .. } => ErrorKind::InvalidSortDirection,
            IntentError::UnsupportedOperator { .. } => ErrorKind::UnsupportedOperator,
            IntentError::NoCommonColumns { .. } => ErrorKind::NoCommonColumns,
            IntentError::MissingIdentifier { .. } => ErrorKind::MissingIdentifier,
            IntentError::InvalidDateFormat { .. } => ErrorKind::InvalidDateFormat,
            IntentError::MissingFilter { .. } => ErrorKind::MissingFilter,
            IntentError::InvalidFilter { .. } => ErrorKind::InvalidFilter,
            IntentError::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            IntentError::DatabaseError { .. } => ErrorKind::DatabaseError,
            IntentError::Configuration(_) => ErrorKind::Configuration,
            IntentError::UnsupportedAction { .. } => ErrorKind::UnsupportedAction,
        }
    }

    /// True for errors raised before any statement was dispatched
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            IntentError::QueryTimeout { .. }
                | IntentError::DatabaseError { .. }
                | IntentError::Configuration(_)
        )
    }

    pub(crate) fn invalid_filter(key: &str, reason: impl Into<String>) -> Self {
        IntentError::InvalidFilter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_filter(key: &str) -> Self {
        IntentError::MissingFilter {
            key: key.to_string(),
        }
    }
}

impl From<tokio_postgres::Error> for IntentError {
    fn from(e: tokio_postgres::Error) -> Self {
        // `Display` on a server error only says "db error"; keep the server message
        let message = match e.as_db_error() {
            Some(db) => db.message().to_string(),
            None => e.to_string(),
        };
        IntentError::DatabaseError { message }
    }
}

/// Result type for intent operations
pub type IntentResult<T> = Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IntentError::UnknownTable {
            table: "users".to_string(),
        };
        assert_eq!(err.to_string(), "Table 'users' not found in the target schema");

        let err = IntentError::QueryTimeout { timeout_ms: 30_000 };
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn test_validation_classification() {
        assert!(IntentError::InvalidJoinType {
            join_type: "CROSS".to_string()
        }
        .is_validation());
        assert!(IntentError::UnsupportedAction {
            action: "drop".to_string()
        }
        .is_validation());
        assert!(!IntentError::QueryTimeout { timeout_ms: 1 }.is_validation());
        assert!(!IntentError::DatabaseError {
            message: "boom".to_string()
        }
        .is_validation());
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::NoCommonColumns).unwrap();
        assert_eq!(json, "\"no_common_columns\"");
        let kind: ErrorKind = serde_json::from_str("\"query_timeout\"").unwrap();
        assert_eq!(kind, ErrorKind::QueryTimeout);
    }
}
