//! # Schema Module
//!
//! Table → column metadata for identifier validation.
//!
//! - [`SchemaSource`]: where column lists come from (the live database's
//!   `information_schema`, or a static in-memory description)
//! - [`SchemaCatalog`]: per-table cache in front of a source, with
//!   single-flight population
//! - [`validator`]: whitelist checks that turn untrusted names into
//!   identifiers that may be placed into SQL text
//!
//! ## Static Schema File
//!
//! ```toml
//! [tables]
//! users  = ["id", "name", "age"]
//! orders = ["id", "user_id", "total"]
//! ```

pub mod catalog;
pub mod validator;

use crate::error::{IntentError, IntentResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use catalog::SchemaCatalog;

/// Columns of one table, in ordinal order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        TableSchema {
            name: name.into(),
            columns,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Backing store for schema introspection
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Table names of the target schema, sorted
    async fn list_tables(&self) -> IntentResult<Vec<String>>;

    /// Column names of `table` in ordinal order. An empty list means the
    /// table does not exist.
    async fn table_columns(&self, table: &str) -> IntentResult<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct StaticSchemaFile {
    #[serde(default)]
    tables: BTreeMap<String, Vec<String>>,
}

/// In-memory schema source.
///
/// Counts the introspection calls it serves, which lets callers observe
/// whether the catalog reached its source at all.
#[derive(Debug, Default)]
pub struct StaticSchema {
    tables: BTreeMap<String, Vec<String>>,
    lookups: AtomicUsize,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style table registration
    pub fn with_table<I, S>(mut self, name: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            name.to_string(),
            columns.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Parse a `[tables]` TOML document
    pub fn from_toml_str(text: &str) -> IntentResult<Self> {
        let file: StaticSchemaFile = toml::from_str(text)
            .map_err(|e| IntentError::Configuration(format!("invalid schema file: {e}")))?;
        Ok(StaticSchema {
            tables: file.tables,
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> IntentResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            IntentError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Number of `list_tables` / `table_columns` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn list_tables(&self) -> IntentResult<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.keys().cloned().collect())
    }

    async fn table_columns(&self, table: &str) -> IntentResult<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_schema_from_toml() {
        let schema = StaticSchema::from_toml_str(
            r#"
            [tables]
            users = ["id", "name", "age"]
            orders = ["id", "user_id"]
            "#,
        )
        .unwrap();

        assert_eq!(schema.list_tables().await.unwrap(), vec!["orders", "users"]);
        assert_eq!(
            schema.table_columns("users").await.unwrap(),
            vec!["id", "name", "age"]
        );
        assert!(schema.table_columns("missing").await.unwrap().is_empty());
        assert_eq!(schema.lookups(), 3);
    }

    #[test]
    fn test_static_schema_rejects_bad_toml() {
        let err = StaticSchema::from_toml_str("[tables]\nusers = 5").unwrap_err();
        assert!(matches!(err, IntentError::Configuration(_)));
    }

    #[test]
    fn test_table_schema_lookup() {
        let t = TableSchema::new("users", vec!["id".into(), "name".into()]);
        assert!(t.has_column("id"));
        assert!(!t.has_column("ID"));
        assert_eq!(t.columns.len(), 2);
    }
}
