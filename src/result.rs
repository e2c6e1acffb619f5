//! # Result Normalizer
//!
//! Turns executed rows into the caller-facing [`ExecutionResult`]: an
//! ordered list of uniform mappings plus the SQL trace. Errors are data at
//! this boundary; a failed call is a one-element list holding the error
//! record.

use crate::compiler::{CompiledPlan, ResultShape};
use crate::error::IntentError;
use crate::value::SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row, keyed by column or alias name in SELECT order
pub type Row = Map<String, Value>;

/// Chart descriptor attached to the aggregate actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    /// `bar` or `histogram`
    pub chart_type: String,
    pub x_field: String,
    pub y_field: String,
    pub title: String,
}

impl Visualization {
    pub fn bar(x_field: &str, y_field: &str, title: impl Into<String>) -> Self {
        Self::new("bar", x_field, y_field, title)
    }

    pub fn histogram(x_field: &str, y_field: &str, title: impl Into<String>) -> Self {
        Self::new("histogram", x_field, y_field, title)
    }

    fn new(chart_type: &str, x_field: &str, y_field: &str, title: impl Into<String>) -> Self {
        Visualization {
            chart_type: chart_type.to_string(),
            x_field: x_field.to_string(),
            y_field: y_field.to_string(),
            title: title.into(),
        }
    }
}

/// Outcome of one `compile_and_execute` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Result rows, or the single error record
    pub records: Vec<Row>,
    /// Executed (or attempted) SQL; `None` when nothing was compiled
    pub sql_query: Option<String>,
    pub sql_params: Vec<SqlValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    #[serde(skip)]
    error: Option<IntentError>,
}

impl ExecutionResult {
    /// Normalize per-statement rows according to the plan's shape
    pub fn success(plan: &CompiledPlan, statement_rows: Vec<Vec<Row>>) -> Self {
        let records = match &plan.shape {
            ResultShape::Rows | ResultShape::Chart(_) => {
                statement_rows.into_iter().next().unwrap_or_default()
            }
            ResultShape::TableSummary { table } => {
                vec![fold_table_summary(table, statement_rows)]
            }
        };
        ExecutionResult {
            records,
            sql_query: Some(plan.sql_text()),
            sql_params: plan.parameters(),
            visualization: plan.visualization().cloned(),
            error: None,
        }
    }

    /// Error record. `attempted` is the plan that was dispatched, if any.
    pub fn failure(error: IntentError, attempted: Option<&CompiledPlan>) -> Self {
        let sql_query = attempted.map(CompiledPlan::sql_text);
        let sql_params = attempted.map(CompiledPlan::parameters).unwrap_or_default();

        let mut record = Row::new();
        record.insert("error".to_string(), Value::String(error.to_string()));
        record.insert(
            "error_kind".to_string(),
            serde_json::to_value(error.kind()).unwrap_or(Value::Null),
        );
        record.insert(
            "sql_query".to_string(),
            sql_query.clone().map_or(Value::Null, Value::String),
        );
        record.insert(
            "sql_params".to_string(),
            Value::Array(sql_params.iter().map(SqlValue::to_json).collect()),
        );

        ExecutionResult {
            records: vec![record],
            sql_query,
            sql_params,
            visualization: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&IntentError> {
        self.error.as_ref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.records
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.records
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Count, metadata and sample statements → one mapping
fn fold_table_summary(table: &str, statement_rows: Vec<Vec<Row>>) -> Row {
    let mut statements = statement_rows.into_iter();
    let count_rows = statements.next().unwrap_or_default();
    let metadata = statements.next().unwrap_or_default();
    let sample = statements.next().unwrap_or_default();

    let row_count = count_rows
        .first()
        .and_then(|row| row.get("row_count"))
        .cloned()
        .unwrap_or(Value::Null);
    let column_names: Vec<Value> = metadata
        .iter()
        .filter_map(|row| row.get("column_name").cloned())
        .collect();

    let mut summary = Row::new();
    summary.insert("table_name".to_string(), Value::String(table.to_string()));
    summary.insert("row_count".to_string(), row_count);
    summary.insert("column_count".to_string(), Value::from(metadata.len()));
    summary.insert("column_names".to_string(), Value::Array(column_names));
    summary.insert(
        "columns".to_string(),
        Value::Array(metadata.into_iter().map(Value::Object).collect()),
    );
    summary.insert(
        "sample_rows".to_string(),
        Value::Array(sample.into_iter().map(Value::Object).collect()),
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompiledQuery;
    use crate::intent::Action;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_rows_keep_order() {
        let plan = CompiledPlan::rows(
            Action::FetchRecords,
            CompiledQuery::new("SELECT id FROM t LIMIT %s", vec![SqlValue::Int(5)]),
        );
        let rows = vec![row(json!({"id": 3})), row(json!({"id": 1})), row(json!({"id": 2}))];
        let result = ExecutionResult::success(&plan, vec![rows.clone()]);
        assert!(!result.is_error());
        assert_eq!(result.rows(), rows.as_slice());
        assert_eq!(result.sql_query.as_deref(), Some("SELECT id FROM t LIMIT %s"));
        assert_eq!(result.sql_params, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_failure_record_shape() {
        let result = ExecutionResult::failure(
            IntentError::UnsupportedAction {
                action: "drop-everything".to_string(),
            },
            None,
        );
        assert!(result.is_error());
        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert!(record["error"].as_str().unwrap().contains("drop-everything"));
        assert_eq!(record["error_kind"], json!("unsupported_action"));
        assert_eq!(record["sql_query"], Value::Null);
        assert_eq!(record["sql_params"], json!([]));
    }

    #[test]
    fn test_failure_keeps_attempted_sql() {
        let plan = CompiledPlan::rows(
            Action::FetchRecords,
            CompiledQuery::new("SELECT id FROM t LIMIT %s", vec![SqlValue::Int(5)]),
        );
        let result =
            ExecutionResult::failure(IntentError::QueryTimeout { timeout_ms: 10 }, Some(&plan));
        assert_eq!(result.records[0]["sql_query"], json!("SELECT id FROM t LIMIT %s"));
        assert_eq!(result.records[0]["sql_params"], json!([5]));
    }

    #[test]
    fn test_table_summary_fold() {
        let folded = fold_table_summary(
            "users",
            vec![
                vec![row(json!({"row_count": 42}))],
                vec![
                    row(json!({"column_name": "id", "data_type": "integer", "is_nullable": "NO"})),
                    row(json!({"column_name": "name", "data_type": "text", "is_nullable": "YES"})),
                ],
                vec![row(json!({"id": 1, "name": "a"}))],
            ],
        );
        assert_eq!(folded["table_name"], json!("users"));
        assert_eq!(folded["row_count"], json!(42));
        assert_eq!(folded["column_count"], json!(2));
        assert_eq!(folded["column_names"], json!(["id", "name"]));
        assert_eq!(folded["sample_rows"], json!([{"id": 1, "name": "a"}]));
    }

    #[test]
    fn test_serialized_result_skips_missing_visualization() {
        let plan = CompiledPlan::rows(Action::ListTables, CompiledQuery::new("SELECT 1", vec![]));
        let json = ExecutionResult::success(&plan, vec![vec![]]).to_json();
        assert!(json.get("visualization").is_none());
        assert_eq!(json["records"], json!([]));
    }
}
