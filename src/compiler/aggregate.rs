//! Aggregate templates: table summary, column distribution, and
//! category/quantity relationship.

use super::sql::{CompiledPlan, CompiledQuery, ResultShape};
use super::CompilerSettings;
use crate::error::IntentResult;
use crate::intent::{Action, Filters};
use crate::result::Visualization;
use crate::schema::validator;
use crate::schema::{SchemaCatalog, TableSchema};
use crate::value::SqlValue;
use std::sync::Arc;

const TABLE: &[&str] = &["table", "table_name"];

/// Column metadata for one table, bound on the table name
const COLUMN_METADATA_SQL: &str = "SELECT column_name, data_type, is_nullable \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = %s \
     ORDER BY ordinal_position";

/// table-summary
#[derive(Debug, Clone)]
pub struct TableSummaryArgs {
    pub table: Arc<TableSchema>,
    pub sample_rows: i64,
}

impl TableSummaryArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        settings: &CompilerSettings,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let table = catalog.columns_of(filters.required_string(TABLE)?).await?;
        Ok(TableSummaryArgs {
            table,
            sample_rows: settings.sample_rows,
        })
    }

    /// Three statements, executed in order on one connection:
    /// row count, column metadata, sample rows
    pub fn compile(&self) -> CompiledPlan {
        let table = &self.table.name;
        CompiledPlan {
            action: Action::TableSummary,
            statements: vec![
                CompiledQuery::new(
                    format!("SELECT COUNT(*) AS row_count FROM {table}"),
                    Vec::new(),
                ),
                CompiledQuery::new(COLUMN_METADATA_SQL, vec![SqlValue::text(table.as_str())]),
                CompiledQuery::new(
                    format!("SELECT * FROM {table} LIMIT %s"),
                    vec![SqlValue::Int(self.sample_rows)],
                ),
            ],
            shape: ResultShape::TableSummary {
                table: table.clone(),
            },
        }
    }
}

/// column-summary
#[derive(Debug, Clone)]
pub struct ColumnSummaryArgs {
    pub table: Arc<TableSchema>,
    pub column: String,
}

impl ColumnSummaryArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let table_name = filters.required_string(TABLE)?;
        let column = filters.required_string(&["column", "column_name"])?;
        let table = catalog.columns_of(table_name).await?;
        Ok(ColumnSummaryArgs {
            column: validator::require_column(&table, column)?,
            table,
        })
    }

    pub fn compile(&self) -> CompiledPlan {
        let (table, column) = (&self.table.name, &self.column);
        CompiledPlan {
            action: Action::ColumnSummary,
            statements: vec![CompiledQuery::new(
                format!(
                    "SELECT {column}, COUNT(*) AS count FROM {table} \
                     GROUP BY {column} ORDER BY count DESC"
                ),
                Vec::new(),
            )],
            shape: ResultShape::Chart(Visualization::bar(
                column,
                "count",
                format!("Distribution of {column} in {table}"),
            )),
        }
    }
}

/// relationship-analysis
#[derive(Debug, Clone)]
pub struct RelationshipArgs {
    pub table: Arc<TableSchema>,
    pub categorical: String,
    pub quantitative: String,
}

impl RelationshipArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let table_name = filters.required_string(TABLE)?;
        let categorical = filters.required_string(&["categorical_column"])?;
        let quantitative = filters.required_string(&["quantitative_column"])?;
        let table = catalog.columns_of(table_name).await?;
        Ok(RelationshipArgs {
            categorical: validator::require_column(&table, categorical)?,
            quantitative: validator::require_column(&table, quantitative)?,
            table,
        })
    }

    pub fn compile(&self) -> CompiledPlan {
        let (table, cat, quant) = (&self.table.name, &self.categorical, &self.quantitative);
        CompiledPlan {
            action: Action::RelationshipAnalysis,
            statements: vec![CompiledQuery::new(
                format!(
                    "SELECT {cat} AS {cat}, SUM({quant}) AS {quant} FROM {table} \
                     GROUP BY {cat} ORDER BY {quant} DESC"
                ),
                Vec::new(),
            )],
            shape: ResultShape::Chart(Visualization::histogram(
                cat,
                quant,
                format!("Sum of {quant} by {cat} in {table}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntentError;
    use crate::schema::StaticSchema;
    use serde_json::{json, Map, Value};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(Arc::new(
            StaticSchema::new().with_table("sales", ["id", "region", "amount"]),
        ))
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_table_summary_statements() {
        let m = map(json!({"table_name": "sales"}));
        let plan = TableSummaryArgs::validate(
            &catalog(),
            &CompilerSettings::default(),
            &Filters::new(&m),
        )
        .await
        .unwrap()
        .compile();
        assert_eq!(plan.statements.len(), 3);
        assert_eq!(plan.statements[0].sql_text, "SELECT COUNT(*) AS row_count FROM sales");
        assert_eq!(plan.statements[2].sql_text, "SELECT * FROM sales LIMIT %s");
        assert_eq!(
            plan.parameters(),
            vec![SqlValue::text("sales"), SqlValue::Int(3)]
        );
    }

    #[tokio::test]
    async fn test_column_summary_chart() {
        let m = map(json!({"table": "sales", "column": "region"}));
        let plan = ColumnSummaryArgs::validate(&catalog(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT region, COUNT(*) AS count FROM sales GROUP BY region ORDER BY count DESC"
        );
        let viz = plan.visualization().unwrap();
        assert_eq!(viz.chart_type, "bar");
        assert_eq!(viz.title, "Distribution of region in sales");
    }

    #[tokio::test]
    async fn test_column_summary_unknown_column_is_error() {
        let m = map(json!({"table": "sales", "column": "price"}));
        let err = ColumnSummaryArgs::validate(&catalog(), &Filters::new(&m))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_relationship_chart() {
        let m = map(json!({
            "table": "sales",
            "categorical_column": "region",
            "quantitative_column": "amount"
        }));
        let plan = RelationshipArgs::validate(&catalog(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT region AS region, SUM(amount) AS amount FROM sales \
             GROUP BY region ORDER BY amount DESC"
        );
        let viz = plan.visualization().unwrap();
        assert_eq!(viz.chart_type, "histogram");
        assert_eq!(viz.x_field, "region");
        assert_eq!(viz.y_field, "amount");
        assert_eq!(viz.title, "Sum of amount by region in sales");
    }
}
