//! Record templates: single-table fetch, two-table join, two-table union.

use super::sql::{CompiledPlan, SelectBuilder};
use super::CompilerSettings;
use crate::error::{IntentError, IntentResult};
use crate::intent::{Action, Condition, ConditionValue, Filters, JoinPair, Operator, OrderRequest};
use crate::schema::validator::{self, OrderBy, WhereClause};
use crate::schema::{SchemaCatalog, TableSchema};
use crate::value::SqlValue;
use std::sync::Arc;

const TABLE: &[&str] = &["table", "table_name"];
const TABLE_A: &[&str] = &["table_a", "table1"];
const TABLE_B: &[&str] = &["table_b", "table2"];

fn condition(filters: &Filters<'_>) -> IntentResult<Option<Condition>> {
    filters
        .get(&["condition"])
        .map(Condition::from_json)
        .transpose()
}

fn order_request(filters: &Filters<'_>) -> IntentResult<Option<OrderRequest>> {
    filters
        .get(&["order_by"])
        .map(OrderRequest::from_json)
        .transpose()
}

fn where_list(clause: Option<&WhereClause>) -> Vec<(String, Vec<SqlValue>)> {
    clause
        .map(|c| vec![(c.text.clone(), c.params.clone())])
        .unwrap_or_default()
}

/// fetch-records
#[derive(Debug, Clone)]
pub struct FetchArgs {
    pub table: Arc<TableSchema>,
    pub columns: Vec<String>,
    pub condition: Option<WhereClause>,
    pub order: Option<OrderBy>,
    pub limit: i64,
}

impl FetchArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        settings: &CompilerSettings,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let table_name = filters.required_string(TABLE)?;
        let requested = filters.string_list(&["columns"])?.unwrap_or_default();
        let mut condition = condition(filters)?;
        let order = order_request(filters)?;

        // `column` + `value` at the top level: equality lookup of one row
        let mut fallback_limit = settings.default_limit;
        if condition.is_none() {
            if let (Some(column), Some(raw)) = (
                filters.string(&["column"])?,
                filters.get(&["value"]),
            ) {
                let value = SqlValue::from_json(raw).ok_or_else(|| {
                    IntentError::invalid_filter("value", "expected a scalar")
                })?;
                condition = Some(Condition::new(
                    column,
                    Operator::Eq,
                    ConditionValue::Scalar(value),
                ));
                fallback_limit = 1;
            }
        }

        let table = catalog.columns_of(table_name).await?;
        let condition = condition
            .map(|c| validator::parse_condition(&c, &table))
            .transpose()?;
        let order = order
            .map(|o| validator::validate_order_by(&table, &o))
            .transpose()?;

        Ok(FetchArgs {
            columns: validator::validate_columns(&table, &requested),
            condition,
            order,
            limit: settings.limit(filters, fallback_limit),
            table,
        })
    }

    pub fn compile(&self) -> CompiledPlan {
        let query = SelectBuilder::new(&self.columns.join(", "), &self.table.name)
            .filter(where_list(self.condition.as_ref()))
            .order_by(self.order.as_ref().map(OrderBy::to_sql))
            .limit(self.limit)
            .build();
        CompiledPlan::rows(Action::FetchRecords, query)
    }
}

/// joined-records
#[derive(Debug, Clone)]
pub struct JoinArgs {
    pub table_a: Arc<TableSchema>,
    pub table_b: Arc<TableSchema>,
    pub projection: Vec<String>,
    pub join_type: &'static str,
    pub pairs: Vec<JoinPair>,
    pub condition: Option<WhereClause>,
    pub order: Option<OrderBy>,
    pub limit: i64,
}

impl JoinArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        settings: &CompilerSettings,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let name_a = filters.required_string(TABLE_A)?;
        let name_b = filters.required_string(TABLE_B)?;
        let requested = filters.string_list(&["columns"])?.unwrap_or_default();
        let pairs = JoinPair::list_from_json(filters.get(&["join_columns"]))?;
        let join_type = validator::validate_join_type(
            filters.string(&["join_type"])?.unwrap_or("INNER"),
        )?;
        let condition = condition(filters)?;
        let order = order_request(filters)?;

        let table_a = catalog.columns_of(name_a).await?;
        let table_b = catalog.columns_of(name_b).await?;

        let pairs = validator::validate_join_columns(&table_a, &table_b, &pairs)?;
        let condition = condition
            .map(|c| validator::parse_join_condition(&c, &table_a, &table_b))
            .transpose()?;
        let order = order
            .map(|o| validator::validate_order_by_for_join(&table_a, &table_b, &o))
            .transpose()?;

        Ok(JoinArgs {
            projection: validator::validate_joined_columns(&table_a, &table_b, &requested),
            join_type,
            pairs,
            condition,
            order,
            limit: settings.limit(filters, settings.default_limit),
            table_a,
            table_b,
        })
    }

    pub fn compile(&self) -> CompiledPlan {
        let from = format!(
            "{} {} JOIN {} ON {}",
            self.table_a.name,
            self.join_type,
            self.table_b.name,
            validator::join_condition(&self.table_a, &self.table_b, &self.pairs)
        );
        let query = SelectBuilder::new(&self.projection.join(", "), &from)
            .filter(where_list(self.condition.as_ref()))
            .order_by(self.order.as_ref().map(OrderBy::to_sql))
            .limit(self.limit)
            .build();
        CompiledPlan::rows(Action::JoinedRecords, query)
    }
}

/// appended-records
#[derive(Debug, Clone)]
pub struct AppendArgs {
    pub table_a: Arc<TableSchema>,
    pub table_b: Arc<TableSchema>,
    /// In `table_a`'s ordinal order
    pub common: Vec<String>,
    /// Applied to both branches
    pub condition: Option<WhereClause>,
    pub order: Option<OrderBy>,
    pub limit: i64,
}

impl AppendArgs {
    pub(crate) async fn validate(
        catalog: &SchemaCatalog,
        settings: &CompilerSettings,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let name_a = filters.required_string(TABLE_A)?;
        let name_b = filters.required_string(TABLE_B)?;
        let condition = condition(filters)?;
        let order = order_request(filters)?;

        let table_a = catalog.columns_of(name_a).await?;
        let table_b = catalog.columns_of(name_b).await?;
        let common = validator::common_columns(&table_a, &table_b)?;

        // Condition and ORDER BY may only reference columns both branches have
        let condition = condition
            .map(|c| validator::parse_union_condition(&c, &table_a, &table_b, &common))
            .transpose()?;
        let order = order
            .map(|o| validator::validate_union_order_by(&table_a, &table_b, &common, &o))
            .transpose()?;

        Ok(AppendArgs {
            common,
            condition,
            order,
            limit: settings.limit(filters, settings.default_limit),
            table_a,
            table_b,
        })
    }

    pub fn compile(&self) -> CompiledPlan {
        let projection = self.common.join(", ");
        let branch_b = SelectBuilder::new(&projection, &self.table_b.name)
            .filter(where_list(self.condition.as_ref()));
        let query = SelectBuilder::new(&projection, &self.table_a.name)
            .filter(where_list(self.condition.as_ref()))
            .union_all(branch_b)
            .order_by(self.order.as_ref().map(OrderBy::to_sql))
            .limit(self.limit)
            .build();
        CompiledPlan::rows(Action::AppendedRecords, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;
    use serde_json::{json, Map, Value};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(Arc::new(
            StaticSchema::new()
                .with_table("users", ["id", "name", "age"])
                .with_table("orders", ["id", "user_id", "total"])
                .with_table("archived_users", ["name", "id", "deleted_at"]),
        ))
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_fetch_defaults_to_all_columns() {
        let m = map(json!({"table_name": "users"}));
        let args = FetchArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap();
        let plan = args.compile();
        assert_eq!(plan.sql_text(), "SELECT id, name, age FROM users LIMIT %s");
        assert_eq!(plan.parameters(), vec![SqlValue::Int(5)]);
    }

    #[tokio::test]
    async fn test_fetch_column_value_shorthand() {
        let m = map(json!({"table": "users", "column": "id", "value": 1957}));
        let plan = FetchArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT id, name, age FROM users WHERE id = %s LIMIT %s"
        );
        assert_eq!(plan.parameters(), vec![SqlValue::Int(1957), SqlValue::Int(1)]);
    }

    #[tokio::test]
    async fn test_fetch_order_by() {
        let m = map(json!({
            "table": "users",
            "order_by": {"column": "age", "direction": "desc"},
            "limit": 3
        }));
        let plan = FetchArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT id, name, age FROM users ORDER BY age DESC LIMIT %s"
        );
    }

    #[tokio::test]
    async fn test_join_defaults() {
        let m = map(json!({"table1": "users", "table2": "orders", "columns": ["name", "total"]}));
        let plan = JoinArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT users.name, orders.total FROM users INNER JOIN orders ON users.id = orders.id LIMIT %s"
        );
    }

    #[tokio::test]
    async fn test_join_multiple_pairs_and_condition() {
        let m = map(json!({
            "table_a": "users",
            "table_b": "orders",
            "columns": ["name"],
            "join_columns": [{"a": "id", "b": "user_id"}, {"a": "id", "b": "id"}],
            "join_type": "full outer",
            "condition": {"column": "total", "operator": "BETWEEN", "values": [10, 20]}
        }));
        let plan = JoinArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT users.name FROM users FULL OUTER JOIN orders \
             ON users.id = orders.user_id AND users.id = orders.id \
             WHERE orders.total BETWEEN %s AND %s LIMIT %s"
        );
        assert_eq!(
            plan.parameters(),
            vec![SqlValue::Int(10), SqlValue::Int(20), SqlValue::Int(5)]
        );
    }

    #[tokio::test]
    async fn test_append_duplicates_condition_params() {
        let m = map(json!({
            "table_a": "users",
            "table_b": "archived_users",
            "condition": {"column": "name", "operator": "LIKE", "value": "A%"},
            "order_by": {"column": "name"},
            "limit": 8
        }));
        let plan = AppendArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT id, name FROM users WHERE name LIKE %s \
             UNION ALL SELECT id, name FROM archived_users WHERE name LIKE %s \
             ORDER BY name ASC LIMIT %s"
        );
        assert_eq!(
            plan.parameters(),
            vec![SqlValue::text("A%"), SqlValue::text("A%"), SqlValue::Int(8)]
        );
    }

    #[tokio::test]
    async fn test_append_condition_must_be_common() {
        let m = map(json!({
            "table_a": "users",
            "table_b": "archived_users",
            "condition": {"column": "age", "operator": ">", "value": 3}
        }));
        let err = AppendArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_append_accepts_either_table_prefix() {
        let m = map(json!({
            "table_a": "users",
            "table_b": "archived_users",
            "condition": {"column": "archived_users.name", "operator": "=", "value": "ada"},
            "order_by": {"column": "users.id", "direction": "desc"}
        }));
        let plan = AppendArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap()
            .compile();
        assert_eq!(
            plan.sql_text(),
            "SELECT id, name FROM users WHERE name = %s \
             UNION ALL SELECT id, name FROM archived_users WHERE name = %s \
             ORDER BY id DESC LIMIT %s"
        );

        let m = map(json!({
            "table_a": "users",
            "table_b": "archived_users",
            "condition": {"column": "orders.id", "value": 1}
        }));
        let err = AppendArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap_err();
        assert!(matches!(err, IntentError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_missing_table_filter() {
        let m = map(json!({"columns": ["id"]}));
        let err = FetchArgs::validate(&catalog(), &CompilerSettings::default(), &Filters::new(&m))
            .await
            .unwrap_err();
        assert_eq!(err, IntentError::missing_filter("table"));
    }
}
