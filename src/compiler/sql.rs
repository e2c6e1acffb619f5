//! Compiled statements and plans.

use crate::intent::Action;
use crate::result::Visualization;
use crate::value::SqlValue;
use serde::Serialize;

/// Final (SQL text, parameters) pair. The text holds `%s` placeholders and
/// schema-validated identifiers only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql_text: String,
    pub parameters: Vec<SqlValue>,
}

impl CompiledQuery {
    pub fn new(sql_text: impl Into<String>, parameters: Vec<SqlValue>) -> Self {
        CompiledQuery {
            sql_text: sql_text.into(),
            parameters,
        }
    }

    /// Number of `%s` placeholders in the text
    pub fn placeholder_count(&self) -> usize {
        self.sql_text.matches("%s").count()
    }
}

/// How executed rows are turned into the caller-facing result
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape {
    /// Rows as returned
    Rows,
    /// Rows plus a chart descriptor
    Chart(Visualization),
    /// Count, metadata and sample statements folded into one mapping
    TableSummary { table: String },
}

/// Everything needed to execute one intent
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub action: Action,
    /// Run in order on one connection
    pub statements: Vec<CompiledQuery>,
    pub shape: ResultShape,
}

impl CompiledPlan {
    pub fn rows(action: Action, query: CompiledQuery) -> Self {
        CompiledPlan {
            action,
            statements: vec![query],
            shape: ResultShape::Rows,
        }
    }

    /// SQL trace: statements joined by `;\n`
    pub fn sql_text(&self) -> String {
        self.statements
            .iter()
            .map(|q| q.sql_text.as_str())
            .collect::<Vec<_>>()
            .join(";\n")
    }

    /// Parameters of every statement, in execution order
    pub fn parameters(&self) -> Vec<SqlValue> {
        self.statements
            .iter()
            .flat_map(|q| q.parameters.iter().cloned())
            .collect()
    }

    pub fn visualization(&self) -> Option<&Visualization> {
        match &self.shape {
            ResultShape::Chart(v) => Some(v),
            _ => None,
        }
    }
}

/// Assemble `SELECT ... FROM ...` pieces, skipping empty optional clauses
pub(crate) struct SelectBuilder {
    text: String,
    params: Vec<SqlValue>,
}

impl SelectBuilder {
    pub(crate) fn new(projection: &str, from: &str) -> Self {
        SelectBuilder {
            text: format!("SELECT {projection} FROM {from}"),
            params: Vec::new(),
        }
    }

    /// Append raw (already validated) text
    pub(crate) fn push(mut self, text: &str) -> Self {
        self.text.push(' ');
        self.text.push_str(text);
        self
    }

    /// `WHERE a AND b ...`; no-op for an empty list
    pub(crate) fn filter(mut self, predicates: Vec<(String, Vec<SqlValue>)>) -> Self {
        if predicates.is_empty() {
            return self;
        }
        let mut texts = Vec::with_capacity(predicates.len());
        for (text, params) in predicates {
            texts.push(text);
            self.params.extend(params);
        }
        self.text.push_str(" WHERE ");
        self.text.push_str(&texts.join(" AND "));
        self
    }

    pub(crate) fn order_by(self, order: Option<String>) -> Self {
        match order {
            Some(order) => self.push(&order),
            None => self,
        }
    }

    /// `LIMIT %s`, always bound
    pub(crate) fn limit(mut self, limit: i64) -> Self {
        self.text.push_str(" LIMIT %s");
        self.params.push(SqlValue::Int(limit));
        self
    }

    /// Splice another builder's text and parameters after this one's
    pub(crate) fn union_all(mut self, other: SelectBuilder) -> Self {
        self.text.push_str(" UNION ALL ");
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }

    pub(crate) fn build(self) -> CompiledQuery {
        CompiledQuery::new(self.text, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_skips_empty_clauses() {
        let q = SelectBuilder::new("id", "users").limit(5).build();
        assert_eq!(q.sql_text, "SELECT id FROM users LIMIT %s");
        assert_eq!(q.parameters, vec![SqlValue::Int(5)]);
    }

    #[test]
    fn test_builder_where_and_order() {
        let q = SelectBuilder::new("id, name", "users")
            .filter(vec![
                ("age > %s".to_string(), vec![SqlValue::Int(25)]),
                ("name IS NOT NULL".to_string(), vec![]),
            ])
            .order_by(Some("ORDER BY age DESC".to_string()))
            .limit(10)
            .build();
        assert_eq!(
            q.sql_text,
            "SELECT id, name FROM users WHERE age > %s AND name IS NOT NULL ORDER BY age DESC LIMIT %s"
        );
        assert_eq!(q.placeholder_count(), q.parameters.len());
    }

    #[test]
    fn test_plan_trace_joins_statements() {
        let plan = CompiledPlan {
            action: Action::TableSummary,
            statements: vec![
                CompiledQuery::new("SELECT 1", vec![]),
                CompiledQuery::new("SELECT %s", vec![SqlValue::Int(3)]),
            ],
            shape: ResultShape::TableSummary {
                table: "t".to_string(),
            },
        };
        assert_eq!(plan.sql_text(), "SELECT 1;\nSELECT %s");
        assert_eq!(plan.parameters(), vec![SqlValue::Int(3)]);
        assert!(plan.visualization().is_none());
    }
}
