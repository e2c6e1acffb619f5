//! Structured filter values: conditions, ORDER BY requests and join pairs.
//!
//! Parsing here only checks *shape* (operator whitelist, value arity).
//! Column names are checked against the schema catalog later, by the
//! validator.

use crate::error::{IntentError, IntentResult};
use crate::value::SqlValue;
use serde_json::Value;
use std::fmt;

/// Whitelisted condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    ILike,
    Between,
    In,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parse an operator. Word operators are case-insensitive and tolerate
    /// repeated inner whitespace (`is  not null`).
    pub fn parse(raw: &str) -> IntentResult<Self> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        let op = match normalized.as_str() {
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            "<" => Operator::Lt,
            ">=" => Operator::Ge,
            "<=" => Operator::Le,
            "LIKE" => Operator::Like,
            "ILIKE" => Operator::ILike,
            "BETWEEN" => Operator::Between,
            "IN" => Operator::In,
            "IS NULL" => Operator::IsNull,
            "IS NOT NULL" => Operator::IsNotNull,
            _ => {
                return Err(IntentError::UnsupportedOperator {
                    operator: raw.to_string(),
                })
            }
        };
        Ok(op)
    }

    /// SQL spelling
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::Between => "BETWEEN",
            Operator::In => "IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Comparison value(s), shaped to match the operator
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    /// IS NULL / IS NOT NULL
    None,
    Scalar(SqlValue),
    /// BETWEEN bounds
    Pair(SqlValue, SqlValue),
    /// IN list, never empty
    List(Vec<SqlValue>),
}

impl ConditionValue {
    /// Values in placeholder order
    pub fn params(&self) -> Vec<SqlValue> {
        match self {
            ConditionValue::None => Vec::new(),
            ConditionValue::Scalar(v) => vec![v.clone()],
            ConditionValue::Pair(lo, hi) => vec![lo.clone(), hi.clone()],
            ConditionValue::List(items) => items.clone(),
        }
    }
}

/// A single WHERE predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column as requested, possibly `table.column`
    pub column: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: ConditionValue) -> Self {
        Condition {
            column: column.into(),
            operator,
            value,
        }
    }

    /// Parse a `{column, operator, value | values}` object
    pub fn from_json(raw: &Value) -> IntentResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| IntentError::invalid_filter("condition", "expected an object"))?;

        let column = match obj.get("column") {
            Some(Value::String(c)) if !c.trim().is_empty() => c.trim().to_string(),
            Some(_) => {
                return Err(IntentError::invalid_filter(
                    "condition",
                    "'column' must be a non-empty string",
                ))
            }
            None => return Err(IntentError::invalid_filter("condition", "missing 'column'")),
        };

        let operator = match obj.get("operator") {
            None | Some(Value::Null) => Operator::Eq,
            Some(Value::String(op)) => Operator::parse(op)?,
            Some(other) => {
                return Err(IntentError::UnsupportedOperator {
                    operator: other.to_string(),
                })
            }
        };

        let raw_value = obj
            .get("values")
            .filter(|v| !v.is_null())
            .or_else(|| obj.get("value").filter(|v| !v.is_null()));

        let value = shape_value(operator, raw_value)?;
        Ok(Condition {
            column,
            operator,
            value,
        })
    }
}

fn scalar(raw: &Value, operator: Operator) -> IntentResult<SqlValue> {
    match SqlValue::from_json(raw) {
        Some(SqlValue::Null) | None => Err(IntentError::invalid_filter(
            "condition",
            format!("{operator} operator requires scalar values"),
        )),
        Some(v) => Ok(v),
    }
}

fn shape_value(operator: Operator, raw: Option<&Value>) -> IntentResult<ConditionValue> {
    match operator {
        Operator::IsNull | Operator::IsNotNull => match raw {
            None => Ok(ConditionValue::None),
            Some(_) => Err(IntentError::invalid_filter(
                "condition",
                format!("{operator} takes no value"),
            )),
        },
        Operator::Between => match raw {
            Some(Value::Array(items)) if items.len() == 2 => Ok(ConditionValue::Pair(
                scalar(&items[0], operator)?,
                scalar(&items[1], operator)?,
            )),
            _ => Err(IntentError::invalid_filter(
                "condition",
                "BETWEEN operator requires exactly 2 values",
            )),
        },
        Operator::In => match raw {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| scalar(item, operator))
                .collect::<IntentResult<Vec<_>>>()
                .map(ConditionValue::List),
            _ => Err(IntentError::invalid_filter(
                "condition",
                "IN operator requires at least one value",
            )),
        },
        _ => match raw {
            Some(v) => Ok(ConditionValue::Scalar(scalar(v, operator)?)),
            None => Err(IntentError::invalid_filter(
                "condition",
                format!("operator '{operator}' requires a value"),
            )),
        },
    }
}

/// ORDER BY as requested; the direction is normalized by the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub column: String,
    pub direction: String,
}

impl OrderRequest {
    pub fn new(column: impl Into<String>, direction: impl Into<String>) -> Self {
        OrderRequest {
            column: column.into(),
            direction: direction.into(),
        }
    }

    /// Parse `{column, direction}`; direction defaults to ASC
    pub fn from_json(raw: &Value) -> IntentResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| IntentError::invalid_filter("order_by", "expected an object"))?;
        let column = match obj.get("column") {
            Some(Value::String(c)) if !c.trim().is_empty() => c.trim().to_string(),
            _ => {
                return Err(IntentError::invalid_filter(
                    "order_by",
                    "'column' must be a non-empty string",
                ))
            }
        };
        let direction = match obj.get("direction") {
            None | Some(Value::Null) => "ASC".to_string(),
            Some(Value::String(d)) => d.clone(),
            Some(other) => {
                return Err(IntentError::InvalidSortDirection {
                    direction: other.to_string(),
                })
            }
        };
        Ok(OrderRequest { column, direction })
    }
}

/// One `table_a.a = table_b.b` equality of a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPair {
    pub a: String,
    pub b: String,
}

impl JoinPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        JoinPair {
            a: a.into(),
            b: b.into(),
        }
    }

    /// Parse `join_columns`: one `{a, b}` object or a list of them. Missing
    /// sides default to `id`.
    pub fn list_from_json(raw: Option<&Value>) -> IntentResult<Vec<Self>> {
        match raw {
            None => Ok(vec![JoinPair::new("id", "id")]),
            Some(Value::Array(items)) if !items.is_empty() => {
                items.iter().map(Self::from_json).collect()
            }
            Some(v @ Value::Object(_)) => Ok(vec![Self::from_json(v)?]),
            Some(_) => Err(IntentError::invalid_filter(
                "join_columns",
                "expected {a, b} or a non-empty list of them",
            )),
        }
    }

    fn from_json(raw: &Value) -> IntentResult<Self> {
        let obj = raw.as_object().ok_or_else(|| {
            IntentError::invalid_filter("join_columns", "each pair must be an object")
        })?;
        let side = |keys: [&str; 2]| -> IntentResult<String> {
            match keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null())) {
                None => Ok("id".to_string()),
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                Some(other) => Err(IntentError::invalid_filter(
                    "join_columns",
                    format!("column names must be strings, got {other}"),
                )),
            }
        };
        Ok(JoinPair {
            a: side(["a", "table1_column"])?,
            b: side(["b", "table2_column"])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_whitelist() {
        assert_eq!(Operator::parse(">=").unwrap(), Operator::Ge);
        assert_eq!(Operator::parse("ilike").unwrap(), Operator::ILike);
        assert_eq!(Operator::parse("is  not null").unwrap(), Operator::IsNotNull);
        for bad in ["<>", "==", "; DROP", "NOT IN", "REGEXP"] {
            assert!(matches!(
                Operator::parse(bad),
                Err(IntentError::UnsupportedOperator { .. })
            ));
        }
    }

    #[test]
    fn test_condition_default_operator_is_equality() {
        let c = Condition::from_json(&json!({"column": "id", "value": 7})).unwrap();
        assert_eq!(c.operator, Operator::Eq);
        assert_eq!(c.value, ConditionValue::Scalar(SqlValue::Int(7)));
    }

    #[test]
    fn test_condition_between_requires_pair() {
        let ok = Condition::from_json(
            &json!({"column": "score", "operator": "BETWEEN", "values": [80, 95]}),
        )
        .unwrap();
        assert_eq!(ok.value.params().len(), 2);

        let bad = Condition::from_json(
            &json!({"column": "score", "operator": "BETWEEN", "values": [80]}),
        );
        assert!(matches!(bad, Err(IntentError::InvalidFilter { .. })));
    }

    #[test]
    fn test_condition_in_requires_non_empty_list() {
        let ok = Condition::from_json(
            &json!({"column": "c", "operator": "IN", "value": ["a", "b", "c"]}),
        )
        .unwrap();
        assert_eq!(ok.value.params().len(), 3);

        let empty = Condition::from_json(&json!({"column": "c", "operator": "IN", "values": []}));
        assert!(matches!(empty, Err(IntentError::InvalidFilter { .. })));

        let scalar = Condition::from_json(&json!({"column": "c", "operator": "IN", "value": "a"}));
        assert!(scalar.is_err());
    }

    #[test]
    fn test_condition_null_checks_take_no_value() {
        let c = Condition::from_json(&json!({"column": "c", "operator": "IS NULL"})).unwrap();
        assert_eq!(c.value, ConditionValue::None);
        let c = Condition::from_json(&json!({"column": "c", "operator": "IS NOT NULL", "value": null}))
            .unwrap();
        assert!(c.value.params().is_empty());
        assert!(Condition::from_json(&json!({"column": "c", "operator": "IS NULL", "value": 1})).is_err());
    }

    #[test]
    fn test_condition_rejects_nested_values() {
        let c = Condition::from_json(&json!({"column": "c", "operator": "=", "value": {"x": 1}}));
        assert!(matches!(c, Err(IntentError::InvalidFilter { .. })));
    }

    #[test]
    fn test_order_request_defaults_to_asc() {
        let o = OrderRequest::from_json(&json!({"column": "name"})).unwrap();
        assert_eq!(o.direction, "ASC");
    }

    #[test]
    fn test_join_pairs() {
        assert_eq!(
            JoinPair::list_from_json(None).unwrap(),
            vec![JoinPair::new("id", "id")]
        );
        let legacy = json!({"table1_column": "id", "table2_column": "user_id"});
        assert_eq!(
            JoinPair::list_from_json(Some(&legacy)).unwrap(),
            vec![JoinPair::new("id", "user_id")]
        );
        let list = json!([{"a": "id", "b": "user_id"}, {"a": "region", "b": "region"}]);
        assert_eq!(JoinPair::list_from_json(Some(&list)).unwrap().len(), 2);
        assert!(JoinPair::list_from_json(Some(&json!("id"))).is_err());
    }
}
