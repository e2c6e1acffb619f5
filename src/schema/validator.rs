//! # Clause Validator
//!
//! Every identifier that ends up as literal SQL text passes through one of
//! these functions first. Column names are only ever emitted in the form
//! found in a [`TableSchema`]; join types and sort directions come from
//! fixed whitelists. Comparison values never become SQL text: they are
//! returned separately as bound parameters behind `%s` placeholders.
//!
//! One check is deliberately permissive: [`validate_columns`] answers an
//! unknown projection column with the table's full column list instead of
//! an error. The fallback list is schema-derived, so nothing from the
//! request reaches the SQL text either way.

use super::TableSchema;
use crate::error::{IntentError, IntentResult};
use crate::intent::{Condition, ConditionValue, JoinPair, OrderRequest};
use crate::value::SqlValue;
use std::collections::HashMap;
use tracing::warn;

/// Whitelisted join types, in their normalized spelling
pub const JOIN_TYPES: [&str; 5] = ["INNER", "LEFT", "RIGHT", "FULL", "FULL OUTER"];

/// A validated ORDER BY target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Schema-derived column, prefixed for joins
    pub column: String,
    pub direction: &'static str,
}

impl OrderBy {
    pub fn to_sql(&self) -> String {
        format!("ORDER BY {} {}", self.column, self.direction)
    }
}

/// A validated WHERE predicate: clause text plus its bound values
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub text: String,
    pub params: Vec<SqlValue>,
}

/// Split `table.column` into its parts
fn split_prefix(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once('.') {
        Some((table, column)) => (Some(table), column),
        None => (None, raw),
    }
}

/// Resolve `column` (optionally `table.`-prefixed) against one table.
/// Returns the catalog's spelling of the bare column.
fn resolve_single<'t>(table: &'t TableSchema, raw: &str) -> Option<&'t str> {
    let (prefix, column) = split_prefix(raw);
    if prefix.is_some_and(|p| p != table.name) {
        return None;
    }
    table
        .columns
        .iter()
        .find(|c| c.as_str() == column)
        .map(String::as_str)
}

/// Projection columns for a single table.
///
/// No columns requested, or any requested column unknown: every column of
/// the table, in ordinal order.
pub fn validate_columns(table: &TableSchema, requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return table.columns.clone();
    }
    let mut validated = Vec::with_capacity(requested.len());
    for raw in requested {
        match resolve_single(table, raw) {
            Some(column) => validated.push(column.to_string()),
            None => {
                warn!(
                    table = %table.name,
                    column = %raw,
                    "unknown column requested, selecting all columns"
                );
                return table.columns.clone();
            }
        }
    }
    validated
}

fn all_columns<'t>(a: &'t TableSchema, b: &'t TableSchema) -> Vec<(&'t str, &'t str)> {
    a.columns
        .iter()
        .map(|c| (a.name.as_str(), c.as_str()))
        .chain(b.columns.iter().map(|c| (b.name.as_str(), c.as_str())))
        .collect()
}

/// Projection for a two-table join, every item prefixed with its table.
///
/// Unprefixed names resolve to `table_a` first. A bare name projected from
/// both tables is aliased `<table>_<column>` so row keys stay unique. Any
/// unresolvable column falls back to every column of both tables.
pub fn validate_joined_columns(
    a: &TableSchema,
    b: &TableSchema,
    requested: &[String],
) -> Vec<String> {
    let resolved = if requested.is_empty() {
        all_columns(a, b)
    } else {
        let mut resolved = Vec::with_capacity(requested.len());
        for raw in requested {
            let hit = resolve_single(a, raw)
                .map(|c| (a.name.as_str(), c))
                .or_else(|| resolve_single(b, raw).map(|c| (b.name.as_str(), c)));
            match hit {
                Some(item) => resolved.push(item),
                None => {
                    warn!(
                        table_a = %a.name,
                        table_b = %b.name,
                        column = %raw,
                        "unknown join column requested, selecting all columns"
                    );
                    resolved = all_columns(a, b);
                    break;
                }
            }
        }
        resolved
    };

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (_, column) in &resolved {
        *seen.entry(*column).or_default() += 1;
    }
    resolved
        .iter()
        .map(|(table, column)| {
            if seen.get(column).copied().unwrap_or(0) > 1 {
                format!("{table}.{column} AS {table}_{column}")
            } else {
                format!("{table}.{column}")
            }
        })
        .collect()
}

/// Columns present in both tables, in `a`'s ordinal order
pub fn common_columns(a: &TableSchema, b: &TableSchema) -> IntentResult<Vec<String>> {
    let common: Vec<String> = a
        .columns
        .iter()
        .filter(|c| b.has_column(c))
        .cloned()
        .collect();
    if common.is_empty() {
        return Err(IntentError::NoCommonColumns {
            table_a: a.name.clone(),
            table_b: b.name.clone(),
        });
    }
    Ok(common)
}

/// Check each join pair against its side's catalog
pub fn validate_join_columns(
    a: &TableSchema,
    b: &TableSchema,
    pairs: &[JoinPair],
) -> IntentResult<Vec<JoinPair>> {
    pairs
        .iter()
        .map(|pair| -> IntentResult<JoinPair> {
            let left = resolve_single(a, &pair.a).ok_or_else(|| IntentError::InvalidJoinColumn {
                table: a.name.clone(),
                column: pair.a.clone(),
            })?;
            let right =
                resolve_single(b, &pair.b).ok_or_else(|| IntentError::InvalidJoinColumn {
                    table: b.name.clone(),
                    column: pair.b.clone(),
                })?;
            Ok(JoinPair::new(left, right))
        })
        .collect()
}

/// `ON` condition text for validated pairs
pub fn join_condition(a: &TableSchema, b: &TableSchema, pairs: &[JoinPair]) -> String {
    pairs
        .iter()
        .map(|p| format!("{}.{} = {}.{}", a.name, p.a, b.name, p.b))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Normalize a join type. Case-insensitive and idempotent.
pub fn validate_join_type(raw: &str) -> IntentResult<&'static str> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    JOIN_TYPES
        .iter()
        .find(|t| **t == normalized)
        .copied()
        .ok_or_else(|| IntentError::InvalidJoinType {
            join_type: raw.to_string(),
        })
}

/// Normalize a sort direction to ASC / DESC
pub fn validate_direction(raw: &str) -> IntentResult<&'static str> {
    match raw.trim().to_uppercase().as_str() {
        "ASC" => Ok("ASC"),
        "DESC" => Ok("DESC"),
        _ => Err(IntentError::InvalidSortDirection {
            direction: raw.to_string(),
        }),
    }
}

/// ORDER BY on a single table (or a union's common columns). A `table.`
/// prefix is accepted when it names this table; the output is unprefixed.
pub fn validate_order_by(table: &TableSchema, order: &OrderRequest) -> IntentResult<OrderBy> {
    let column = resolve_single(table, &order.column).ok_or_else(|| {
        IntentError::InvalidOrderColumn {
            table: table.name.clone(),
            column: order.column.clone(),
        }
    })?;
    Ok(OrderBy {
        column: column.to_string(),
        direction: validate_direction(&order.direction)?,
    })
}

/// ORDER BY over a join. Unprefixed columns must belong to exactly one side.
pub fn validate_order_by_for_join(
    a: &TableSchema,
    b: &TableSchema,
    order: &OrderRequest,
) -> IntentResult<OrderBy> {
    let column = match split_prefix(&order.column) {
        (Some(_), _) => {
            let hit = resolve_single(a, &order.column)
                .map(|c| (a, c))
                .or_else(|| resolve_single(b, &order.column).map(|c| (b, c)));
            let (table, column) = hit.ok_or_else(|| IntentError::InvalidOrderColumn {
                table: format!("{}, {}", a.name, b.name),
                column: order.column.clone(),
            })?;
            format!("{}.{column}", table.name)
        }
        (None, column) => match (a.has_column(column), b.has_column(column)) {
            (true, true) => {
                return Err(IntentError::AmbiguousColumn {
                    column: column.to_string(),
                    table_a: a.name.clone(),
                    table_b: b.name.clone(),
                })
            }
            (true, false) => format!("{}.{column}", a.name),
            (false, true) => format!("{}.{column}", b.name),
            (false, false) => {
                return Err(IntentError::InvalidOrderColumn {
                    table: format!("{}, {}", a.name, b.name),
                    column: column.to_string(),
                })
            }
        },
    };
    Ok(OrderBy {
        column,
        direction: validate_direction(&order.direction)?,
    })
}

/// Render a predicate on an already-validated column
fn render_condition(column: &str, condition: &Condition) -> WhereClause {
    let op = condition.operator.as_sql();
    let text = match &condition.value {
        ConditionValue::None => format!("{column} {op}"),
        ConditionValue::Scalar(_) => format!("{column} {op} %s"),
        ConditionValue::Pair(..) => format!("{column} {op} %s AND %s"),
        ConditionValue::List(items) => {
            let placeholders = vec!["%s"; items.len()].join(", ");
            format!("{column} {op} ({placeholders})")
        }
    };
    WhereClause {
        text,
        params: condition.value.params(),
    }
}

/// WHERE predicate on a single table. The column is emitted unprefixed.
pub fn parse_condition(condition: &Condition, table: &TableSchema) -> IntentResult<WhereClause> {
    let column =
        resolve_single(table, &condition.column).ok_or_else(|| IntentError::UnknownColumn {
            table: table.name.clone(),
            column: condition.column.clone(),
        })?;
    Ok(render_condition(column, condition))
}

/// WHERE predicate over a join. Unprefixed columns resolve to `a` first,
/// then `b`; the emitted column is always prefixed.
pub fn parse_join_condition(
    condition: &Condition,
    a: &TableSchema,
    b: &TableSchema,
) -> IntentResult<WhereClause> {
    let hit = resolve_single(a, &condition.column)
        .map(|c| (a, c))
        .or_else(|| resolve_single(b, &condition.column).map(|c| (b, c)));
    let (table, column) = hit.ok_or_else(|| IntentError::UnknownColumn {
        table: format!("{}, {}", a.name, b.name),
        column: condition.column.clone(),
    })?;
    Ok(render_condition(&format!("{}.{column}", table.name), condition))
}

/// Resolve a column of a union. A prefix may name either table; the
/// column must be one both branches have.
fn resolve_union<'c>(
    a: &TableSchema,
    b: &TableSchema,
    common: &'c [String],
    raw: &str,
) -> Option<&'c str> {
    let (prefix, column) = split_prefix(raw);
    if prefix.is_some_and(|p| p != a.name && p != b.name) {
        return None;
    }
    common
        .iter()
        .find(|c| c.as_str() == column)
        .map(String::as_str)
}

/// WHERE predicate applied to both branches of a union. Emitted unprefixed.
pub fn parse_union_condition(
    condition: &Condition,
    a: &TableSchema,
    b: &TableSchema,
    common: &[String],
) -> IntentResult<WhereClause> {
    let column = resolve_union(a, b, common, &condition.column).ok_or_else(|| {
        IntentError::UnknownColumn {
            table: format!("{}, {}", a.name, b.name),
            column: condition.column.clone(),
        }
    })?;
    Ok(render_condition(column, condition))
}

/// ORDER BY over a union's common columns
pub fn validate_union_order_by(
    a: &TableSchema,
    b: &TableSchema,
    common: &[String],
    order: &OrderRequest,
) -> IntentResult<OrderBy> {
    let column = resolve_union(a, b, common, &order.column).ok_or_else(|| {
        IntentError::InvalidOrderColumn {
            table: format!("{}, {}", a.name, b.name),
            column: order.column.clone(),
        }
    })?;
    Ok(OrderBy {
        column: column.to_string(),
        direction: validate_direction(&order.direction)?,
    })
}

/// Single column that must exist (GROUP BY / aggregate targets)
pub fn require_column(table: &TableSchema, raw: &str) -> IntentResult<String> {
    resolve_single(table, raw)
        .map(str::to_string)
        .ok_or_else(|| IntentError::UnknownColumn {
            table: table.name.clone(),
            column: raw.to_string(),
        })
}
