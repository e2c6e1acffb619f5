//! # Intents
//!
//! An intent is the structured request handed to the compiler by the
//! upstream natural-language translator: an action tag plus a flat filter
//! map. The action tag is trusted to select a template; everything inside
//! the filter map is treated as untrusted input.
//!
//! ```json
//! {"action": "fetch-records",
//!  "filters": {"table": "users", "columns": ["id", "name"],
//!              "condition": {"column": "age", "operator": ">", "value": 25},
//!              "limit": 5}}
//! ```

mod filters;

pub use filters::{Condition, ConditionValue, JoinPair, Operator, OrderRequest};

use crate::error::{IntentError, IntentResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Closed set of supported actions, one per SQL template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListTables,
    FetchRecords,
    JoinedRecords,
    AppendedRecords,
    TableSummary,
    ColumnSummary,
    RelationshipAnalysis,
    FetchByEntity,
    CompareVariables,
    FilterByDate,
    CountUnits,
    CountEntities,
    GetEntityName,
}

impl Action {
    /// Resolve an action tag. Case-insensitive; `_` and `-` are interchangeable,
    /// and the legacy tag names (`fetch_n_records`, ...) are accepted.
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace('_', "-");
        let action = match normalized.as_str() {
            "list-tables" | "fetch-tables" => Action::ListTables,
            "fetch-records" | "fetch-n-records" => Action::FetchRecords,
            "joined-records" | "fetch-n-joined-records" => Action::JoinedRecords,
            "appended-records" | "fetch-n-appended-records" => Action::AppendedRecords,
            "table-summary" | "get-table-summary" => Action::TableSummary,
            "column-summary" | "summarize-column" => Action::ColumnSummary,
            "relationship-analysis" | "analyze-relationship" => Action::RelationshipAnalysis,
            "fetch-by-entity" => Action::FetchByEntity,
            "compare-variables" => Action::CompareVariables,
            "filter-by-date" => Action::FilterByDate,
            "count-units" => Action::CountUnits,
            "count-entities" => Action::CountEntities,
            "get-entity-name" => Action::GetEntityName,
            _ => return None,
        };
        Some(action)
    }

    /// Canonical tag
    pub fn tag(self) -> &'static str {
        match self {
            Action::ListTables => "list-tables",
            Action::FetchRecords => "fetch-records",
            Action::JoinedRecords => "joined-records",
            Action::AppendedRecords => "appended-records",
            Action::TableSummary => "table-summary",
            Action::ColumnSummary => "column-summary",
            Action::RelationshipAnalysis => "relationship-analysis",
            Action::FetchByEntity => "fetch-by-entity",
            Action::CompareVariables => "compare-variables",
            Action::FilterByDate => "filter-by-date",
            Action::CountUnits => "count-units",
            Action::CountEntities => "count-entities",
            Action::GetEntityName => "get-entity-name",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw intent as received from the translator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    #[serde(default)]
    pub filters: Map<String, Value>,
}

impl Intent {
    pub fn new(action: impl Into<String>, filters: Map<String, Value>) -> Self {
        Intent {
            action: action.into(),
            filters,
        }
    }

    /// Parse an intent from JSON text. A missing `filters` key is an empty map.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Read-only view over a filter map.
///
/// JSON `null` is treated the same as an absent key.
#[derive(Debug, Clone, Copy)]
pub struct Filters<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Filters<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Filters { map }
    }

    /// First non-null value among `key` and its aliases
    pub fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.map.get(*k))
            .find(|v| !v.is_null())
    }

    /// Optional string filter; non-string values are rejected
    pub fn string(&self, keys: &[&str]) -> IntentResult<Option<&'a str>> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(IntentError::invalid_filter(
                keys[0],
                format!("expected a string, got {other}"),
            )),
        }
    }

    /// Required string filter
    pub fn required_string(&self, keys: &[&str]) -> IntentResult<&'a str> {
        self.string(keys)?
            .ok_or_else(|| IntentError::missing_filter(keys[0]))
    }

    /// String or number filter rendered as text (identifiers such as `ent_id`
    /// are often emitted as bare numbers by the translator)
    pub fn scalar_text(&self, keys: &[&str]) -> IntentResult<Option<String>> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(IntentError::invalid_filter(
                keys[0],
                format!("expected a string or number, got {other}"),
            )),
        }
    }

    /// Optional numeric filter; numeric strings are accepted
    pub fn number(&self, keys: &[&str]) -> IntentResult<Option<f64>> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                IntentError::invalid_filter(keys[0], format!("'{s}' is not a number"))
            }),
            Some(other) => Err(IntentError::invalid_filter(
                keys[0],
                format!("expected a number, got {other}"),
            )),
        }
    }

    /// Optional list of strings; a single string counts as a one-element list
    pub fn string_list(&self, keys: &[&str]) -> IntentResult<Option<Vec<String>>> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(IntentError::invalid_filter(
                        keys[0],
                        format!("expected a list of strings, found {other}"),
                    )),
                })
                .collect::<IntentResult<Vec<_>>>()
                .map(|list| if list.is_empty() { None } else { Some(list) }),
            Some(other) => Err(IntentError::invalid_filter(
                keys[0],
                format!("expected a list of strings, got {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_action_parse_canonical_and_legacy() {
        assert_eq!(Action::parse("fetch-records"), Some(Action::FetchRecords));
        assert_eq!(Action::parse("fetch_n_records"), Some(Action::FetchRecords));
        assert_eq!(Action::parse("FETCH_TABLES"), Some(Action::ListTables));
        assert_eq!(
            Action::parse("analyze_relationship"),
            Some(Action::RelationshipAnalysis)
        );
        assert_eq!(Action::parse("compare_variables"), Some(Action::CompareVariables));
        assert_eq!(Action::parse("drop-table"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn test_action_tags_roundtrip() {
        let actions = [
            Action::ListTables,
            Action::FetchRecords,
            Action::JoinedRecords,
            Action::AppendedRecords,
            Action::TableSummary,
            Action::ColumnSummary,
            Action::RelationshipAnalysis,
            Action::FetchByEntity,
            Action::CompareVariables,
            Action::FilterByDate,
            Action::CountUnits,
            Action::CountEntities,
            Action::GetEntityName,
        ];
        for action in actions {
            assert_eq!(Action::parse(action.tag()), Some(action));
        }
    }

    #[test]
    fn test_intent_without_filters() {
        let intent = Intent::from_json(r#"{"action": "list-tables"}"#).unwrap();
        assert_eq!(intent.action, "list-tables");
        assert!(intent.filters.is_empty());
    }

    #[test]
    fn test_filters_aliases_and_null() {
        let m = map(json!({"table_name": "users", "table": null, "n": 3}));
        let f = Filters::new(&m);
        assert_eq!(f.required_string(&["table", "table_name"]).unwrap(), "users");
        assert_eq!(f.number(&["limit", "n"]).unwrap(), Some(3.0));
        assert!(f.string(&["missing"]).unwrap().is_none());
    }

    #[test]
    fn test_filters_type_errors() {
        let m = map(json!({"table": 5, "columns": [1, 2]}));
        let f = Filters::new(&m);
        assert!(matches!(
            f.string(&["table"]),
            Err(IntentError::InvalidFilter { .. })
        ));
        assert!(matches!(
            f.string_list(&["columns"]),
            Err(IntentError::InvalidFilter { .. })
        ));
        assert!(matches!(
            f.required_string(&["table_a"]),
            Err(IntentError::MissingFilter { .. })
        ));
    }

    #[test]
    fn test_scalar_text_accepts_numbers() {
        let m = map(json!({"ent_id": 42}));
        let f = Filters::new(&m);
        assert_eq!(f.scalar_text(&["ent_id"]).unwrap(), Some("42".to_string()));
    }
}
