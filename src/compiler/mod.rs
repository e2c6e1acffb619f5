//! # SQL Template Compiler
//!
//! One template per [`Action`]. Compilation is two-phase:
//!
//! 1. [`Compiler::validate`] reads the filter map, asks the schema catalog
//!    for every table it touches and runs each identifier through the
//!    validator. The result is a [`ValidatedIntent`] holding only
//!    whitelisted identifiers and bound values.
//! 2. [`ValidatedIntent::compile`] renders SQL text. It is synchronous and
//!    deterministic: the same validated intent always yields byte-identical
//!    text and parameter order.
//!
//! Unknown action tags are rejected before either phase runs.

mod aggregate;
mod domain;
mod records;
mod sql;

pub use aggregate::{ColumnSummaryArgs, RelationshipArgs, TableSummaryArgs};
pub(crate) use domain::is_entity_key;
pub use domain::{DomainArgs, DomainQuery, EntitySelector};
pub use records::{AppendArgs, FetchArgs, JoinArgs};
pub use sql::{CompiledPlan, CompiledQuery, ResultShape};

use crate::config::{Config, DomainConfig};
use crate::error::IntentResult;
use crate::intent::{Action, Filters};
use crate::schema::SchemaCatalog;
use crate::value::SqlValue;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Introspection query behind `list-tables`
pub const LIST_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = current_schema() ORDER BY table_name";

/// Compile-time knobs
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub default_limit: i64,
    pub max_limit: i64,
    pub sample_rows: i64,
    pub domain: DomainConfig,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CompilerSettings {
    pub fn from_config(config: &Config) -> Self {
        CompilerSettings {
            default_limit: config.execution.default_limit.max(1),
            max_limit: config.execution.max_limit.max(1),
            sample_rows: config.execution.sample_rows.max(1),
            domain: config.domain.clone(),
        }
    }

    /// Resolve a LIMIT filter: absent, non-numeric or non-positive values
    /// fall back to `fallback`; everything is clamped to `max_limit`.
    pub(crate) fn limit(&self, filters: &Filters<'_>, fallback: i64) -> i64 {
        let requested = filters
            .get(&["limit", "n"])
            .and_then(SqlValue::from_json)
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite() && *n >= 1.0)
            .map(|n| n as i64);
        requested.unwrap_or(fallback).min(self.max_limit)
    }
}

/// An intent whose identifiers have all been validated
#[derive(Debug, Clone)]
pub enum ValidatedIntent {
    ListTables,
    Fetch(FetchArgs),
    Join(JoinArgs),
    Append(AppendArgs),
    TableSummary(TableSummaryArgs),
    ColumnSummary(ColumnSummaryArgs),
    Relationship(RelationshipArgs),
    Domain(DomainArgs),
}

impl ValidatedIntent {
    /// Render SQL. Pure and deterministic.
    pub fn compile(&self) -> CompiledPlan {
        match self {
            ValidatedIntent::ListTables => CompiledPlan::rows(
                Action::ListTables,
                CompiledQuery::new(LIST_TABLES_SQL, Vec::new()),
            ),
            ValidatedIntent::Fetch(args) => args.compile(),
            ValidatedIntent::Join(args) => args.compile(),
            ValidatedIntent::Append(args) => args.compile(),
            ValidatedIntent::TableSummary(args) => args.compile(),
            ValidatedIntent::ColumnSummary(args) => args.compile(),
            ValidatedIntent::Relationship(args) => args.compile(),
            ValidatedIntent::Domain(args) => args.compile(),
        }
    }
}

/// Template compiler bound to a schema catalog
#[derive(Debug, Clone)]
pub struct Compiler {
    catalog: Arc<SchemaCatalog>,
    settings: CompilerSettings,
}

impl Compiler {
    pub fn new(catalog: Arc<SchemaCatalog>, settings: CompilerSettings) -> Self {
        Compiler { catalog, settings }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Phase one: check filters and identifiers against the catalog
    pub async fn validate(
        &self,
        action: Action,
        filters: &Map<String, Value>,
    ) -> IntentResult<ValidatedIntent> {
        let filters = Filters::new(filters);
        let catalog = self.catalog.as_ref();
        let settings = &self.settings;
        let validated = match action {
            Action::ListTables => ValidatedIntent::ListTables,
            Action::FetchRecords => {
                ValidatedIntent::Fetch(FetchArgs::validate(catalog, settings, &filters).await?)
            }
            Action::JoinedRecords => {
                ValidatedIntent::Join(JoinArgs::validate(catalog, settings, &filters).await?)
            }
            Action::AppendedRecords => {
                ValidatedIntent::Append(AppendArgs::validate(catalog, settings, &filters).await?)
            }
            Action::TableSummary => ValidatedIntent::TableSummary(
                TableSummaryArgs::validate(catalog, settings, &filters).await?,
            ),
            Action::ColumnSummary => ValidatedIntent::ColumnSummary(
                ColumnSummaryArgs::validate(catalog, &filters).await?,
            ),
            Action::RelationshipAnalysis => ValidatedIntent::Relationship(
                RelationshipArgs::validate(catalog, &filters).await?,
            ),
            domain_action => ValidatedIntent::Domain(
                DomainArgs::validate(domain_action, catalog, settings, &filters).await?,
            ),
        };
        Ok(validated)
    }

    /// Both phases
    pub async fn compile(
        &self,
        action: Action,
        filters: &Map<String, Value>,
    ) -> IntentResult<CompiledPlan> {
        let plan = self.validate(action, filters).await?.compile();
        debug!(
            action = %action,
            sql = %plan.sql_text(),
            params = plan.parameters().len(),
            "compiled intent"
        );
        Ok(plan)
    }
}
