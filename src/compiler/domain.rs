//! Domain templates over the fixed entity chain
//! `entities ← units ← observations` (names from [`DomainConfig`]).
//!
//! Every action selects one entity, either by identifier or by name. Name
//! lookups resolve through a scalar subquery instead of a join.

use super::sql::{CompiledPlan, SelectBuilder};
use super::CompilerSettings;
use crate::config::DomainConfig;
use crate::error::{IntentError, IntentResult};
use crate::intent::{Action, Filters};
use crate::schema::validator;
use crate::schema::SchemaCatalog;
use crate::value::SqlValue;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

const ENTITY_ID: &[&str] = &["ent_id", "entity_id"];
const ENTITY_NAME: &[&str] = &["company_name", "entity_name"];

/// Filter keys that select the entity of a domain action
pub(crate) fn is_entity_key(key: &str) -> bool {
    ENTITY_ID.contains(&key) || ENTITY_NAME.contains(&key)
}

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date pattern"));

/// Parse a `YYYY-MM-DD` date that also exists on the calendar
pub fn validate_date(raw: &str) -> IntentResult<String> {
    let raw = raw.trim();
    if DATE_PATTERN.is_match(raw) && NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        Ok(raw.to_string())
    } else {
        Err(IntentError::InvalidDateFormat {
            value: raw.to_string(),
        })
    }
}

/// Normalize a relative-difference threshold: values above 1 are
/// percentages, values in [0, 1] are already fractions.
pub fn normalize_threshold(raw: f64) -> IntentResult<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return Err(IntentError::invalid_filter(
            "percentage_threshold",
            format!("threshold must be a non-negative number, got {raw}"),
        ));
    }
    Ok(if raw > 1.0 { raw / 100.0 } else { raw })
}

/// Which entity an action is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySelector {
    Id(String),
    Name(String),
}

impl EntitySelector {
    /// Identifier wins over name when both are present
    pub fn from_filters(action: Action, filters: &Filters<'_>) -> IntentResult<Self> {
        let id = filters.scalar_text(ENTITY_ID)?;
        let name = filters.scalar_text(ENTITY_NAME)?;
        match (id, name) {
            (Some(id), Some(name)) => {
                warn!(
                    action = %action,
                    ent_id = %id,
                    company_name = %name,
                    "both entity identifier and name given, using the identifier"
                );
                Ok(EntitySelector::Id(id))
            }
            (Some(id), None) => Ok(EntitySelector::Id(id)),
            (None, Some(name)) => Ok(EntitySelector::Name(name)),
            (None, None) => Err(IntentError::MissingIdentifier {
                action: action.tag().to_string(),
            }),
        }
    }

    /// `<column> = %s`, or `<column> = (name subquery)` for names
    fn predicate(&self, column: &str, d: &DomainConfig) -> (String, Vec<SqlValue>) {
        match self {
            EntitySelector::Id(id) => (format!("{column} = %s"), vec![SqlValue::text(id.as_str())]),
            EntitySelector::Name(name) => (
                format!(
                    "{column} = (SELECT {id} FROM {entities} WHERE {name_col} ILIKE %s LIMIT 1)",
                    id = d.entity_id,
                    entities = d.entity_table,
                    name_col = d.entity_name,
                ),
                vec![SqlValue::text(name.as_str())],
            ),
        }
    }
}

/// Per-action arguments
#[derive(Debug, Clone, PartialEq)]
pub enum DomainQuery {
    FetchByEntity {
        variables: Option<Vec<String>>,
    },
    CompareVariables {
        variable_x: String,
        variable_y: String,
        /// Fraction, already normalized
        threshold: Option<f64>,
    },
    FilterByDate {
        date: String,
        end_date: Option<String>,
        variables: Option<Vec<String>>,
    },
    CountUnits,
    CountEntities,
    GetEntityName,
}

/// Validated domain intent
#[derive(Debug, Clone)]
pub struct DomainArgs {
    pub action: Action,
    pub entity: EntitySelector,
    pub query: DomainQuery,
    pub limit: i64,
    pub names: DomainConfig,
}

impl DomainArgs {
    pub(crate) async fn validate(
        action: Action,
        catalog: &SchemaCatalog,
        settings: &CompilerSettings,
        filters: &Filters<'_>,
    ) -> IntentResult<Self> {
        let entity = EntitySelector::from_filters(action, filters)?;
        let variables = || filters.string_list(&["variables", "variable"]);
        let query = match action {
            Action::FetchByEntity => DomainQuery::FetchByEntity {
                variables: variables()?,
            },
            Action::CompareVariables => DomainQuery::CompareVariables {
                variable_x: filters.required_string(&["variable_x"])?.to_string(),
                variable_y: filters.required_string(&["variable_y"])?.to_string(),
                threshold: filters
                    .number(&["percentage_threshold", "threshold"])?
                    .map(normalize_threshold)
                    .transpose()?,
            },
            Action::FilterByDate => DomainQuery::FilterByDate {
                date: validate_date(filters.required_string(&["date", "start_date"])?)?,
                end_date: filters
                    .string(&["end_date"])?
                    .map(validate_date)
                    .transpose()?,
                variables: variables()?,
            },
            Action::CountUnits => DomainQuery::CountUnits,
            Action::CountEntities => DomainQuery::CountEntities,
            Action::GetEntityName => DomainQuery::GetEntityName,
            other => {
                return Err(IntentError::UnsupportedAction {
                    action: other.tag().to_string(),
                })
            }
        };

        let names = settings.domain.clone();
        Self::check_chain(catalog, &names, &query).await?;

        Ok(DomainArgs {
            action,
            entity,
            query,
            limit: settings.limit(filters, settings.default_limit),
            names,
        })
    }

    /// The configured chain names are identifiers like any other: check the
    /// ones this action will render against the catalog
    async fn check_chain(
        catalog: &SchemaCatalog,
        d: &DomainConfig,
        query: &DomainQuery,
    ) -> IntentResult<()> {
        let entities = catalog.columns_of(&d.entity_table).await?;
        validator::require_column(&entities, &d.entity_id)?;
        validator::require_column(&entities, &d.entity_name)?;
        if matches!(query, DomainQuery::CountEntities | DomainQuery::GetEntityName) {
            return Ok(());
        }

        let units = catalog.columns_of(&d.unit_table).await?;
        for column in [&d.unit_id, &d.unit_entity, &d.unit_name] {
            validator::require_column(&units, column)?;
        }
        if matches!(query, DomainQuery::CountUnits) {
            return Ok(());
        }

        let observations = catalog.columns_of(&d.observation_table).await?;
        for column in [&d.observation_unit, &d.variable, &d.value, &d.date] {
            validator::require_column(&observations, column)?;
        }
        Ok(())
    }

    pub fn compile(&self) -> CompiledPlan {
        let d = &self.names;
        let (ent, unit, obs) = (&d.entity_table, &d.unit_table, &d.observation_table);
        let unit_owner = format!("{unit}.{}", d.unit_entity);

        let query = match &self.query {
            DomainQuery::FetchByEntity { variables } => {
                let mut predicates = vec![self.entity.predicate(&unit_owner, d)];
                if let Some(vars) = variables {
                    predicates.push(in_list(&format!("{obs}.{}", d.variable), vars));
                }
                SelectBuilder::new(&self.observation_projection(true), &self.observation_chain(true))
                    .filter(predicates)
                    .push(&format!("ORDER BY {obs}.{} DESC", d.date))
                    .limit(self.limit)
                    .build()
            }
            DomainQuery::CompareVariables {
                variable_x,
                variable_y,
                threshold,
            } => {
                let diff = format!(
                    "ABS(x.{v} - y.{v}) / NULLIF(ABS(x.{v}), 0)",
                    v = d.value
                );
                let projection = format!(
                    "x.{ou} AS {ou}, x.{date} AS {date}, x.{v} AS value_x, y.{v} AS value_y, \
                     {diff} AS relative_difference",
                    ou = d.observation_unit,
                    date = d.date,
                    v = d.value,
                );
                let from = format!(
                    "{obs} x JOIN {obs} y ON x.{ou} = y.{ou} AND x.{date} = y.{date} \
                     JOIN {unit} ON x.{ou} = {unit}.{uid}",
                    ou = d.observation_unit,
                    date = d.date,
                    uid = d.unit_id,
                );
                let mut predicates = vec![
                    self.entity.predicate(&unit_owner, d),
                    (
                        format!("x.{} = %s", d.variable),
                        vec![SqlValue::text(variable_x.as_str())],
                    ),
                    (
                        format!("y.{} = %s", d.variable),
                        vec![SqlValue::text(variable_y.as_str())],
                    ),
                ];
                if let Some(threshold) = threshold {
                    predicates.push((format!("{diff} > %s"), vec![SqlValue::Float(*threshold)]));
                }
                SelectBuilder::new(&projection, &from)
                    .filter(predicates)
                    .push(&format!("ORDER BY x.{} DESC", d.date))
                    .limit(self.limit)
                    .build()
            }
            DomainQuery::FilterByDate {
                date,
                end_date,
                variables,
            } => {
                let date_col = format!("{obs}.{}", d.date);
                let mut predicates = vec![self.entity.predicate(&unit_owner, d)];
                predicates.push(match end_date {
                    Some(end) => (
                        format!("{date_col} BETWEEN %s AND %s"),
                        vec![SqlValue::text(date.as_str()), SqlValue::text(end.as_str())],
                    ),
                    None => (
                        format!("{date_col} = %s"),
                        vec![SqlValue::text(date.as_str())],
                    ),
                });
                if let Some(vars) = variables {
                    predicates.push(in_list(&format!("{obs}.{}", d.variable), vars));
                }
                SelectBuilder::new(&self.observation_projection(false), &self.observation_chain(false))
                    .filter(predicates)
                    .push(&format!("ORDER BY {date_col} DESC"))
                    .limit(self.limit)
                    .build()
            }
            DomainQuery::CountUnits => SelectBuilder::new("COUNT(*) AS unit_count", unit)
                .filter(vec![self.entity.predicate(&unit_owner, d)])
                .build(),
            DomainQuery::CountEntities => {
                let predicate = match &self.entity {
                    EntitySelector::Id(id) => (
                        format!("{} = %s", d.entity_id),
                        vec![SqlValue::text(id.as_str())],
                    ),
                    EntitySelector::Name(name) => (
                        format!("{} ILIKE %s", d.entity_name),
                        vec![SqlValue::text(format!("%{name}%"))],
                    ),
                };
                SelectBuilder::new("COUNT(*) AS entity_count", ent)
                    .filter(vec![predicate])
                    .build()
            }
            DomainQuery::GetEntityName => {
                SelectBuilder::new(&format!("{}, {}", d.entity_id, d.entity_name), ent)
                    .filter(vec![self.entity.predicate(&d.entity_id, d)])
                    .push("LIMIT 1")
                    .build()
            }
        };
        CompiledPlan::rows(self.action, query)
    }

    fn observation_projection(&self, with_entity: bool) -> String {
        let d = &self.names;
        let (ent, unit, obs) = (&d.entity_table, &d.unit_table, &d.observation_table);
        let mut items = Vec::with_capacity(7);
        if with_entity {
            items.push(format!("{ent}.{}", d.entity_id));
            items.push(format!("{ent}.{}", d.entity_name));
        }
        items.push(format!("{unit}.{}", d.unit_id));
        items.push(format!("{unit}.{}", d.unit_name));
        items.push(format!("{obs}.{}", d.variable));
        items.push(format!("{obs}.{}", d.value));
        items.push(format!("{obs}.{}", d.date));
        items.join(", ")
    }

    fn observation_chain(&self, with_entity: bool) -> String {
        let d = &self.names;
        let (ent, unit, obs) = (&d.entity_table, &d.unit_table, &d.observation_table);
        let mut chain = format!(
            "{obs} JOIN {unit} ON {obs}.{} = {unit}.{}",
            d.observation_unit, d.unit_id
        );
        if with_entity {
            chain.push_str(&format!(
                " JOIN {ent} ON {unit}.{} = {ent}.{}",
                d.unit_entity, d.entity_id
            ));
        }
        chain
    }
}

fn in_list(column: &str, values: &[String]) -> (String, Vec<SqlValue>) {
    let placeholders = vec!["%s"; values.len()].join(", ");
    (
        format!("{column} IN ({placeholders})"),
        values.iter().map(|v| SqlValue::text(v.as_str())).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticSchema;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(Arc::new(
            StaticSchema::new()
                .with_table("entities", ["ent_id", "company_name"])
                .with_table("units", ["unit_id", "ent_id", "unit_name"])
                .with_table("observations", ["unit_id", "variable", "value", "ref_date"]),
        ))
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    async fn compile(action: Action, value: Value) -> IntentResult<CompiledPlan> {
        let m = map(value);
        let args = DomainArgs::validate(
            action,
            &catalog(),
            &CompilerSettings::default(),
            &Filters::new(&m),
        )
        .await?;
        Ok(args.compile())
    }

    #[test]
    fn test_threshold_normalization() {
        assert_eq!(normalize_threshold(20.0).unwrap(), 0.2);
        assert_eq!(normalize_threshold(0.2).unwrap(), 0.2);
        assert_eq!(normalize_threshold(1.0).unwrap(), 1.0);
        assert_eq!(normalize_threshold(0.0).unwrap(), 0.0);
        assert!(normalize_threshold(-5.0).is_err());
    }

    #[test]
    fn test_date_validation() {
        assert_eq!(validate_date("2024-02-29").unwrap(), "2024-02-29");
        for bad in ["2023-02-29", "2024-13-01", "24-01-01", "2024/01/01", "yesterday", "2024-01-01x"] {
            assert!(matches!(
                validate_date(bad),
                Err(IntentError::InvalidDateFormat { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_compare_variables_threshold_bound_as_fraction() {
        let plan = compile(
            Action::CompareVariables,
            json!({
                "variable_x": "revenue",
                "variable_y": "profit",
                "percentage_threshold": 20,
                "ent_id": "000"
            }),
        )
        .await
        .unwrap();
        let params = plan.parameters();
        assert_eq!(
            params,
            vec![
                SqlValue::text("000"),
                SqlValue::text("revenue"),
                SqlValue::text("profit"),
                SqlValue::Float(0.2),
                SqlValue::Int(5),
            ]
        );
        assert!(!plan.sql_text().contains("20"));
        assert!(plan
            .sql_text()
            .contains("ABS(x.value - y.value) / NULLIF(ABS(x.value), 0) > %s"));
    }

    #[tokio::test]
    async fn test_name_resolved_by_subquery() {
        let plan = compile(Action::CountUnits, json!({"company_name": "Acme"}))
            .await
            .unwrap();
        assert_eq!(
            plan.sql_text(),
            "SELECT COUNT(*) AS unit_count FROM units WHERE units.ent_id = \
             (SELECT ent_id FROM entities WHERE company_name ILIKE %s LIMIT 1)"
        );
        assert_eq!(plan.parameters(), vec![SqlValue::text("Acme")]);
    }

    #[tokio::test]
    async fn test_identifier_wins_over_name() {
        let plan = compile(
            Action::GetEntityName,
            json!({"ent_id": 42, "company_name": "Acme"}),
        )
        .await
        .unwrap();
        assert_eq!(
            plan.sql_text(),
            "SELECT ent_id, company_name FROM entities WHERE ent_id = %s LIMIT 1"
        );
        assert_eq!(plan.parameters(), vec![SqlValue::text("42")]);
    }

    #[tokio::test]
    async fn test_missing_identifier() {
        for action in [Action::FetchByEntity, Action::CountEntities, Action::FilterByDate] {
            let err = compile(action, json!({"date": "2024-01-01"})).await.unwrap_err();
            assert!(matches!(err, IntentError::MissingIdentifier { .. }));
        }
    }

    #[tokio::test]
    async fn test_filter_by_date_range() {
        let plan = compile(
            Action::FilterByDate,
            json!({"ent_id": "7", "date": "2024-01-01", "end_date": "2024-03-31"}),
        )
        .await
        .unwrap();
        assert!(plan
            .sql_text()
            .contains("observations.ref_date BETWEEN %s AND %s"));
        assert_eq!(plan.parameters().len(), 4);

        let err = compile(
            Action::FilterByDate,
            json!({"ent_id": "7", "date": "01/02/2024"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntentError::InvalidDateFormat { .. }));
    }

    #[tokio::test]
    async fn test_fetch_by_entity_variables() {
        let plan = compile(
            Action::FetchByEntity,
            json!({"ent_id": "7", "variables": ["revenue", "profit"], "limit": 20}),
        )
        .await
        .unwrap();
        let sql = plan.sql_text();
        assert!(sql.starts_with(
            "SELECT entities.ent_id, entities.company_name, units.unit_id, units.unit_name, \
             observations.variable, observations.value, observations.ref_date \
             FROM observations JOIN units ON observations.unit_id = units.unit_id \
             JOIN entities ON units.ent_id = entities.ent_id"
        ));
        assert!(sql.contains("observations.variable IN (%s, %s)"));
        assert!(sql.ends_with("ORDER BY observations.ref_date DESC LIMIT %s"));
        assert_eq!(plan.parameters().last(), Some(&SqlValue::Int(20)));
    }

    #[tokio::test]
    async fn test_count_entities_by_name_uses_contains() {
        let plan = compile(Action::CountEntities, json!({"entity_name": "acme"}))
            .await
            .unwrap();
        assert_eq!(
            plan.sql_text(),
            "SELECT COUNT(*) AS entity_count FROM entities WHERE company_name ILIKE %s"
        );
        assert_eq!(plan.parameters(), vec![SqlValue::text("%acme%")]);
    }
}
