//! PostgreSQL backend.
//!
//! Opens one `tokio-postgres` connection per call, with the configured
//! schema as its `search_path`. Compiled `%s` placeholders are rewritten to
//! `$1..$n`; each value is converted to the type the server inferred for
//! its placeholder. Placeholders of a type without a native binding (e.g.
//! `interval`) are sent as text and cast server-side.
//!
//! Result columns are decoded with the driver's own `FromSql` impls. A
//! statement returning columns of any other type is wrapped so those
//! columns come back as their text form.

use super::{Connection, Database};
use crate::compiler::CompiledQuery;
use crate::config::DatabaseConfig;
use crate::error::{IntentError, IntentResult};
use crate::result::Row;
use crate::schema::SchemaSource;
use crate::value::SqlValue;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::Write as _;
use std::time::Duration;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1 \
     ORDER BY ordinal_position";

type Param = Box<dyn ToSql + Sync + Send>;

/// Result column types with a JSON mapping in `decode_cell`
const DECODABLE: [Type; 28] = [
    Type::BOOL,
    Type::INT2,
    Type::INT4,
    Type::INT8,
    Type::OID,
    Type::FLOAT4,
    Type::FLOAT8,
    Type::NUMERIC,
    Type::TEXT,
    Type::VARCHAR,
    Type::BPCHAR,
    Type::NAME,
    Type::DATE,
    Type::TIME,
    Type::TIMESTAMP,
    Type::TIMESTAMPTZ,
    Type::JSON,
    Type::JSONB,
    Type::UUID,
    Type::BYTEA,
    Type::BOOL_ARRAY,
    Type::INT2_ARRAY,
    Type::INT4_ARRAY,
    Type::INT8_ARRAY,
    Type::FLOAT8_ARRAY,
    Type::NUMERIC_ARRAY,
    Type::TEXT_ARRAY,
    Type::VARCHAR_ARRAY,
];

/// Connection factory for one PostgreSQL database
pub struct PostgresDatabase {
    config: tokio_postgres::Config,
    schema: String,
}

impl PostgresDatabase {
    pub fn from_config(db: &DatabaseConfig) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&db.host)
            .port(db.port)
            .user(&db.user)
            .dbname(&db.dbname)
            .application_name("intentsql")
            .options(&format!("-c search_path={}", db.schema.replace(' ', "\\ ")));
        if let Some(password) = &db.password {
            config.password(password);
        }
        if db.connect_timeout_ms > 0 {
            config.connect_timeout(Duration::from_millis(db.connect_timeout_ms));
        }
        PostgresDatabase {
            config,
            schema: db.schema.clone(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Open a connection and spawn its driver task
    pub async fn open(&self) -> IntentResult<PostgresConnection> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Postgres connection error: {}", e);
            }
        });
        debug!(schema = %self.schema, "connection opened");
        Ok(PostgresConnection { client })
    }
}

impl std::fmt::Debug for PostgresDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDatabase")
            .field("hosts", &self.config.get_hosts())
            .field("dbname", &self.config.get_dbname())
            .field("schema", &self.schema)
            .finish()
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn connect(&self) -> IntentResult<Box<dyn Connection>> {
        Ok(Box::new(self.open().await?))
    }
}

#[async_trait]
impl SchemaSource for PostgresDatabase {
    async fn list_tables(&self) -> IntentResult<Vec<String>> {
        let conn = self.open().await?;
        let rows = conn.client.query(TABLES_SQL, &[]).await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<_, String>(0)?))
            .collect()
    }

    async fn table_columns(&self, table: &str) -> IntentResult<Vec<String>> {
        let conn = self.open().await?;
        let rows = conn.client.query(COLUMNS_SQL, &[&table]).await?;
        rows.iter()
            .map(|row| Ok(row.try_get::<_, String>(0)?))
            .collect()
    }
}

/// One open connection; closed when dropped
pub struct PostgresConnection {
    client: Client,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn query(&mut self, query: &CompiledQuery) -> IntentResult<Vec<Row>> {
        if query.placeholder_count() != query.parameters.len() {
            return Err(IntentError::DatabaseError {
                message: format!(
                    "statement has {} placeholders but {} parameters",
                    query.placeholder_count(),
                    query.parameters.len()
                ),
            });
        }

        let plain = numbered(&query.sql_text, &[]);
        let described = self.client.prepare(&plain).await?;
        let casts: Vec<Option<String>> = described
            .params()
            .iter()
            .map(|ty| (!is_native(ty)).then(|| type_reference(ty)))
            .collect();
        let cast_sql = casts
            .iter()
            .any(Option::is_some)
            .then(|| numbered(&query.sql_text, &casts));

        let columns: Vec<(&str, &Type)> = described
            .columns()
            .iter()
            .map(|c| (c.name(), c.type_()))
            .collect();
        let wrapped = text_projection(cast_sql.as_deref().unwrap_or(&plain), &columns)?;

        let statement = match wrapped.or(cast_sql) {
            Some(sql) => {
                debug!(sql = %sql, "statement rewritten");
                self.client.prepare(&sql).await?
            }
            None => described,
        };

        let params = query
            .parameters
            .iter()
            .zip(statement.params())
            .enumerate()
            .map(|(i, (value, ty))| bind(value, ty, i + 1))
            .collect::<IntentResult<Vec<Param>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect();

        let rows = self.client.query(&statement, &refs).await?;
        rows.iter().map(decode_row).collect()
    }
}

/// `%s` → `$n`, with `::text::<type>` appended where `casts` says so
fn numbered(sql: &str, casts: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    for (i, part) in sql.split("%s").enumerate() {
        if i > 0 {
            let _ = write!(out, "${i}");
            if let Some(Some(ty)) = casts.get(i - 1) {
                let _ = write!(out, "::text::{ty}");
            }
        }
        out.push_str(part);
    }
    out
}

fn is_native(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
            | Type::DATE
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
    )
}

fn is_decodable(ty: &Type) -> bool {
    DECODABLE.contains(ty)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap `sql` so columns without a JSON mapping are returned as text.
/// `None` when every column decodes as is.
fn text_projection(sql: &str, columns: &[(&str, &Type)]) -> IntentResult<Option<String>> {
    if columns.iter().all(|(_, ty)| is_decodable(ty)) {
        return Ok(None);
    }
    let mut seen = HashSet::new();
    let mut projection = Vec::with_capacity(columns.len());
    for (name, ty) in columns {
        if !seen.insert(*name) {
            return Err(IntentError::DatabaseError {
                message: format!(
                    "cannot convert column '{name}' of type {ty}: duplicate column name in result"
                ),
            });
        }
        let ident = quote_ident(name);
        projection.push(if is_decodable(ty) {
            format!("q.{ident}")
        } else {
            format!("q.{ident}::text AS {ident}")
        });
    }
    Ok(Some(format!(
        "SELECT {} FROM ({sql}) AS q",
        projection.join(", ")
    )))
}

fn type_reference(ty: &Type) -> String {
    if ty.schema() == "pg_catalog" {
        ty.name().to_string()
    } else {
        format!("\"{}\".\"{}\"", ty.schema(), ty.name())
    }
}

/// Convert one parameter to the type of its placeholder. The statement
/// has already been sent for preparation, so a mismatch is a database error.
fn bind(value: &SqlValue, ty: &Type, position: usize) -> IntentResult<Param> {
    let mismatch = || IntentError::DatabaseError {
        message: format!("cannot bind parameter ${position} ({value}) as {ty}"),
    };
    if value.is_null() {
        return Ok(null_of(ty));
    }
    let param: Param = match *ty {
        Type::BOOL => Box::new(as_bool(value).ok_or_else(mismatch)?),
        Type::INT2 => Box::new(
            value
                .as_i64()
                .and_then(|i| i16::try_from(i).ok())
                .ok_or_else(mismatch)?,
        ),
        Type::INT4 => Box::new(
            value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(mismatch)?,
        ),
        Type::INT8 => Box::new(value.as_i64().ok_or_else(mismatch)?),
        Type::FLOAT4 => Box::new(value.as_f64().ok_or_else(mismatch)? as f32),
        Type::FLOAT8 => Box::new(value.as_f64().ok_or_else(mismatch)?),
        Type::NUMERIC => Box::new(as_decimal(value).ok_or_else(mismatch)?),
        Type::DATE => Box::new(
            value
                .as_text()
                .and_then(|s| parse_date(&s))
                .ok_or_else(mismatch)?,
        ),
        Type::TIMESTAMP => Box::new(
            value
                .as_text()
                .and_then(|s| parse_timestamp(&s))
                .ok_or_else(mismatch)?,
        ),
        Type::TIMESTAMPTZ => Box::new(
            value
                .as_text()
                .and_then(|s| parse_timestamptz(&s))
                .ok_or_else(mismatch)?,
        ),
        // text types and placeholders cast from text
        _ => Box::new(value.as_text().ok_or_else(mismatch)?),
    };
    Ok(param)
}

fn null_of(ty: &Type) -> Param {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::NUMERIC => Box::new(None::<Decimal>),
        Type::DATE => Box::new(None::<NaiveDate>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<DateTime<Utc>>),
        _ => Box::new(None::<String>),
    }
}

fn as_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(0) => Some(false),
        SqlValue::Int(1) => Some(true),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Some(true),
            "false" | "f" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_decimal(value: &SqlValue) -> Option<Decimal> {
    match value {
        SqlValue::Int(i) => Some(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::from_f64(*f),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Date-only values mean midnight
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// RFC 3339, or a naive timestamp taken as UTC
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_timestamp(s).map(|n| n.and_utc()))
}

fn decode_row(row: &tokio_postgres::Row) -> IntentResult<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = decode_cell(row, idx, ty).map_err(|err| IntentError::DatabaseError {
            message: format!("cannot decode column '{}' of type {ty}: {err}", column.name()),
        })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_cell(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Result<Value, Box<dyn Error + Sync + Send>> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(float),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        }
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| Value::String(t.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|d| Value::String(d.to_rfc3339())),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::String(u.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| Value::String(bytea_hex(&b))),
        Type::BOOL_ARRAY => array(row, idx, Value::Bool)?,
        Type::INT2_ARRAY => array(row, idx, |v: i16| Value::from(v))?,
        Type::INT4_ARRAY => array(row, idx, |v: i32| Value::from(v))?,
        Type::INT8_ARRAY => array(row, idx, |v: i64| Value::from(v))?,
        Type::FLOAT8_ARRAY => array(row, idx, float)?,
        Type::NUMERIC_ARRAY => array(row, idx, decimal)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => array(row, idx, Value::String)?,
        _ => return Err(format!("no JSON mapping for type {ty}").into()),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// One-dimensional array; NULL elements stay null
fn array<'a, T, F>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    to_json: F,
) -> Result<Option<Value>, tokio_postgres::Error>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    Ok(row.try_get::<_, Option<Vec<Option<T>>>>(idx)?.map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &to_json))
                .collect(),
        )
    }))
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Integral values exactly, others as f64
fn decimal(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }
    d.to_f64()
        .map_or_else(|| Value::String(d.to_string()), float)
}

/// Postgres' own hex output format
fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
