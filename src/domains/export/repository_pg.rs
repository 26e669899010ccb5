use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, PgPool, Row, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{DbError, DbResult, ExportError, ExportResult};
use crate::types::SqlValue;

use super::repository::{ledger_insert_sql, quote_ident, quote_qualified, LedgerRepository, RelationalSource};
use super::types::{LedgerEntry, RowSet, SourceColumn};

/// Views of one PostgreSQL schema as export datasets.
pub struct PostgresExportRepository {
    pool: PgPool,
    schema: String,
    ledger_table: String,
}

impl PostgresExportRepository {
    pub fn new(pool: PgPool, schema: &str, ledger_table: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            ledger_table: qualified_ledger_table(schema, ledger_table),
        }
    }

    async fn fetch_rows(&self, dataset: &str) -> DbResult<RowSet> {
        let relation = format!("{}.{}", quote_ident(&self.schema), quote_ident(dataset));

        // Prepared separately so an empty view still reports its columns
        let shape_sql = format!("SELECT * FROM {}", relation);
        let statement = (&self.pool).prepare(shape_sql.as_str()).await?;
        let columns: Vec<SourceColumn> = statement
            .columns()
            .iter()
            .map(|c| SourceColumn::new(c.name(), c.type_info().name()))
            .collect();
        let plans: Vec<ReadAs> = columns.iter().map(|c| read_plan(&c.declared_type)).collect();
        for (column, plan) in columns.iter().zip(&plans) {
            if *plan == ReadAs::Text {
                log::debug!(
                    "Dataset {}: reading column {} ({}) as text",
                    dataset,
                    column.name,
                    column.declared_type
                );
            }
        }

        let sql = format!("SELECT {} FROM {}", select_list(&columns), relation);
        let fetched = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut rows = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                values.push(decode_value(row, index, column, plans[index])?);
            }
            rows.push(values);
        }

        Ok(RowSet::new(columns, rows))
    }
}

/// Qualify an unqualified ledger table with the source schema and quote it.
fn qualified_ledger_table(schema: &str, table: &str) -> String {
    if table.contains('.') {
        quote_qualified(table)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(table))
    }
}

/// How a column is fetched from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadAs {
    Native,
    /// Cast to text, then parsed; values beyond `Decimal` range survive.
    Numeric,
    /// Cast to text and kept as a string.
    Text,
}

fn read_plan(type_name: &str) -> ReadAs {
    match type_name {
        "NUMERIC" => ReadAs::Numeric,
        "BOOL" | "INT2" | "INT4" | "INT8" | "FLOAT4" | "FLOAT8" | "TEXT" | "VARCHAR" | "BPCHAR" | "NAME"
        | "CITEXT" | "DATE" | "TIME" | "TIMESTAMP" | "TIMESTAMPTZ" | "UUID" | "JSON" | "JSONB" | "BYTEA" => {
            ReadAs::Native
        }
        _ => ReadAs::Text,
    }
}

fn select_list(columns: &[SourceColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            match read_plan(&c.declared_type) {
                ReadAs::Native => name,
                ReadAs::Numeric | ReadAs::Text => format!("{0}::text AS {0}", name),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse NUMERIC text: `Decimal` when it fits, else a finite float, else the
/// text itself (`NaN`, `Infinity`).
fn parse_numeric(text: &str) -> SqlValue {
    if let Ok(value) = Decimal::from_str(text) {
        return SqlValue::Decimal(value);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => SqlValue::Float(value),
        _ => SqlValue::Text(text.to_string()),
    }
}

fn decode_value(row: &PgRow, index: usize, column: &SourceColumn, plan: ReadAs) -> DbResult<SqlValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }

    match plan {
        ReadAs::Text => return Ok(SqlValue::Text(row.try_get::<String, _>(index)?)),
        ReadAs::Numeric => return Ok(parse_numeric(&row.try_get::<String, _>(index)?)),
        ReadAs::Native => {}
    }

    let value = match column.declared_type.as_str() {
        "BOOL" => SqlValue::Bool(row.try_get::<bool, _>(index)?),
        "INT2" => SqlValue::Int(row.try_get::<i16, _>(index)? as i64),
        "INT4" => SqlValue::Int(row.try_get::<i32, _>(index)? as i64),
        "INT8" => SqlValue::Int(row.try_get::<i64, _>(index)?),
        "FLOAT4" => SqlValue::Float(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => SqlValue::Float(row.try_get::<f64, _>(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            SqlValue::Text(row.try_get::<String, _>(index)?)
        }
        "DATE" => SqlValue::Text(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => SqlValue::Text(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "TIMESTAMP" => SqlValue::Text(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "TIMESTAMPTZ" => SqlValue::Text(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "UUID" => SqlValue::Text(row.try_get::<Uuid, _>(index)?.to_string()),
        "JSON" | "JSONB" => SqlValue::Text(row.try_get::<serde_json::Value, _>(index)?.to_string()),
        "BYTEA" => SqlValue::Text(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
        other => {
            return Err(DbError::UnsupportedType {
                column: column.name.clone(),
                type_name: other.to_string(),
            })
        }
    };
    Ok(value)
}

#[async_trait]
impl RelationalSource for PostgresExportRepository {
    async fn list_datasets(&self) -> ExportResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.views WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExportError::SourceUnavailable(e.to_string()))?;
        log::debug!("Found {} views in schema {}", names.len(), self.schema);
        Ok(names)
    }

    async fn extract(&self, dataset: &str) -> ExportResult<RowSet> {
        self.fetch_rows(dataset)
            .await
            .map_err(|e| ExportError::extraction(dataset, e))
    }
}

#[async_trait]
impl LedgerRepository for PostgresExportRepository {
    async fn append(&self) -> ExportResult<LedgerEntry> {
        let sql = ledger_insert_sql(&self.ledger_table);
        let id: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ExportError::LedgerWrite(e.to_string()))?;

        Ok(LedgerEntry {
            id,
            recorded_at: Utc::now(),
        })
    }
}
