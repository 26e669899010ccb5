use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, SqlitePool, Statement, TypeInfo, ValueRef};
use std::collections::HashMap;

use crate::errors::{DbError, DbResult, ExportError, ExportResult};
use crate::types::SqlValue;

use super::repository::{ledger_insert_sql, quote_ident, quote_qualified, LedgerRepository, RelationalSource};
use super::types::{ExportType, LedgerEntry, RowSet, SourceColumn};

/// Views of a SQLite database as export datasets.
pub struct SqliteExportRepository {
    pool: SqlitePool,
    ledger_table: String,
}

impl SqliteExportRepository {
    pub fn new(pool: SqlitePool, ledger_table: &str) -> Self {
        Self {
            pool,
            ledger_table: ledger_table.to_string(),
        }
    }

    async fn fetch_rows(&self, dataset: &str) -> DbResult<RowSet> {
        let sql = format!("SELECT * FROM {}", quote_ident(dataset));

        let statement = (&self.pool).prepare(sql.as_str()).await?;
        let declared = self.declared_types(dataset).await?;
        let columns: Vec<SourceColumn> = statement
            .columns()
            .iter()
            .map(|c| match declared.get(c.name()) {
                Some(type_name) => SourceColumn::new(c.name(), type_name.as_str()),
                None => SourceColumn::new(c.name(), c.type_info().name()),
            })
            .collect();
        let bool_columns: Vec<bool> = columns
            .iter()
            .map(|c| ExportType::from_declared(&c.declared_type) == ExportType::Bool)
            .collect();

        let fetched = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut rows = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let mut values = Vec::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                values.push(decode_value(row, index, &column.name, bool_columns[index])?);
            }
            rows.push(values);
        }

        Ok(RowSet::new(columns, rows))
    }

    /// Column types as written in the schema. The driver reports `NULL` for
    /// affinities such as `NUMERIC(10,2)`, so these take precedence.
    async fn declared_types(&self, dataset: &str) -> DbResult<HashMap<String, String>> {
        let pairs: Vec<(String, String)> = sqlx::query_as("SELECT name, type FROM pragma_table_info(?)")
            .bind(dataset)
            .fetch_all(&self.pool)
            .await?;
        Ok(pairs
            .into_iter()
            .filter(|(_, type_name)| !type_name.trim().is_empty())
            .collect())
    }
}

/// Decode one cell by its storage class.
fn decode_value(row: &SqliteRow, index: usize, column: &str, declared_bool: bool) -> DbResult<SqlValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" | "INT8" | "BIGINT" => {
            let v: i64 = row.try_get_unchecked(index)?;
            if declared_bool {
                SqlValue::Bool(v != 0)
            } else {
                SqlValue::Int(v)
            }
        }
        "REAL" => SqlValue::Float(row.try_get_unchecked::<f64, _>(index)?),
        "TEXT" | "DATE" | "TIME" | "DATETIME" => {
            SqlValue::Text(row.try_get_unchecked::<String, _>(index)?)
        }
        "BLOB" => SqlValue::Text(hex::encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        other => {
            return Err(DbError::UnsupportedType {
                column: column.to_string(),
                type_name: other.to_string(),
            })
        }
    };
    Ok(value)
}

#[async_trait]
impl RelationalSource for SqliteExportRepository {
    async fn list_datasets(&self) -> ExportResult<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'view' ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| ExportError::SourceUnavailable(e.to_string()))?;
        log::debug!("Found {} views in SQLite source", names.len());
        Ok(names)
    }

    async fn extract(&self, dataset: &str) -> ExportResult<RowSet> {
        self.fetch_rows(dataset)
            .await
            .map_err(|e| ExportError::extraction(dataset, e))
    }
}

#[async_trait]
impl LedgerRepository for SqliteExportRepository {
    async fn append(&self) -> ExportResult<LedgerEntry> {
        let sql = ledger_insert_sql(&quote_qualified(&self.ledger_table));
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
