use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::ExportResult;

use super::types::{LedgerEntry, RowSet};

static DATASET_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.$-]*$").unwrap());

/// The relational database views are exported from.
#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Names of all exportable datasets, in enumeration order.
    ///
    /// An error here means the source is unreachable and is fatal for the run.
    async fn list_datasets(&self) -> ExportResult<Vec<String>>;

    /// Column list (with declared types) and all rows of one dataset.
    async fn extract(&self, dataset: &str) -> ExportResult<RowSet>;
}

/// Append-only record of completed batches.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Insert one row with id `max(id) + 1` (or 1) and return it.
    async fn append(&self) -> ExportResult<LedgerEntry>;
}

/// Whether `name` is safe to use as a path component and view name.
pub fn is_valid_dataset_name(name: &str) -> bool {
    name != "." && name != ".." && DATASET_NAME_REGEX.is_match(name)
}

/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`).
pub fn quote_qualified(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// The `INSERT` that appends the next ledger id for `table` (already quoted).
pub(crate) fn ledger_insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (id) VALUES ((SELECT COALESCE(MAX(id), 0) + 1 FROM {table})) RETURNING CAST(id AS BIGINT)",
        table = table
    )
}
