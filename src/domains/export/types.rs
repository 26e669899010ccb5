use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::types::SqlValue;

/// The primitive types a published column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportType {
    Int64,
    Float64,
    Bool,
    String,
}

impl ExportType {
    /// Map a declared source column type onto one of the four export buckets.
    ///
    /// Matching is case-insensitive and ignores type parameters, so
    /// `numeric(10,2)` and `NUMERIC` both land on `Float64`. Anything
    /// unrecognised falls back to `String`.
    pub fn from_declared(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        let base = match upper.find('(') {
            Some(idx) => upper[..idx].trim_end(),
            None => upper.as_str(),
        };

        match base {
            "INT2" | "INT4" | "INT8" | "SMALLINT" | "INT" | "INTEGER" | "BIGINT" | "TINYINT"
            | "MEDIUMINT" | "SMALLSERIAL" | "SERIAL" | "BIGSERIAL" => ExportType::Int64,
            "FLOAT4" | "FLOAT8" | "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC"
            | "DECIMAL" => ExportType::Float64,
            "BOOL" | "BOOLEAN" => ExportType::Bool,
            _ => ExportType::String,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportType::Int64 => "int64",
            ExportType::Float64 => "float64",
            ExportType::Bool => "bool",
            ExportType::String => "string",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column as declared by the relational source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    pub declared_type: String,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

/// Rows extracted from one dataset. Every row holds exactly `columns.len()` values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<SourceColumn>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<SourceColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Index of the first row whose width differs from the column list.
    pub fn first_ragged_row(&self) -> Option<usize> {
        let width = self.columns.len();
        self.rows.iter().position(|row| row.len() != width)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnField {
    pub name: String,
    pub export_type: ExportType,
}

/// Ordered mapping from column name to export type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    fields: Vec<ColumnField>,
}

impl ColumnSchema {
    pub fn new(fields: Vec<ColumnField>) -> Self {
        Self { fields }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ExportType)>,
        S: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(name, export_type)| ColumnField {
                    name: name.into(),
                    export_type,
                })
                .collect(),
        }
    }

    pub fn fields(&self) -> &[ColumnField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<ExportType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.export_type)
    }
}

/// An encoded, immutable columnar file together with the schema it was written with.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub bytes: Vec<u8>,
    pub schema: ColumnSchema,
    pub row_count: usize,
    /// Lower-case hex SHA-256 of `bytes`.
    pub checksum: String,
}

impl EncodedArtifact {
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// An artifact read back from its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedArtifact {
    pub schema: ColumnSchema,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Canonical location of a published dataset: `<root>/<dataset>/data.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPath {
    pub directory: String,
    pub file: String,
}

impl fmt::Display for PublishedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file)
    }
}

/// One row of the batch ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Lifecycle of a single dataset inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetState {
    Pending,
    Extracting,
    Inferring,
    Encoding,
    Publishing,
    Done,
    Failed,
}

impl DatasetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DatasetState::Done | DatasetState::Failed)
    }

    /// The state that follows this one on the success path.
    pub fn next(&self) -> Option<DatasetState> {
        match self {
            DatasetState::Pending => Some(DatasetState::Extracting),
            DatasetState::Extracting => Some(DatasetState::Inferring),
            DatasetState::Inferring => Some(DatasetState::Encoding),
            DatasetState::Encoding => Some(DatasetState::Publishing),
            DatasetState::Publishing => Some(DatasetState::Done),
            DatasetState::Done | DatasetState::Failed => None,
        }
    }
}

/// Final report for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub state: DatasetState,
    /// Stage that was active when the dataset failed.
    pub failed_at: Option<DatasetState>,
    pub error: Option<String>,
    pub rows: Option<usize>,
    pub published_path: Option<PublishedPath>,
}

impl DatasetOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == DatasetState::Done
    }
}

/// Result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
    pub outcomes: Vec<DatasetOutcome>,
    pub ledger_entry: Option<LedgerEntry>,
    pub ledger_error: Option<String>,
}

impl BatchResult {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, dataset: &str) -> Option<&DatasetOutcome> {
        self.outcomes.iter().find(|o| o.dataset == dataset)
    }
}

/// Parquet compression options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParquetCompression {
    None,
    Snappy,
    Zstd,
}

impl ParquetCompression {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Some(ParquetCompression::None),
            "snappy" => Some(ParquetCompression::Snappy),
            "zstd" => Some(ParquetCompression::Zstd),
            _ => None,
        }
    }
}

impl Default for ParquetCompression {
    fn default() -> Self {
        Self::Snappy
    }
}

/// How the publisher replaces a dataset directory in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishMode {
    /// Delete the destination, recreate it, then copy the file in.
    Replace,
    /// Upload into a sibling staging directory, then delete and rename.
    Swap,
}

impl PublishMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Some(PublishMode::Replace),
            "swap" => Some(PublishMode::Swap),
            _ => None,
        }
    }
}

impl Default for PublishMode {
    fn default() -> Self {
        Self::Replace
    }
}
