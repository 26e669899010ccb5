use thiserror::Error;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Unsupported column type '{type_name}' for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    #[error("Database error: {0}")]
    Other(String),
}

/// Errors raised by a distributed store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store returned {status} for {operation} on {path}: {message}")]
    Remote {
        operation: &'static str,
        path: String,
        status: u16,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Export pipeline errors.
///
/// Only `SourceUnavailable` and `Configuration` stop a run; every other
/// variant is caught per dataset and turned into a failed outcome.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Relational source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Extraction of dataset '{dataset}' failed: {message}")]
    Extraction { dataset: String, message: String },

    #[error(
        "Type mismatch in dataset '{}' column '{column}' at row {row}: cannot cast {value} to {expected}",
        .dataset.as_deref().unwrap_or("?")
    )]
    TypeMismatch {
        dataset: Option<String>,
        column: String,
        row: usize,
        expected: String,
        value: String,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Publishing dataset '{dataset}' failed: {source}")]
    Publish {
        dataset: String,
        #[source]
        source: StoreError,
    },

    #[error("Ledger write failed: {0}")]
    LedgerWrite(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn extraction(dataset: &str, err: impl std::fmt::Display) -> Self {
        Self::Extraction {
            dataset: dataset.to_string(),
            message: err.to_string(),
        }
    }

    pub fn publish(dataset: &str, source: StoreError) -> Self {
        Self::Publish {
            dataset: dataset.to_string(),
            source,
        }
    }

    /// Attach the dataset name to a `TypeMismatch` raised below the encoder.
    pub fn in_dataset(self, name: &str) -> Self {
        match self {
            Self::TypeMismatch {
                dataset: None,
                column,
                row,
                expected,
                value,
            } => Self::TypeMismatch {
                dataset: Some(name.to_string()),
                column,
                row,
                expected,
                value,
            },
            other => other,
        }
    }

    /// Whether this error must abort the whole run rather than a single dataset.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Configuration(_))
    }
}

impl From<parquet::errors::ParquetError> for ExportError {
    fn from(error: parquet::errors::ParquetError) -> Self {
        ExportError::Encoding(error.to_string())
    }
}

impl From<arrow::error::ArrowError> for ExportError {
    fn from(error: arrow::error::ArrowError) -> Self {
        ExportError::Encoding(error.to_string())
    }
}
