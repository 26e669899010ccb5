mod error;

pub use error::{DbError, ExportError, StoreError};

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Result type for distributed store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for export pipeline operations
pub type ExportResult<T> = Result<T, ExportError>;
