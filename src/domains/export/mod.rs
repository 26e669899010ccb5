pub mod coercion;
pub mod publisher;
pub mod repository;
pub mod repository_pg;
pub mod repository_sqlite;
pub mod schemas;
pub mod service;
pub mod types;
pub mod writers;

pub use publisher::DatasetPublisher;
pub use repository::{LedgerRepository, RelationalSource};
pub use repository_pg::PostgresExportRepository;
pub use repository_sqlite::SqliteExportRepository;
pub use service::{ExportService, ExportServiceImpl};
pub use types::{BatchResult, DatasetOutcome, DatasetState, ExportType, ParquetCompression, PublishMode};
pub use writers::{read_artifact, ParquetEncoder};
