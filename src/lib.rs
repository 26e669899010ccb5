//! Exports relational views to Parquet and publishes them into a warehouse store.

pub mod config;
pub mod domains;
pub mod errors;
pub mod types;

pub use config::ExportConfig;
pub use domains::export::{BatchResult, ExportService, ExportServiceImpl};
pub use errors::{ExportError, ExportResult};

/// Initialise `env_logger`, defaulting `RUST_LOG` to `info`.
///
/// Safe to call more than once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let _ = env_logger::try_init();
}
