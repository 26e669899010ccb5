use std::process::ExitCode;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;

use warehouse_export::config::{ExportConfig, SourceKind, StoreConfig};
use warehouse_export::domains::core::{LocalWarehouseStore, WarehouseStore, WebHdfsStore};
use warehouse_export::domains::export::{
    DatasetPublisher, LedgerRepository, ParquetEncoder, PostgresExportRepository, RelationalSource,
    SqliteExportRepository,
};
use warehouse_export::{init_logging, BatchResult, ExportError, ExportResult, ExportService, ExportServiceImpl};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok((result, as_json)) => {
            if as_json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => log::error!("Failed to serialize summary: {}", e),
                }
            } else {
                print_summary(&result);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Export aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ExportResult<(BatchResult, bool)> {
    let config = ExportConfig::from_env()?;
    log::info!(
        "Exporting views from {} into {}",
        config.redacted_database_url(),
        config.warehouse_root
    );

    let (source, ledger) = connect(&config).await?;
    let store = build_store(&config)?;
    log::info!("Publishing through {}", store.describe());

    let publisher = DatasetPublisher::new(
        store,
        &config.warehouse_root,
        config.staging_dir.clone(),
        config.publish_mode,
    );
    let service = ExportServiceImpl::new(source, ledger, publisher, ParquetEncoder::new(config.compression))
        .with_concurrency(config.concurrency);

    let result = service.run().await?;
    if result.succeeded.is_empty() && !result.is_empty() {
        log::warn!("Every dataset failed; see the summary for details");
    }
    Ok((result, config.summary_json))
}

async fn connect(
    config: &ExportConfig,
) -> ExportResult<(Arc<dyn RelationalSource>, Arc<dyn LedgerRepository>)> {
    let unavailable = |e: sqlx::Error| ExportError::SourceUnavailable(e.to_string());

    match config.source_kind {
        SourceKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await
                .map_err(unavailable)?;
            let repo = Arc::new(PostgresExportRepository::new(
                pool,
                &config.source_schema,
                &config.ledger_table,
            ));
            let source: Arc<dyn RelationalSource> = repo.clone();
            let ledger: Arc<dyn LedgerRepository> = repo;
            Ok((source, ledger))
        }
        SourceKind::Sqlite => {
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await
                .map_err(unavailable)?;
            let repo = Arc::new(SqliteExportRepository::new(pool, &config.ledger_table));
            let source: Arc<dyn RelationalSource> = repo.clone();
            let ledger: Arc<dyn LedgerRepository> = repo;
            Ok((source, ledger))
        }
    }
}

fn build_store(config: &ExportConfig) -> ExportResult<Arc<dyn WarehouseStore>> {
    match &config.store {
        StoreConfig::WebHdfs { url, user } => {
            let store = WebHdfsStore::new(url, user)
                .map_err(|e| ExportError::Configuration(format!("Failed to build WebHDFS client: {}", e)))?;
            Ok(Arc::new(store))
        }
        StoreConfig::Local { dir } => {
            let store = LocalWarehouseStore::new(dir.clone()).map_err(|e| {
                ExportError::Configuration(format!("Cannot use local store {}: {}", dir.display(), e))
            })?;
            Ok(Arc::new(store))
        }
    }
}

fn print_summary(result: &BatchResult) {
    println!("Export run {}", result.run_id);
    println!("  succeeded ({}): {}", result.succeeded.len(), join(&result.succeeded));
    println!("  failed ({}): {}", result.failed.len(), join(&result.failed));
    for outcome in result.outcomes.iter().filter(|o| !o.succeeded()) {
        println!(
            "    {}: {}",
            outcome.dataset,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    match (&result.ledger_entry, &result.ledger_error) {
        (Some(entry), _) => println!("  ledger entry: {}", entry.id),
        (None, Some(error)) => println!("  ledger entry: not written ({})", error),
        (None, None) => println!("  ledger entry: none"),
    }
}

fn join(names: &std::collections::BTreeSet<String>) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
