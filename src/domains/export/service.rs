use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{ExportError, ExportResult};

use super::coercion::coerce_rows;
use super::publisher::DatasetPublisher;
use super::repository::{LedgerRepository, RelationalSource};
use super::schemas::infer;
use super::types::{BatchResult, DatasetOutcome, DatasetState, PublishedPath};
use super::writers::ParquetEncoder;

#[async_trait]
pub trait ExportService: Send + Sync {
    /// Export every dataset of the source and record the batch in the ledger.
    ///
    /// Per-dataset failures are reported in the result; only an unreachable
    /// source is returned as an error.
    async fn run(&self) -> ExportResult<BatchResult>;
}

pub struct ExportServiceImpl {
    source: Arc<dyn RelationalSource>,
    ledger: Arc<dyn LedgerRepository>,
    publisher: DatasetPublisher,
    encoder: ParquetEncoder,
    concurrency: usize,
}

impl ExportServiceImpl {
    pub fn new(
        source: Arc<dyn RelationalSource>,
        ledger: Arc<dyn LedgerRepository>,
        publisher: DatasetPublisher,
        encoder: ParquetEncoder,
    ) -> Self {
        Self {
            source,
            ledger,
            publisher,
            encoder,
            concurrency: 1,
        }
    }

    /// Process up to `concurrency` datasets at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn export_dataset(&self, dataset: &str) -> DatasetOutcome {
        let mut state = DatasetState::Pending;

        match self.run_pipeline(dataset, &mut state).await {
            Ok((rows, path)) => DatasetOutcome {
                dataset: dataset.to_string(),
                state,
                failed_at: None,
                error: None,
                rows: Some(rows),
                published_path: Some(path),
            },
            Err(e) => {
                log::error!("Dataset {} failed while {:?}: {}", dataset, state, e);
                if state == DatasetState::Publishing {
                    log::warn!(
                        "Dataset {} may be left without data at {} until the next successful run",
                        dataset,
                        self.publisher.published_path(dataset).directory
                    );
                }
                DatasetOutcome {
                    dataset: dataset.to_string(),
                    state: DatasetState::Failed,
                    failed_at: Some(state),
                    error: Some(e.to_string()),
                    rows: None,
                    published_path: None,
                }
            }
        }
    }

    async fn run_pipeline(&self, dataset: &str, state: &mut DatasetState) -> ExportResult<(usize, PublishedPath)> {
        advance(dataset, state);
        let mut row_set = self.source.extract(dataset).await?;
        if let Some(index) = row_set.first_ragged_row() {
            return Err(ExportError::extraction(
                dataset,
                format!(
                    "row {} has {} values but the dataset has {} columns",
                    index,
                    row_set.rows[index].len(),
                    row_set.columns.len()
                ),
            ));
        }

        advance(dataset, state);
        let converted = coerce_rows(&mut row_set);
        if converted > 0 {
            log::debug!("Dataset {}: converted {} decimal values", dataset, converted);
        }
        let schema = infer(&row_set.columns, &row_set.rows);

        advance(dataset, state);
        let artifact = self.encoder.encode(dataset, &schema, &row_set.rows)?;
        drop(row_set);

        advance(dataset, state);
        let path = self.publisher.publish(dataset, &artifact).await?;

        advance(dataset, state);
        Ok((artifact.row_count, path))
    }
}

fn advance(dataset: &str, state: &mut DatasetState) {
    if let Some(next) = state.next() {
        log::debug!("Dataset {}: {:?} -> {:?}", dataset, state, next);
        *state = next;
    }
}

/// Drop repeated names, keeping the first occurrence.
fn unique_datasets(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if seen.insert(name.clone()) {
            unique.push(name);
        } else {
            log::warn!("Dataset {} listed more than once; exporting it once", name);
        }
    }
    unique
}

#[async_trait]
impl ExportService for ExportServiceImpl {
    async fn run(&self) -> ExportResult<BatchResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let listed = self.source.list_datasets().await.map_err(|e| match e {
            ExportError::SourceUnavailable(_) => e,
            other => ExportError::SourceUnavailable(other.to_string()),
        })?;
        let datasets = unique_datasets(listed);

        log::info!(
            "Export run {} started: {} datasets, concurrency {}, publish mode {:?}",
            run_id,
            datasets.len(),
            self.concurrency,
            self.publisher.mode()
        );

        let outcomes: Vec<DatasetOutcome> = if self.concurrency <= 1 {
            let mut outcomes = Vec::with_capacity(datasets.len());
            for dataset in &datasets {
                outcomes.push(self.export_dataset(dataset).await);
            }
            outcomes
        } else {
            let mut indexed: Vec<(usize, DatasetOutcome)> = stream::iter(datasets.iter().cloned().enumerate())
                .map(|(index, dataset)| async move { (index, self.export_dataset(&dataset).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            indexed.sort_by_key(|(index, _)| *index);
            indexed.into_iter().map(|(_, outcome)| outcome).collect()
        };

        let mut succeeded = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for outcome in &outcomes {
            if outcome.succeeded() {
                succeeded.insert(outcome.dataset.clone());
            } else {
                failed.insert(outcome.dataset.clone());
            }
        }

        let mut ledger_entry = None;
        let mut ledger_error = None;
        if !succeeded.is_empty() {
            match self.ledger.append().await {
                Ok(entry) => {
                    log::info!("Recorded ledger entry {}", entry.id);
                    ledger_entry = Some(entry);
                }
                Err(e) => {
                    log::error!("Failed to record ledger entry for run {}: {}", run_id, e);
                    ledger_error = Some(e.to_string());
                }
            }
        } else if !outcomes.is_empty() {
            log::warn!("No dataset succeeded in run {}; ledger not written", run_id);
        }

        let finished_at = Utc::now();
        log::info!(
            "Export run {} finished in {} ms: {} succeeded, {} failed",
            run_id,
            (finished_at - started_at).num_milliseconds(),
            succeeded.len(),
            failed.len()
        );
        if !failed.is_empty() {
            log::info!("Failed datasets: {:?}", failed);
        }

        Ok(BatchResult {
            run_id,
            started_at,
            finished_at,
            succeeded,
            failed,
            outcomes,
            ledger_entry,
            ledger_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::core::file_storage_service::{LocalWarehouseStore, WarehouseStore};
    use crate::domains::export::publisher::mock::FailingStore;
    use crate::domains::export::repository::mock::{MockLedgerRepository, MockRelationalSource};
    use crate::domains::export::types::{ExportType, PublishMode, RowSet, SourceColumn};
    use crate::types::SqlValue;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    const ROOT: &str = "/warehouse/views";

    fn orders() -> RowSet {
        RowSet::new(
            vec![SourceColumn::new("id", "INT4"), SourceColumn::new("amount", "NUMERIC")],
            vec![
                vec![SqlValue::Int(1), SqlValue::Decimal(dec!(2.50))],
                vec![SqlValue::Int(2), SqlValue::Decimal(dec!(3.75))],
            ],
        )
    }

    fn customers() -> RowSet {
        RowSet::new(
            vec![SourceColumn::new("name", "TEXT"), SourceColumn::new("active", "BOOL")],
            vec![
                vec![SqlValue::from("ada"), SqlValue::Bool(true)],
                vec![SqlValue::from("lin"), SqlValue::Null],
            ],
        )
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<LocalWarehouseStore>,
        ledger: Arc<MockLedgerRepository>,
    }

    fn service_with(
        source: MockRelationalSource,
        ledger: MockLedgerRepository,
        mode: PublishMode,
    ) -> (Fixture, ExportServiceImpl) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalWarehouseStore::new(dir.path().join("hdfs")).unwrap());
        let ledger = Arc::new(ledger);
        let publisher = DatasetPublisher::new(store.clone(), ROOT, dir.path().join("staging"), mode);
        let service = ExportServiceImpl::new(
            Arc::new(source),
            ledger.clone(),
            publisher,
            ParquetEncoder::default(),
        );
        (Fixture { _dir: dir, store, ledger }, service)
    }

    #[tokio::test]
    async fn test_failing_dataset_is_isolated() {
        let source = MockRelationalSource::new()
            .with_dataset("customers", customers())
            .with_failing_dataset("broken")
            .with_dataset("orders", orders());
        let (fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Replace);

        let result = service.run().await.unwrap();

        assert_eq!(result.succeeded.len(), 2);
        assert!(result.succeeded.contains("customers"));
        assert!(result.succeeded.contains("orders"));
        assert_eq!(result.failed.iter().collect::<Vec<_>>(), vec!["broken"]);
        assert_eq!(result.ledger_entry.as_ref().map(|e| e.id), Some(1));
        assert_eq!(fixture.ledger.entries(), 1);

        let broken = result.outcome("broken").unwrap();
        assert_eq!(broken.state, DatasetState::Failed);
        assert_eq!(broken.failed_at, Some(DatasetState::Extracting));
        assert!(broken.error.as_ref().unwrap().contains("broken"));

        let names: Vec<&str> = result.outcomes.iter().map(|o| o.dataset.as_str()).collect();
        assert_eq!(names, vec!["customers", "broken", "orders"]);

        let listing = fixture.store.list_directory(ROOT).await.unwrap();
        assert_eq!(listing, vec!["customers", "orders"]);
    }

    #[tokio::test]
    async fn test_decimal_amounts_publish_as_float_column() {
        let source = MockRelationalSource::new().with_dataset("orders", orders());
        let (fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Replace);

        let result = service.run().await.unwrap();
        let outcome = result.outcome("orders").unwrap();
        assert_eq!(outcome.rows, Some(2));
        assert_eq!(
            outcome.published_path.as_ref().unwrap().file,
            "/warehouse/views/orders/data.parquet"
        );

        let bytes = fixture
            .store
            .read_file("/warehouse/views/orders/data.parquet")
            .await
            .unwrap();
        let decoded = crate::domains::export::writers::read_artifact(&bytes).unwrap();
        assert_eq!(decoded.schema.get("id"), Some(ExportType::Int64));
        assert_eq!(decoded.schema.get("amount"), Some(ExportType::Float64));
        assert_eq!(
            decoded.rows,
            vec![
                vec![SqlValue::Int(1), SqlValue::Float(2.5)],
                vec![SqlValue::Int(2), SqlValue::Float(3.75)],
            ]
        );
    }

    #[tokio::test]
    async fn test_no_ledger_entry_when_nothing_succeeds() {
        let source = MockRelationalSource::new()
            .with_failing_dataset("a")
            .with_failing_dataset("b");
        let (fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Replace);

        let result = service.run().await.unwrap();
        assert!(result.succeeded.is_empty());
        assert_eq!(result.failed.len(), 2);
        assert!(result.ledger_entry.is_none());
        assert!(result.ledger_error.is_none());
        assert_eq!(fixture.ledger.entries(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_source_aborts_run() {
        let (fixture, service) = service_with(
            MockRelationalSource::unavailable(),
            MockLedgerRepository::new(),
            PublishMode::Replace,
        );

        let err = service.run().await.unwrap_err();
        assert!(matches!(err, ExportError::SourceUnavailable(_)));
        assert!(err.is_fatal());
        assert_eq!(fixture.ledger.entries(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_without_ledger() {
        let (fixture, service) = service_with(
            MockRelationalSource::new(),
            MockLedgerRepository::new(),
            PublishMode::Replace,
        );

        let result = service.run().await.unwrap();
        assert!(result.is_empty());
        assert!(result.ledger_entry.is_none());
        assert_eq!(fixture.ledger.entries(), 0);
    }

    #[tokio::test]
    async fn test_empty_dataset_publishes_schema_only_artifact() {
        let empty = RowSet::new(
            vec![
                SourceColumn::new("id", "INT8"),
                SourceColumn::new("price", "FLOAT8"),
                SourceColumn::new("flag", "BOOL"),
                SourceColumn::new("created", "TIMESTAMPTZ"),
            ],
            Vec::new(),
        );
        let source = MockRelationalSource::new().with_dataset("empty_view", empty);
        let (fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Swap);

        let result = service.run().await.unwrap();
        assert!(result.succeeded.contains("empty_view"));
        assert_eq!(result.outcome("empty_view").unwrap().rows, Some(0));

        let bytes = fixture
            .store
            .read_file("/warehouse/views/empty_view/data.parquet")
            .await
            .unwrap();
        let decoded = crate::domains::export::writers::read_artifact(&bytes).unwrap();
        assert!(decoded.rows.is_empty());
        assert_eq!(decoded.schema.get("id"), Some(ExportType::Int64));
        assert_eq!(decoded.schema.get("price"), Some(ExportType::Float64));
        assert_eq!(decoded.schema.get("flag"), Some(ExportType::Bool));
        assert_eq!(decoded.schema.get("created"), Some(ExportType::String));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_recorded_not_fatal() {
        let source = MockRelationalSource::new().with_dataset("orders", orders());
        let (_fixture, service) = service_with(source, MockLedgerRepository::failing(), PublishMode::Replace);

        let result = service.run().await.unwrap();
        assert!(result.succeeded.contains("orders"));
        assert!(result.ledger_entry.is_none());
        assert!(result.ledger_error.as_ref().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_ragged_rows_fail_the_dataset() {
        let ragged = RowSet::new(
            vec![SourceColumn::new("a", "INT4"), SourceColumn::new("b", "INT4")],
            vec![vec![SqlValue::Int(1), SqlValue::Int(2)], vec![SqlValue::Int(3)]],
        );
        let source = MockRelationalSource::new().with_dataset("ragged", ragged);
        let (_fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Replace);

        let result = service.run().await.unwrap();
        let outcome = result.outcome("ragged").unwrap();
        assert_eq!(outcome.failed_at, Some(DatasetState::Extracting));
        assert!(outcome.error.as_ref().unwrap().contains("row 1"));
    }

    #[tokio::test]
    async fn test_store_failure_marks_publishing_stage() {
        let dir = TempDir::new().unwrap();
        let source = MockRelationalSource::new().with_dataset("orders", orders());
        let ledger = Arc::new(MockLedgerRepository::new());
        let publisher = DatasetPublisher::new(
            Arc::new(FailingStore),
            ROOT,
            dir.path().join("staging"),
            PublishMode::Replace,
        );
        let service = ExportServiceImpl::new(Arc::new(source), ledger.clone(), publisher, ParquetEncoder::default());

        let result = service.run().await.unwrap();
        let outcome = result.outcome("orders").unwrap();
        assert_eq!(outcome.failed_at, Some(DatasetState::Publishing));
        assert_eq!(ledger.entries(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_run_dedupes_and_keeps_order() {
        let source = MockRelationalSource::new()
            .with_dataset("orders", orders())
            .with_dataset("customers", customers())
            .with_dataset("orders", orders())
            .with_failing_dataset("broken");
        let (fixture, service) = service_with(source, MockLedgerRepository::new(), PublishMode::Replace);
        let service = service.with_concurrency(4);

        let result = service.run().await.unwrap();
        let names: Vec<&str> = result.outcomes.iter().map(|o| o.dataset.as_str()).collect();
        assert_eq!(names, vec!["orders", "customers", "broken"]);
        assert_eq!(result.succeeded.len(), 2);
        assert_eq!(fixture.ledger.entries(), 1);
    }

    #[test]
    fn test_unique_datasets_keeps_first_occurrence() {
        let names = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique_datasets(names), vec!["b".to_string(), "a".to_string()]);
    }
}
