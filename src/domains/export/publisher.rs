use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::domains::core::file_storage_service::{join_remote, WarehouseStore};
use crate::errors::{ExportError, ExportResult, StoreError};

use super::repository::is_valid_dataset_name;
use super::types::{DecodedArtifact, EncodedArtifact, PublishMode, PublishedPath};
use super::writers::{read_artifact, ARTIFACT_EXTENSION};

/// Publishes encoded artifacts to `<root>/<dataset>/data.<ext>` in a warehouse store.
///
/// Publication always fully replaces the dataset directory. If the store fails
/// after the old directory was removed, the dataset is left without data until
/// the next successful run.
pub struct DatasetPublisher {
    store: Arc<dyn WarehouseStore>,
    warehouse_root: String,
    staging_dir: PathBuf,
    mode: PublishMode,
}

impl DatasetPublisher {
    pub fn new(
        store: Arc<dyn WarehouseStore>,
        warehouse_root: &str,
        staging_dir: impl Into<PathBuf>,
        mode: PublishMode,
    ) -> Self {
        Self {
            store,
            warehouse_root: warehouse_root.trim_end_matches('/').to_string(),
            staging_dir: staging_dir.into(),
            mode,
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<dyn WarehouseStore> {
        &self.store
    }

    fn file_name() -> String {
        format!("data.{}", ARTIFACT_EXTENSION)
    }

    /// Canonical location for a dataset; does not touch the store.
    pub fn published_path(&self, dataset: &str) -> PublishedPath {
        let directory = join_remote(&self.warehouse_root, dataset);
        let file = join_remote(&directory, &Self::file_name());
        PublishedPath { directory, file }
    }

    pub async fn publish(&self, dataset: &str, artifact: &EncodedArtifact) -> ExportResult<PublishedPath> {
        if !is_valid_dataset_name(dataset) {
            return Err(ExportError::publish(
                dataset,
                StoreError::InvalidPath(format!("invalid dataset name '{}'", dataset)),
            ));
        }

        let target = self.published_path(dataset);

        // 1. stage locally
        let staged = self
            .stage(dataset, artifact)
            .await
            .map_err(|e| ExportError::publish(dataset, e))?;

        // 2-4. replace the remote directory
        let result = match self.mode {
            PublishMode::Replace => self.replace(staged.path(), &target).await,
            PublishMode::Swap => self.swap(dataset, staged.path(), &target).await,
        };

        // 5. drop the staged file; only local disk is affected
        let staged_path = staged.path().to_path_buf();
        if let Err(e) = staged.close() {
            log::warn!("Failed to remove staged file {}: {}", staged_path.display(), e);
        }

        result.map_err(|e| ExportError::publish(dataset, e))?;

        log::info!(
            "Published {} ({} rows, {} bytes, sha256 {}) to {} via {}",
            dataset,
            artifact.row_count,
            artifact.size_bytes(),
            artifact.checksum,
            target.file,
            self.store.describe()
        );
        Ok(target)
    }

    async fn stage(&self, dataset: &str, artifact: &EncodedArtifact) -> Result<NamedTempFile, StoreError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staged = tempfile::Builder::new()
            .prefix(&format!("{}-", dataset))
            .suffix(&format!(".{}", ARTIFACT_EXTENSION))
            .tempfile_in(&self.staging_dir)?;
        tokio::fs::write(staged.path(), &artifact.bytes).await?;
        log::debug!("Staged {} at {}", dataset, staged.path().display());
        Ok(staged)
    }

    async fn replace(&self, local: &Path, target: &PublishedPath) -> Result<(), StoreError> {
        self.store.remove_recursive(&target.directory).await?;
        self.store.make_directory(&target.directory).await?;
        self.store.put_file(local, &target.file).await
    }

    async fn swap(&self, dataset: &str, local: &Path, target: &PublishedPath) -> Result<(), StoreError> {
        let staging_remote = join_remote(
            &self.warehouse_root,
            &format!(".{}.staging-{}", dataset, Uuid::new_v4().simple()),
        );

        let result = async {
            self.store.make_directory(&staging_remote).await?;
            self.store
                .put_file(local, &join_remote(&staging_remote, &Self::file_name()))
                .await?;
            self.store.remove_recursive(&target.directory).await?;
            self.store.rename(&staging_remote, &target.directory).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = self.store.remove_recursive(&staging_remote).await {
                log::warn!("Failed to clean up staging directory {}: {}", staging_remote, e);
            }
        }
        result
    }

    /// Read a dataset back from the store and decode it.
    pub async fn fetch_published(&self, dataset: &str) -> ExportResult<DecodedArtifact> {
        let target = self.published_path(dataset);
        let bytes = self
            .store
            .read_file(&target.file)
            .await
            .map_err(|e| ExportError::publish(dataset, e))?;
        read_artifact(&bytes)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use async_trait::async_trait;
    use crate::errors::StoreResult;

    /// A store that fails every mutating call.
    pub struct FailingStore;

    #[async_trait]
    impl WarehouseStore for FailingStore {
        async fn remove_recursive(&self, path: &str) -> StoreResult<()> {
            Err(StoreError::Remote {
                operation: "DELETE",
                path: path.to_string(),
                status: 503,
                message: "service unavailable".into(),
            })
        }

        async fn make_directory(&self, path: &str) -> StoreResult<()> {
            self.remove_recursive(path).await
        }

        async fn put_file(&self, _local_path: &Path, remote_path: &str) -> StoreResult<()> {
            self.remove_recursive(remote_path).await
        }

        async fn rename(&self, from: &str, _to: &str) -> StoreResult<()> {
            self.remove_recursive(from).await
        }

        async fn list_directory(&self, path: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::NotFound(path.to_string()))
        }

        async fn read_file(&self, path: &str) -> StoreResult<Vec<u8>> {
            Err(StoreError::NotFound(path.to_string()))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }
}
