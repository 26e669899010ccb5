use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::errors::{StoreError, StoreResult};

/// The distributed file store the pipeline publishes into.
///
/// Remote paths are absolute, `/`-separated strings such as
/// `/user/hive/warehouse/views/orders`. Every operation tolerates the
/// "already absent" / "already exists" case instead of failing.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Remove a file or directory tree. Succeeds if nothing is there.
    async fn remove_recursive(&self, path: &str) -> StoreResult<()>;

    /// Create a directory and any missing parents. Succeeds if it exists.
    async fn make_directory(&self, path: &str) -> StoreResult<()>;

    /// Copy a local file to `remote_path`, overwriting any existing file.
    /// The parent directory must already exist.
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> StoreResult<()>;

    /// Rename a file or directory. The destination must not exist.
    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Names of the direct children of a directory, sorted.
    async fn list_directory(&self, path: &str) -> StoreResult<Vec<String>>;

    async fn read_file(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

/// Join remote path segments with single `/` separators.
pub fn join_remote(base: &str, child: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}

/// Parent of a remote path, `/` for top-level entries.
pub fn remote_parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &trimmed[..idx],
    }
}

// --- Local File Storage Implementation ---

/// A store rooted in a local directory, e.g. a mounted NFS gateway or a test fixture.
pub struct LocalWarehouseStore {
    base_path: PathBuf,
}

impl LocalWarehouseStore {
    /// Creates the base directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a remote path under the base directory.
    ///
    /// Root and current-dir components are dropped; `..` is rejected so a
    /// remote path can never escape the base directory.
    pub fn get_absolute_path(&self, remote_path: &str) -> StoreResult<PathBuf> {
        let mut abs_path = self.base_path.clone();
        for component in Path::new(remote_path).components() {
            match component {
                Component::Normal(part) => abs_path.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(StoreError::InvalidPath(remote_path.to_string()))
                }
            }
        }
        Ok(abs_path)
    }
}

#[async_trait]
impl WarehouseStore for LocalWarehouseStore {
    async fn remove_recursive(&self, path: &str) -> StoreResult<()> {
        let absolute_path = self.get_absolute_path(path)?;
        if absolute_path == self.base_path {
            return Err(StoreError::InvalidPath(format!(
                "refusing to remove store root: {}",
                path
            )));
        }

        let result = match fs::symlink_metadata(&absolute_path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&absolute_path).await,
            Ok(_) => fs::remove_file(&absolute_path).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn make_directory(&self, path: &str) -> StoreResult<()> {
        let absolute_path = self.get_absolute_path(path)?;
        fs::create_dir_all(&absolute_path).await?;
        Ok(())
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> StoreResult<()> {
        let absolute_path = self.get_absolute_path(remote_path)?;
        let parent = absolute_path
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(remote_path.to_string()))?;

        if !fs::try_exists(parent).await? {
            return Err(StoreError::NotFound(remote_parent(remote_path).to_string()));
        }

        fs::copy(local_path, &absolute_path).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let source = self.get_absolute_path(from)?;
        let destination = self.get_absolute_path(to)?;

        if fs::try_exists(&destination).await? {
            return Err(StoreError::Other(format!("rename destination exists: {}", to)));
        }

        match fs::rename(&source, &destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(from.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<String>> {
        let absolute_path = self.get_absolute_path(path)?;
        let mut entries = match fs::read_dir(&absolute_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn read_file(&self, path: &str) -> StoreResult<Vec<u8>> {
        let absolute_path = self.get_absolute_path(path)?;
        match fs::read(&absolute_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(path.to_string())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.base_path.display())
    }
}
