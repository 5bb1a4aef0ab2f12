use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Original uploads.
pub const DOCUMENTS_CONTAINER: &str = "documents";
/// Derived JSONL, index and chunk files.
pub const ARTIFACTS_CONTAINER: &str = "artifacts";
/// Raw model responses kept for debugging.
pub const LOGS_CONTAINER: &str = "logs";

const SCRATCH_DIR: &str = "scratch";

/// Blob storage keyed by `(container, path)` on top of an `object_store` backend.
///
/// Containers map to top-level key prefixes. Objects fetched for local processing are
/// materialized below a scratch directory unless the backend already keeps them on disk.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
    scratch_root: PathBuf,
}

impl StorageManager {
    /// Create a new StorageManager from configuration.
    ///
    /// A configured S3 bucket selects the remote backend; otherwise the configured kind is used.
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let backend_kind = cfg.effective_storage();
        let base = resolve_base_dir(cfg);
        let (store, local_base) = create_storage_backend(cfg, &backend_kind, &base).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
            scratch_root: base.join(SCRATCH_DIR),
        })
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Resolved local base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Containers are key prefixes, so creating one only matters on the local filesystem.
    /// Concurrent creation is tolerated.
    pub async fn ensure_container(&self, container: &str) -> Result<(), AppError> {
        if container.trim().is_empty() {
            return Err(AppError::EmptyArgument("container"));
        }
        let Some(base) = &self.local_base else {
            return Ok(());
        };
        match tokio::fs::create_dir_all(base.join(container)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Stores `data` at `path` inside `container`, overwriting any previous object.
    ///
    /// Returns the locator to hand back to [`StorageManager::get`]: an absolute file path on the
    /// local backend, `container/path` everywhere else.
    pub async fn put(
        &self,
        data: impl Into<Bytes>,
        path: &str,
        container: &str,
    ) -> Result<String, AppError> {
        let data = data.into();
        if path.trim().is_empty() {
            return Err(AppError::EmptyArgument("path"));
        }
        if container.trim().is_empty() {
            return Err(AppError::EmptyArgument("container"));
        }
        if data.is_empty() {
            return Err(AppError::EmptyArgument("data"));
        }

        self.ensure_container(container).await?;

        let key = object_key(path, container);
        let location = ObjPath::from(key.as_str());
        self.store
            .put(&location, object_store::PutPayload::from_bytes(data))
            .await?;

        let locator = match &self.local_base {
            Some(base) => base.join(&key).to_string_lossy().into_owned(),
            None => key,
        };
        debug!(container, locator = %locator, "stored object");
        Ok(locator)
    }

    /// Fetches an object into a local file and returns its path.
    ///
    /// Accepts locators as returned by [`StorageManager::put`], with or without the
    /// `container/` prefix. A missing object yields [`AppError::NotFound`].
    pub async fn get(&self, locator: &str, container: &str) -> Result<PathBuf, AppError> {
        let key = self.resolve_key(locator, container)?;

        if let Some(path) = self.resolve_local_path(&key) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }

        let bytes = self.read_key(&key).await?;
        let target = self.scratch_root.join(&key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        Ok(target)
    }

    /// Reads an object fully into memory.
    pub async fn read(&self, locator: &str, container: &str) -> Result<Bytes, AppError> {
        let key = self.resolve_key(locator, container)?;
        self.read_key(&key).await
    }

    /// Check if an object exists at the given locator.
    pub async fn exists(&self, locator: &str, container: &str) -> Result<bool, AppError> {
        let key = self.resolve_key(locator, container)?;
        match self.store.head(&ObjPath::from(key.as_str())).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete all objects below the specified prefix.
    ///
    /// For local filesystem backends, this also attempts to clean up empty directories.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let prefix_path = ObjPath::from(prefix);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        if matches!(self.backend_kind, StorageKind::Local) {
            self.cleanup_filesystem_directories(prefix).await;
        }

        Ok(())
    }

    /// Creates (if needed) and returns the local scratch directory for a namespace.
    pub async fn scratch_dir(&self, namespace: &str) -> Result<PathBuf, AppError> {
        let dir = self.scratch_root.join(namespace);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Removes a scratch namespace when nothing is left in it. Never fails.
    pub async fn remove_scratch_dir_if_empty(&self, namespace: &str) {
        let dir = self.scratch_root.join(namespace);
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "removed empty scratch directory"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {
                debug!(path = %dir.display(), "scratch directory not empty; keeping it");
            }
            Err(err) => warn!(
                error = %err,
                path = %dir.display(),
                "failed to remove scratch directory"
            ),
        }
    }

    /// Maps a locator onto the object key `container/path`.
    fn resolve_key(&self, locator: &str, container: &str) -> Result<String, AppError> {
        if locator.trim().is_empty() {
            return Err(AppError::EmptyArgument("path"));
        }
        if container.trim().is_empty() {
            return Err(AppError::EmptyArgument("container"));
        }

        let relative = match &self.local_base {
            Some(base) => Path::new(locator)
                .strip_prefix(base)
                .map(|rest| rest.to_string_lossy().into_owned())
                .unwrap_or_else(|_| locator.to_string()),
            None => locator.to_string(),
        };

        Ok(object_key(&relative, container))
    }

    async fn read_key(&self, key: &str) -> Result<Bytes, AppError> {
        let location = ObjPath::from(key);
        match self.store.get(&location).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {
                Err(AppError::NotFound(format!("No object stored at {key}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve an object key to a filesystem path when using the local backend.
    ///
    /// Returns `None` when the backend is not local or when the key includes
    /// unsupported components (absolute paths or parent traversals).
    fn resolve_local_path(&self, key: &str) -> Option<PathBuf> {
        let base = self.local_base_path()?;
        let relative = Path::new(key);
        if has_unsupported_components(relative) {
            return None;
        }

        Some(base.join(relative))
    }

    /// Best-effort removal of directories left empty after a prefix delete.
    async fn cleanup_filesystem_directories(&self, prefix: &str) {
        let Some(base) = &self.local_base else {
            return;
        };

        let relative = Path::new(prefix);
        if has_unsupported_components(relative) {
            warn!(
                prefix = %prefix,
                "Skipping directory cleanup for unsupported prefix components"
            );
            return;
        }

        let mut current = base.join(relative);

        while current.starts_with(base) && current.as_path() != base.as_path() {
            match tokio::fs::remove_dir(&current).await {
                Ok(()) => {}
                Err(err) => match err.kind() {
                    ErrorKind::NotFound => {}
                    ErrorKind::DirectoryNotEmpty => break,
                    _ => debug!(
                        error = %err,
                        path = %current.display(),
                        "Failed to remove directory during cleanup"
                    ),
                },
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }
    }
}

fn has_unsupported_components(path: &Path) -> bool {
    path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
}

/// `container/path`, without doubling a prefix that is already present.
fn object_key(path: &str, container: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let prefix = format!("{container}/");
    match trimmed.strip_prefix(&prefix) {
        Some(rest) => format!("{prefix}{rest}"),
        None => format!("{prefix}{trimmed}"),
    }
}

async fn create_storage_backend(
    cfg: &AppConfig,
    kind: &StorageKind,
    base: &Path,
) -> Result<(DynStore, Option<PathBuf>), AppError> {
    match kind {
        StorageKind::Local => {
            tokio::fs::create_dir_all(base).await?;
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok((Arc::new(store), Some(base.to_path_buf())))
        }
        StorageKind::Memory => Ok((Arc::new(InMemory::new()), None)),
        StorageKind::S3 => {
            let bucket = cfg
                .s3_bucket
                .as_deref()
                .filter(|bucket| !bucket.trim().is_empty())
                .ok_or_else(|| AppError::Validation("s3 storage requires s3_bucket".into()))?;
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = &cfg.s3_region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &cfg.s3_endpoint {
                builder = builder.with_endpoint(endpoint).with_allow_http(true);
            }
            Ok((Arc::new(builder.build()?), None))
        }
    }
}

/// Resolve the absolute base directory used for local storage from config.
///
/// If `data_dir` is relative, it is resolved against the current working directory.
pub fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    let configured = PathBuf::from(&cfg.data_dir);
    if configured.is_absolute() {
        configured
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(configured)
    }
}

/// Testing utilities for storage operations.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A StorageManager whose files live in a temporary directory removed on drop.
    pub struct TestStorageManager {
        storage: StorageManager,
        _temp_dir: TempDir,
    }

    impl TestStorageManager {
        /// In-memory objects with a temporary scratch root.
        pub async fn new_memory() -> Result<Self, AppError> {
            Self::with_kind(StorageKind::Memory).await
        }

        /// Local filesystem objects below a temporary directory.
        pub async fn new_local() -> Result<Self, AppError> {
            Self::with_kind(StorageKind::Local).await
        }

        async fn with_kind(kind: StorageKind) -> Result<Self, AppError> {
            let temp_dir = tempfile::tempdir()?;
            let cfg = AppConfig {
                data_dir: temp_dir.path().to_string_lossy().into_owned(),
                storage: kind,
                ..Default::default()
            };
            let storage = StorageManager::new(&cfg).await?;
            Ok(Self {
                storage,
                _temp_dir: temp_dir,
            })
        }

        pub fn storage(&self) -> &StorageManager {
            &self.storage
        }

        pub fn clone_storage(&self) -> StorageManager {
            self.storage.clone()
        }
    }
}
