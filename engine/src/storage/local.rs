//! Storage backend that keeps objects under a local directory.
//!
//! Uploads are written chunk by chunk on the tokio runtime, pushing a progress
//! report and a running snapshot after every chunk. Confirmed metadata and the
//! download token of each object are kept in memory for the lifetime of the
//! backend.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{StorageBackend, StorageRef, TransferHandle, TransferReporter};
use crate::config::LocalStorageConfig;
use crate::error::StorageError;
use crate::model::{Metadata, SnapshotState, SourceFile, StatusSnapshot};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const TOKEN_KEY: &str = "download-token";

type ObjectTable = Arc<Mutex<HashMap<StorageRef, Metadata>>>;

pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
    chunk_size: usize,
    objects: ObjectTable,
}

impl LocalStorage {
    pub fn new(config: &LocalStorageConfig) -> Self {
        LocalStorage {
            root: config.root.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chunk_size: config.chunk_size.max(1),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object.
    pub fn object_path(&self, reference: &StorageRef) -> PathBuf {
        self.root.join(reference.path())
    }

    /// Confirmed metadata of an object uploaded through this backend.
    pub fn metadata(&self, reference: &StorageRef) -> Option<Metadata> {
        lock(&self.objects).get(reference).cloned()
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn put(
        &self,
        reference: &StorageRef,
        file: &SourceFile,
        metadata: &Metadata,
    ) -> Result<TransferHandle, StorageError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StorageError::Rejected {
            reason: "no async runtime available".to_string(),
        })?;

        let (reporter, handle) = TransferHandle::channel();
        let job = WriteJob {
            reference: reference.clone(),
            target: self.object_path(reference),
            data: file.data().clone(),
            requested: metadata.clone(),
            chunk_size: self.chunk_size,
            objects: Arc::clone(&self.objects),
        };
        runtime.spawn(job.run(reporter));

        Ok(handle)
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, StorageError> {
        let token = lock(&self.objects)
            .get(reference)
            .and_then(|metadata| metadata.get(TOKEN_KEY).cloned())
            .ok_or_else(|| StorageError::NotFound {
                path: reference.path().to_string(),
            })?;

        Ok(format!(
            "{}/o/{}?alt=media&token={}",
            self.base_url,
            utf8_percent_encode(reference.path(), NON_ALPHANUMERIC),
            token
        ))
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        let target = self.object_path(reference);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                lock(&self.objects).remove(reference);
                return Err(StorageError::NotFound {
                    path: reference.path().to_string(),
                });
            }
            Err(source) => return Err(StorageError::Io { path: target, source }),
        }
        lock(&self.objects).remove(reference);
        debug!("Deleted object {}", reference);
        Ok(())
    }
}

/// One upload in flight.
struct WriteJob {
    reference: StorageRef,
    target: PathBuf,
    data: Bytes,
    requested: Metadata,
    chunk_size: usize,
    objects: ObjectTable,
}

impl WriteJob {
    async fn run(self, reporter: TransferReporter) {
        let total = self.data.len() as u64;
        reporter.snapshot(
            StatusSnapshot::new(SnapshotState::Running, 0, total).with_metadata(self.requested.clone()),
        );

        match self.write(&reporter).await {
            Ok(()) => {
                let confirmed = self.confirmed_metadata();
                lock(&self.objects).insert(self.reference.clone(), confirmed.clone());
                reporter.snapshot(
                    StatusSnapshot::new(SnapshotState::Success, total, total).with_metadata(confirmed),
                );
                debug!("Stored {} ({} bytes)", self.reference, total);
            }
            Err(e) => {
                warn!("Upload to {} failed: {}", self.reference, e);
                reporter.fail(e.to_string());
            }
        }
        // Dropping the reporter closes the event stream.
    }

    /// Writes into a staging file next to the target and renames it into
    /// place, so a failed upload never leaves a truncated object behind.
    async fn write(&self, reporter: &TransferReporter) -> Result<(), StorageError> {
        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    path: self.target.clone(),
                    source,
                })?;
        }

        let staging = self.staging_path();
        let result = self.write_staged(&staging, reporter).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&staging).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove partial upload {}: {}", staging.display(), e);
                }
            }
        }
        result
    }

    async fn write_staged(&self, staging: &Path, reporter: &TransferReporter) -> Result<(), StorageError> {
        let io_err = |source: io::Error| StorageError::Io {
            path: self.target.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(staging).await.map_err(io_err)?;

        let total = self.data.len() as u64;
        if total == 0 {
            reporter.progress(100.0);
        }

        let mut written: u64 = 0;
        for chunk in self.data.chunks(self.chunk_size) {
            file.write_all(chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
            reporter.progress(written as f64 / total as f64 * 100.0);
            reporter.snapshot(
                StatusSnapshot::new(SnapshotState::Running, written, total)
                    .with_metadata(self.requested.clone()),
            );
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(staging, &self.target).await.map_err(io_err)
    }

    fn staging_path(&self) -> PathBuf {
        let name = self.reference.name();
        self.target
            .with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
    }

    fn confirmed_metadata(&self) -> Metadata {
        let mut metadata = self.requested.clone();
        metadata
            .entry("content-type".to_string())
            .or_insert_with(|| DEFAULT_CONTENT_TYPE.to_string());
        metadata.insert("name".to_string(), self.reference.name().to_string());
        metadata.insert("full-path".to_string(), self.reference.path().to_string());
        metadata.insert("size".to_string(), self.data.len().to_string());
        metadata.insert("md5-hash".to_string(), format!("{:x}", md5::compute(&self.data)));
        metadata.insert("time-created".to_string(), chrono::Utc::now().to_rfc3339());
        metadata.insert(TOKEN_KEY.to_string(), Uuid::new_v4().to_string());
        metadata
    }
}

// A poisoned table only means another upload panicked mid-insert; the map
// itself is still usable.
fn lock(objects: &ObjectTable) -> MutexGuard<'_, HashMap<StorageRef, Metadata>> {
    objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
