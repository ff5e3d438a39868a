//! Fan-out of files into dispatched transfer tasks.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::cleanup::CleanupManager;
use crate::config::EngineConfig;
use crate::error::DispatchError;
use crate::model::{CorrelationData, Metadata, SourceFile};
use crate::session::BatchSession;
use crate::storage::StorageBackend;
use crate::task::{TransferRequest, TransferTask};

/// Where the files of a batch go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationPaths {
    /// Every file lands at `<dir>/<file name>`
    Directory(String),
    /// One full path per file, index-aligned with the file list
    PerFile(Vec<String>),
}

impl DestinationPaths {
    /// Destination of every file, or an error naming the first file without one.
    pub fn resolve(&self, files: &[SourceFile]) -> Result<Vec<String>, DispatchError> {
        match self {
            DestinationPaths::Directory(dir) => {
                let dir = dir.trim_end_matches('/');
                Ok(files
                    .iter()
                    .map(|file| format!("{}/{}", dir, file.name()))
                    .collect())
            }
            DestinationPaths::PerFile(paths) => files
                .iter()
                .enumerate()
                .map(|(index, file)| {
                    paths
                        .get(index)
                        .cloned()
                        .ok_or_else(|| DispatchError::MissingDestination {
                            index,
                            file: file.name().to_string(),
                        })
                })
                .collect(),
        }
    }
}

impl From<&str> for DestinationPaths {
    fn from(dir: &str) -> Self {
        DestinationPaths::Directory(dir.to_string())
    }
}

impl From<String> for DestinationPaths {
    fn from(dir: String) -> Self {
        DestinationPaths::Directory(dir)
    }
}

impl From<Vec<String>> for DestinationPaths {
    fn from(paths: Vec<String>) -> Self {
        DestinationPaths::PerFile(paths)
    }
}

/// Creates and dispatches transfer tasks against one backend.
#[derive(Clone)]
pub struct TransferCoordinator {
    backend: Arc<dyn StorageBackend>,
    config: EngineConfig,
}

impl TransferCoordinator {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    pub fn with_config(backend: Arc<dyn StorageBackend>, config: EngineConfig) -> Self {
        TransferCoordinator { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cleanup manager for the same backend.
    pub fn cleanup(&self) -> CleanupManager {
        CleanupManager::new(Arc::clone(&self.backend))
    }

    /// Upload a single file to `path`.
    ///
    /// `metadata` is merged over the configured default metadata.
    pub fn upload_one(
        &self,
        file: SourceFile,
        path: &str,
        correlation_data: Option<CorrelationData>,
        metadata: Option<Metadata>,
    ) -> Result<TransferTask, DispatchError> {
        self.config.limits.check_file(&file)?;
        self.dispatch(TransferRequest {
            file,
            destination_path: path.to_string(),
            metadata: self.config.merged_metadata(metadata),
            correlation_data,
        })
    }

    /// Upload every file in `files` and return the session tracking them.
    ///
    /// Task `i` is stamped with correlation data `{ ...correlation[i], "index": i }`
    /// when `correlation` has exactly one entry per file, and `{ "index": i }`
    /// otherwise.
    ///
    /// Paths and limits are validated before anything is dispatched. If the
    /// backend rejects a file part-way through, the error is returned and the
    /// uploads already started keep running.
    pub fn upload_many(
        &self,
        paths: impl Into<DestinationPaths>,
        files: Vec<SourceFile>,
        correlation: Option<Vec<CorrelationData>>,
        metadata: Option<Metadata>,
    ) -> Result<BatchSession, DispatchError> {
        let destinations = paths.into().resolve(&files)?;
        self.config.limits.check_batch(&files)?;

        let metadata = self.config.merged_metadata(metadata);
        let correlation = correlation.filter(|list| list.len() == files.len());

        let mut tasks = Vec::with_capacity(files.len());
        for (index, (file, destination_path)) in files.into_iter().zip(destinations).enumerate() {
            let mut correlation_data = correlation
                .as_ref()
                .map(|list| list[index].clone())
                .unwrap_or_default();
            correlation_data.insert("index".to_string(), Value::from(index));

            let request = TransferRequest {
                file,
                destination_path,
                metadata: metadata.clone(),
                correlation_data: Some(correlation_data),
            };
            match self.dispatch(request) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    if !tasks.is_empty() {
                        warn!(
                            "Batch dispatch stopped at file #{}; {} upload(s) already started",
                            index,
                            tasks.len()
                        );
                    }
                    return Err(e);
                }
            }
        }

        info!("Dispatched batch of {} upload(s)", tasks.len());
        Ok(BatchSession::new(tasks))
    }

    fn dispatch(&self, request: TransferRequest) -> Result<TransferTask, DispatchError> {
        TransferTask::dispatch(&self.backend, request, &self.config.token_delimiter)
    }
}
