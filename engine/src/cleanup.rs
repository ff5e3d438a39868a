//! Bulk deletion of uploaded objects.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::error::{DeletionError, StorageError};
use crate::model::CompletedTransfer;
use crate::storage::{StorageBackend, StorageRef};

/// Deletes objects from a backend.
///
/// Deletions are issued concurrently and never retried. A failed deletion
/// does not undo the ones that succeeded.
#[derive(Clone)]
pub struct CleanupManager {
    backend: Arc<dyn StorageBackend>,
}

impl CleanupManager {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        CleanupManager { backend }
    }

    /// Delete every reference. Succeeds only if every deletion succeeds.
    pub async fn delete_all(&self, references: &[StorageRef]) -> Result<(), DeletionError> {
        let results = join_all(references.iter().map(|reference| self.backend.delete(reference))).await;

        let mut succeeded = 0;
        let mut failures = Vec::new();
        for (reference, result) in references.iter().zip(results) {
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    warn!("Failed to delete {}: {}", reference, e);
                    failures.push((reference.clone(), e));
                }
            }
        }

        debug!("Deleted {} of {} object(s)", succeeded, references.len());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeletionError { failures, succeeded })
        }
    }

    /// Delete the objects behind completed uploads.
    pub async fn delete_completed(&self, completed: &[CompletedTransfer]) -> Result<(), DeletionError> {
        let references: Vec<StorageRef> = completed.iter().map(|c| c.reference.clone()).collect();
        self.delete_all(&references).await
    }

    /// Delete the object at a logical path.
    pub async fn delete_path(&self, path: &str) -> Result<(), StorageError> {
        let reference = self.backend.reference(path)?;
        self.backend.delete(&reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStorage;

    fn manager(storage: &Arc<ScriptedStorage>) -> CleanupManager {
        let backend: Arc<dyn StorageBackend> = storage.clone();
        CleanupManager::new(backend)
    }

    fn refs(paths: &[&str]) -> Vec<StorageRef> {
        paths
            .iter()
            .map(|path| StorageRef::parse(path).expect("bad path"))
            .collect()
    }

    #[tokio::test]
    async fn test_delete_all_succeeds() {
        let storage = ScriptedStorage::new();
        manager(&storage)
            .delete_all(&refs(&["a", "b", "c"]))
            .await
            .expect("delete_all failed");

        let mut deleted = storage.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_one_failure_fails_all_without_rollback() {
        let storage = ScriptedStorage::new();
        storage.fail_delete("b");

        let err = manager(&storage)
            .delete_all(&refs(&["a", "b", "c"]))
            .await
            .unwrap_err();

        assert_eq!(err.succeeded, 2);
        let failed: Vec<&str> = err.failed_references().map(StorageRef::path).collect();
        assert_eq!(failed, vec!["b"]);
        assert_eq!(err.to_string(), "1 of 3 deletions failed");

        let mut deleted = storage.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_empty_delete_is_ok() {
        let storage = ScriptedStorage::new();
        assert!(manager(&storage).delete_all(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_path() {
        let storage = ScriptedStorage::new();
        let cleanup = manager(&storage);

        cleanup.delete_path("/uploads/a.png").await.expect("delete failed");
        assert_eq!(storage.deleted(), vec!["uploads/a.png"]);

        let err = cleanup.delete_path("uploads/../a").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
    }
}
