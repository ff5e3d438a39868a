//! Accumulated record of completed uploads.

use std::collections::HashSet;

use tracing::info;

use crate::cleanup::CleanupManager;
use crate::error::DeletionError;
use crate::model::CompletedTransfer;
use crate::storage::StorageRef;

/// Completed uploads collected across batches, unique by stable URL.
///
/// Owned by the caller; the engine itself never retains completion records.
#[derive(Debug, Clone, Default)]
pub struct UploadLedger {
    uploads: Vec<CompletedTransfer>,
    seen: HashSet<String>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `completed` unless an upload with the same stable URL is already
    /// recorded. Returns whether it was added.
    pub fn record(&mut self, completed: CompletedTransfer) -> bool {
        if !self.seen.insert(completed.stable_url.clone()) {
            return false;
        }
        self.uploads.push(completed);
        true
    }

    /// Record every completion, returning how many were new.
    pub fn extend(&mut self, completed: impl IntoIterator<Item = CompletedTransfer>) -> usize {
        completed
            .into_iter()
            .map(|c| self.record(c))
            .filter(|added| *added)
            .count()
    }

    /// Recorded uploads in insertion order.
    pub fn uploads(&self) -> &[CompletedTransfer] {
        &self.uploads
    }

    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    pub fn references(&self) -> Vec<StorageRef> {
        self.uploads.iter().map(|c| c.reference.clone()).collect()
    }

    /// Delete every recorded upload and return how many were deleted.
    ///
    /// On success the ledger is emptied. On failure only the uploads whose
    /// deletion failed stay recorded.
    pub async fn revoke_all(&mut self, cleanup: &CleanupManager) -> Result<usize, DeletionError> {
        let references = self.references();
        match cleanup.delete_all(&references).await {
            Ok(()) => {
                let count = self.uploads.len();
                self.uploads.clear();
                self.seen.clear();
                info!("Revoked {} upload(s)", count);
                Ok(count)
            }
            Err(e) => {
                let failed: HashSet<&StorageRef> = e.failed_references().collect();
                self.uploads.retain(|c| failed.contains(&c.reference));
                self.seen = self.uploads.iter().map(|c| c.stable_url.clone()).collect();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::model::{Metadata, SourceFile};
    use crate::storage::StorageBackend;
    use crate::testing::ScriptedStorage;

    fn completed(path: &str, token: &str) -> CompletedTransfer {
        let stable_url = format!("https://storage.test/o/{path}?alt=media");
        CompletedTransfer {
            reference: StorageRef::parse(path).expect("bad path"),
            destination_path: path.to_string(),
            source_file: SourceFile::new("f", "x"),
            correlation_data: None,
            final_metadata: Metadata::new(),
            access_url: format!("{stable_url}&token={token}"),
            stable_url,
        }
    }

    #[test]
    fn test_record_dedupes_by_stable_url() {
        let mut ledger = UploadLedger::new();
        assert!(ledger.record(completed("a", "t1")));
        assert!(!ledger.record(completed("a", "t2")));
        assert!(ledger.record(completed("b", "t1")));

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.uploads()[0].access_url, "https://storage.test/o/a?alt=media&token=t1");
    }

    #[test]
    fn test_extend_counts_new_entries() {
        let mut ledger = UploadLedger::new();
        ledger.record(completed("a", "t"));
        let added = ledger.extend(vec![completed("a", "t"), completed("b", "t"), completed("c", "t")]);
        assert_eq!(added, 2);
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test]
    async fn test_revoke_all_clears_ledger() {
        let storage = ScriptedStorage::new();
        let backend: Arc<dyn StorageBackend> = storage.clone();
        let cleanup = CleanupManager::new(backend);

        let mut ledger = UploadLedger::new();
        ledger.extend(vec![completed("a", "t"), completed("b", "t")]);

        assert_eq!(ledger.revoke_all(&cleanup).await.expect("revoke failed"), 2);
        assert!(ledger.is_empty());
        assert!(ledger.record(completed("a", "t")));
    }

    #[tokio::test]
    async fn test_revoke_all_keeps_failed_entries() {
        let storage = ScriptedStorage::new();
        storage.fail_delete("b");
        let backend: Arc<dyn StorageBackend> = storage.clone();
        let cleanup = CleanupManager::new(backend);

        let mut ledger = UploadLedger::new();
        ledger.extend(vec![completed("a", "t"), completed("b", "t"), completed("c", "t")]);

        let err = ledger.revoke_all(&cleanup).await.unwrap_err();
        assert_eq!(err.succeeded, 2);
        assert_eq!(ledger.references(), vec![StorageRef::parse("b").unwrap()]);
        assert!(!ledger.record(completed("b", "t2")));
    }
}
