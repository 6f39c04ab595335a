/*!
Retention manager.

Keeps the newest `keep` logical backups and deletes the rest. Called only
after a successful backup; the restore path never prunes.
*/

use crate::archive::BackupArchive;
use crate::{Result, VaultError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What one prune pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Backups left in place
    pub kept: usize,
    /// Stems of the backups deleted
    pub deleted: Vec<String>,
    /// Stems that could not be fully deleted, with the reason
    pub failed: Vec<(String, String)>,
}

pub struct RetentionManager {
    archive: Arc<BackupArchive>,
}

impl RetentionManager {
    pub fn new(archive: Arc<BackupArchive>) -> Self {
        Self { archive }
    }

    /// Delete every backup beyond the newest `keep`.
    ///
    /// A failed delete does not stop the pass; it is reported and the backup
    /// is picked up again by the next prune.
    pub async fn prune(&self, keep: usize) -> Result<PruneReport> {
        if keep == 0 {
            return Err(VaultError::validation("prune must keep at least one backup"));
        }

        let entries = self.archive.list_backups().await?;
        let mut report = PruneReport {
            kept: entries.len().min(keep),
            ..Default::default()
        };

        for entry in entries.iter().skip(keep) {
            match self.archive.remove(entry).await {
                Ok(_) => report.deleted.push(entry.stem.clone()),
                Err(e) => {
                    warn!(stem = %entry.stem, error = %e, "Failed to prune backup");
                    report.failed.push((entry.stem.clone(), e.to_string()));
                }
            }
        }

        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::VaultMetrics::global() {
            metrics.record_pruned(report.deleted.len());
        }

        info!(
            kept = report.kept,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Retention pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackupBackend, MemoryBackend};
    use crate::clock::SystemClock;

    fn manager(backend: Arc<MemoryBackend>) -> RetentionManager {
        RetentionManager::new(Arc::new(BackupArchive::new(
            backend,
            Arc::new(SystemClock),
        )))
    }

    #[tokio::test]
    async fn test_prune_deletes_the_two_oldest_of_seven() {
        let backend = Arc::new(MemoryBackend::new());
        for epoch in 1..=7 {
            backend.insert_raw(
                &format!("moodvault_backup_{}.json.gz", 1_700_000_000_000i64 + epoch),
                vec![epoch as u8],
            );
        }

        let report = manager(backend.clone()).prune(5).await.unwrap();
        assert_eq!(report.kept, 5);
        assert_eq!(
            report.deleted,
            vec!["moodvault_backup_1700000000002", "moodvault_backup_1700000000001"]
        );

        let remaining: Vec<String> = backend
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(remaining.len(), 5);
        assert_eq!(remaining[0], "moodvault_backup_1700000000007.json.gz");
        assert_eq!(remaining[4], "moodvault_backup_1700000000003.json.gz");
    }

    #[tokio::test]
    async fn test_prune_with_fewer_backups_than_keep() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_raw("moodvault_backup_1.json.gz", vec![1]);
        let report = manager(backend.clone()).prune(5).await.unwrap();
        assert_eq!(report.kept, 1);
        assert!(report.deleted.is_empty());
        assert_eq!(backend.blob_count(), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_every_part_of_a_chunked_backup() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_raw("moodvault_backup_1.part-000-of-002.json.gz", vec![1]);
        backend.insert_raw("moodvault_backup_1.part-001-of-002.json.gz", vec![2]);
        backend.insert_raw("moodvault_backup_2.json.gz", vec![3]);

        let report = manager(backend.clone()).prune(1).await.unwrap();
        assert_eq!(report.deleted, vec!["moodvault_backup_1"]);
        assert_eq!(backend.names(), vec!["moodvault_backup_2.json.gz"]);
    }

    #[tokio::test]
    async fn test_keep_zero_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        assert!(matches!(
            manager(backend).prune(0).await,
            Err(VaultError::Validation(_))
        ));
    }
}
