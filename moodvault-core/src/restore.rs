/*!
Restore orchestrator.

On a fresh install the engine may offer to restore the newest remote backup.
The offer is made only when all of these hold:

1. the Local Store holds no mood entries,
2. no offer has been made before (sticky), with the remote lookup done at
   most once per day,
3. at least one backup can be listed.

Restoring always waits for an explicit confirmation from the UI and never
prunes anything.
*/

use crate::archive::BackupArchive;
use crate::clock::Clock;
use crate::merge::MergeImporter;
use crate::outcome::{ImportReport, OperationResult};
use crate::state::RestoreOfferState;
use crate::store::{keys, LocalStore};
use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confirmation request handed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOffer {
    pub backend: &'static str,
    pub stem: String,
    pub created_at: Option<DateTime<Utc>>,
    pub size: u64,
}

/// UI side of the restore confirmation
#[async_trait]
pub trait RestorePrompt: Send + Sync {
    /// `true` to go ahead with the restore
    async fn confirm_restore(&self, offer: &RestoreOffer) -> bool;
}

pub struct RestoreOrchestrator {
    store: Arc<dyn LocalStore>,
    archive: Arc<BackupArchive>,
    clock: Arc<dyn Clock>,
}

impl RestoreOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        archive: Arc<BackupArchive>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            archive,
            clock,
        }
    }

    fn has_mood_entries(&self) -> Result<bool> {
        Ok(self
            .store
            .keys()?
            .iter()
            .any(|key| keys::parse_mood(key).is_some()))
    }

    /// Evaluate the offer gate; `Some` means the UI should ask the user.
    ///
    /// Emitting an offer marks it as made. A failed listing is returned as an
    /// error and does not count as the day's check.
    pub async fn check_for_restore(&self) -> Result<Option<RestoreOffer>> {
        if self.has_mood_entries()? {
            debug!("Local store has mood entries; no restore offer");
            return Ok(None);
        }

        let mut offer_state = RestoreOfferState::load(self.store.as_ref())?;
        let now = self.clock.now();
        if offer_state.offered {
            return Ok(None);
        }
        if offer_state.checked_within_last_day(now) {
            debug!("Restore availability already checked today");
            return Ok(None);
        }

        let backend = self.archive.backend();
        if !backend.is_available().await {
            debug!(backend = %backend.name(), "Backend unavailable; restore check postponed");
            return Ok(None);
        }

        let newest = self.archive.list_backups().await?.into_iter().next();
        offer_state.last_checked_at = Some(now);

        let Some(entry) = newest else {
            offer_state.save(self.store.as_ref())?;
            debug!(backend = %backend.name(), "No remote backups to offer");
            return Ok(None);
        };

        offer_state.offered = true;
        offer_state.save(self.store.as_ref())?;

        info!(backend = %backend.name(), stem = %entry.stem, "Offering restore");
        Ok(Some(RestoreOffer {
            backend: backend.name(),
            stem: entry.stem,
            created_at: entry.created_at,
            size: entry.size,
        }))
    }

    /// Fetch the newest backup and merge it into the Local Store.
    ///
    /// Only the newest backup is considered; an unreadable or incomplete one
    /// fails the restore without touching local data.
    pub async fn restore_latest(&self) -> Result<ImportReport> {
        let (entry, snapshot) = self
            .archive
            .fetch_latest()
            .await?
            .ok_or_else(|| VaultError::storage("No backup available to restore"))?;

        info!(
            stem = %entry.stem,
            records = snapshot.record_count(),
            schema_version = snapshot.schema_version,
            "Restoring backup"
        );
        let report = MergeImporter::new(self.store.as_ref()).import(&snapshot);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::VaultMetrics::global() {
            metrics.record_restore();
        }

        Ok(report)
    }

    /// User-initiated restore; errors are meant for display
    pub async fn restore_now(&self) -> OperationResult {
        match self.restore_latest().await {
            Ok(report) => match &report.error {
                None => OperationResult::succeeded(report.summary()),
                Some(error) => OperationResult {
                    success: false,
                    message: Some(report.summary()),
                    error: Some(error.clone()),
                },
            },
            Err(e) => {
                warn!(error = %e, "Restore failed");
                OperationResult::failed(&e)
            }
        }
    }

    /// Startup flow: evaluate the gate, ask the user, restore on yes
    pub async fn run_startup_check(&self, prompt: &dyn RestorePrompt) -> Result<Option<ImportReport>> {
        let Some(offer) = self.check_for_restore().await? else {
            return Ok(None);
        };

        if !prompt.confirm_restore(&offer).await {
            info!(stem = %offer.stem, "Restore declined");
            return Ok(None);
        }
        self.restore_latest().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackupBackend, MemoryBackend};
    use crate::clock::ManualClock;
    use crate::model::{GoalRecord, GoalType, MoodEntryRecord, Segment, Snapshot};
    use crate::store::{MemoryStore, StoreExt};
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Answer {
        accept: bool,
        asked: AtomicUsize,
    }

    impl Answer {
        fn new(accept: bool) -> Self {
            Self {
                accept,
                asked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RestorePrompt for Answer {
        async fn confirm_restore(&self, _offer: &RestoreOffer) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        archive: Arc<BackupArchive>,
        restore: RestoreOrchestrator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap(),
        ));
        let archive = Arc::new(BackupArchive::new(backend.clone(), clock.clone()));
        let restore = RestoreOrchestrator::new(store.clone(), archive.clone(), clock.clone());
        Fixture {
            store,
            backend,
            clock,
            archive,
            restore,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn remote_snapshot() -> Snapshot {
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let mut snapshot = Snapshot::empty(at);
        snapshot.mood_entries = vec![
            MoodEntryRecord::new(day(1), Segment::Morning, Some(7), "", at),
            MoodEntryRecord::new(day(1), Segment::Midday, Some(5), "", at),
            MoodEntryRecord::new(day(2), Segment::Evening, Some(8), "walk", at),
        ];
        snapshot.goals = vec![GoalRecord {
            id: "goal-1".into(),
            goal_type: GoalType::LoggingStreak,
            target_value: 7.0,
            target_days: 7,
            created_date: day(1),
            completed_date: None,
            is_completed: false,
        }];
        snapshot
    }

    #[tokio::test]
    async fn test_fresh_install_restores_after_confirmation() {
        let f = fixture();
        f.archive.store(&remote_snapshot()).await.unwrap();

        let prompt = Answer::new(true);
        let report = f
            .restore
            .run_startup_check(&prompt)
            .await
            .unwrap()
            .expect("restore should run");

        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
        assert_eq!((report.imported_moods, report.skipped_moods), (3, 0));
        assert_eq!((report.imported_goals, report.skipped_goals), (1, 0));
        assert!(f
            .store
            .has(&keys::mood(day(2), Segment::Evening))
            .unwrap());
    }

    #[tokio::test]
    async fn test_no_offer_when_local_moods_exist() {
        let f = fixture();
        f.archive.store(&remote_snapshot()).await.unwrap();
        let local = MoodEntryRecord::new(day(9), Segment::Morning, Some(3), "", f.clock.now());
        f.store
            .set_json(&keys::mood(day(9), Segment::Morning), &local)
            .unwrap();

        assert!(f.restore.check_for_restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offer_is_sticky_even_when_declined() {
        let f = fixture();
        f.archive.store(&remote_snapshot()).await.unwrap();

        let prompt = Answer::new(false);
        assert!(f.restore.run_startup_check(&prompt).await.unwrap().is_none());
        assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
        assert!(f.store.keys().unwrap().iter().all(|k| keys::parse_mood(k).is_none()));

        f.clock.advance(Duration::days(30));
        assert!(f.restore.check_for_restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_checked_at_most_daily() {
        let f = fixture();
        assert!(f.restore.check_for_restore().await.unwrap().is_none());

        // A backup appears later the same day; it is not looked for until tomorrow
        f.archive.store(&remote_snapshot()).await.unwrap();
        f.clock.advance(Duration::hours(23));
        assert!(f.restore.check_for_restore().await.unwrap().is_none());

        f.clock.advance(Duration::hours(1));
        let offer = f.restore.check_for_restore().await.unwrap().unwrap();
        assert_eq!(offer.backend, "memory");
    }

    #[tokio::test]
    async fn test_unavailable_backend_does_not_use_up_the_check() {
        let f = fixture();
        f.archive.store(&remote_snapshot()).await.unwrap();
        f.backend.set_available(false);
        assert!(f.restore.check_for_restore().await.unwrap().is_none());

        f.backend.set_available(true);
        assert!(f.restore.check_for_restore().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incomplete_newest_backup_fails_closed() {
        let f = fixture();
        f.archive.store(&remote_snapshot()).await.unwrap();

        // Newer chunked backup with its second part lost
        f.clock.advance(Duration::hours(1));
        let stem = format!("moodvault_backup_{}", f.clock.now().timestamp_millis());
        f.backend
            .insert_raw(&format!("{stem}.part-000-of-002.json"), b"{".to_vec());

        let result = f.restore.restore_now().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing"));
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_no_backups() {
        let f = fixture();
        let result = f.restore.restore_now().await;
        assert!(!result.success);
        assert!(f.backend.list().await.unwrap().is_empty());
    }
}
