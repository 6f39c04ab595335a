/*!
Automatic backup scheduling.

Every change to the Local Store calls [`BackupScheduler::trigger_if_needed`].
The call returns at once; a background task waits out the debounce window and
only the last trigger of a burst goes on to evaluate the gate and, if it
passes, upload a full snapshot.

```text
Idle -> Debouncing -> Evaluating -> Skipped
                                 -> Uploading -> Succeeded -> Pruning -> Idle
                                              -> Failed
```

Skipped and Failed are held until the next trigger. A failed backup leaves
`last_successful_backup_at` untouched, so the next evaluation is due again;
there is no other retry.
*/

use crate::archive::{BackupArchive, StoredBackup};
use crate::bridge::PlatformBackupBridge;
use crate::clock::Clock;
use crate::config::{DEFAULT_DEBOUNCE_SECS, DEFAULT_RETENTION_KEEP};
use crate::outcome::OperationResult;
use crate::retention::RetentionManager;
use crate::snapshot::{SnapshotBuilder, DEFAULT_HISTORY_WINDOW_DAYS};
use crate::state::BackupState;
use crate::store::LocalStore;
use crate::{Result, VaultError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulerPhase {
    Idle,
    Debouncing,
    Evaluating,
    Skipped,
    Uploading,
    Succeeded,
    Pruning,
    Failed,
}

pub struct BackupScheduler {
    store: Arc<dyn LocalStore>,
    archive: Arc<BackupArchive>,
    retention: RetentionManager,
    clock: Arc<dyn Clock>,
    bridge: Option<Arc<dyn PlatformBackupBridge>>,
    debounce: Duration,
    retention_keep: usize,
    history_window_days: u32,
    generation: AtomicU64,
    phase: watch::Sender<SchedulerPhase>,
}

impl BackupScheduler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        archive: Arc<BackupArchive>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            store,
            retention: RetentionManager::new(Arc::clone(&archive)),
            archive,
            clock,
            bridge: None,
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            retention_keep: DEFAULT_RETENTION_KEEP,
            history_window_days: DEFAULT_HISTORY_WINDOW_DAYS,
            generation: AtomicU64::new(0),
            phase,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retention_keep(mut self, keep: usize) -> Self {
        self.retention_keep = keep;
        self
    }

    pub fn with_history_window(mut self, days: u32) -> Self {
        self.history_window_days = days;
        self
    }

    /// Platform system backup to nudge after each successful upload
    pub fn with_bridge(mut self, bridge: Arc<dyn PlatformBackupBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Watch the scheduler's current phase
    pub fn subscribe(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        debug!(phase = ?phase, "Scheduler phase");
        self.phase.send_replace(phase);
    }

    /// Publish `phase` only while no later trigger has arrived since `generation`
    fn set_phase_if_current(&self, generation: u64, phase: SchedulerPhase) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.set_phase(phase);
        } else {
            debug!(generation, phase = ?phase, "Phase superseded by a later trigger");
        }
    }

    /// Note a change to the Local Store.
    ///
    /// Never blocks and never fails; must be called from within a tokio
    /// runtime. The returned handle may be dropped.
    pub fn trigger_if_needed(self: &Arc<Self>) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_phase(SchedulerPhase::Debouncing);

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.debounce).await;
            if scheduler.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "Trigger superseded by a later change");
                return;
            }
            scheduler.run_scheduled(generation).await;
        })
    }

    async fn run_scheduled(&self, generation: u64) {
        self.set_phase_if_current(generation, SchedulerPhase::Evaluating);
        if !self.should_backup().await {
            self.set_phase_if_current(generation, SchedulerPhase::Skipped);
            return;
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Scheduled backup left to a later trigger");
            return;
        }

        // Scheduled failures are only logged
        if let Err(e) = self.perform_backup().await {
            if e.is_transient() {
                info!(error = %e, "Scheduled backup deferred to the next evaluation");
            } else {
                warn!(error = %e, "Scheduled backup failed");
            }
        }
    }

    /// Auto backup enabled, backend available, and the interval elapsed
    pub async fn should_backup(&self) -> bool {
        let state = match BackupState::load(self.store.as_ref()) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not read backup state");
                return false;
            }
        };
        if !state.auto_backup_enabled {
            debug!("Auto backup disabled");
            return false;
        }
        if !self.archive.backend().is_available().await {
            debug!(backend = %self.archive.backend().name(), "Backend unavailable");
            return false;
        }
        state.is_due(self.clock.now())
    }

    /// Build, upload and record a full backup, then prune.
    ///
    /// Bypasses the gate. A prune failure is logged and does not fail the
    /// backup.
    pub async fn perform_backup(&self) -> Result<StoredBackup> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.set_phase(SchedulerPhase::Uploading);
        let result = self.upload_and_record().await;

        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::VaultMetrics::global() {
            metrics.record_backup(result.is_ok());
        }

        let stored = match result {
            Ok(stored) => stored,
            Err(e) => {
                self.set_phase_if_current(generation, SchedulerPhase::Failed);
                return Err(e);
            }
        };
        self.set_phase_if_current(generation, SchedulerPhase::Succeeded);
        self.request_platform_backup();

        self.set_phase_if_current(generation, SchedulerPhase::Pruning);
        if let Err(e) = self.retention.prune(self.retention_keep).await {
            warn!(error = %e, "Retention pass failed after backup");
        }
        self.set_phase_if_current(generation, SchedulerPhase::Idle);
        Ok(stored)
    }

    async fn upload_and_record(&self) -> Result<StoredBackup> {
        let snapshot = SnapshotBuilder::new(self.store.as_ref(), self.clock.as_ref())
            .with_history_window(self.history_window_days)
            .export_all()?;
        let records = snapshot.record_count();

        let stored = self.archive.store(&snapshot).await?;

        let mut state = BackupState::load(self.store.as_ref())?;
        state.last_successful_backup_at = Some(self.clock.now());
        state.save(self.store.as_ref())?;

        info!(
            backend = %self.archive.backend().name(),
            stem = %stored.stem,
            size = stored.size,
            records,
            "Backup complete"
        );
        Ok(stored)
    }

    fn request_platform_backup(&self) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        if !bridge.is_available() {
            return;
        }
        match bridge.request_backup() {
            Ok(()) => debug!(status = ?bridge.status(), "Requested platform backup"),
            Err(e) => warn!(error = %e, "Platform backup request failed"),
        }
    }

    /// User-initiated backup; the error string is meant for display
    pub async fn backup_now(&self) -> OperationResult {
        let result = self.perform_backup().await.map(|stored| {
            format!(
                "Backup saved ({} bytes in {} blob{})",
                stored.size,
                stored.blob_ids.len(),
                if stored.blob_ids.len() == 1 { "" } else { "s" }
            )
        });
        if let Err(e) = &result {
            warn!(error = %e, "Manual backup failed");
        }
        result.into()
    }

    /// Turn automatic backups on or off, optionally changing the interval
    pub fn set_auto_backup(&self, enabled: bool, interval_hours: Option<u32>) -> Result<BackupState> {
        let mut state = BackupState::load(self.store.as_ref())?;
        state.auto_backup_enabled = enabled;
        if let Some(hours) = interval_hours {
            if hours == 0 {
                return Err(VaultError::validation("backup interval must be at least one hour"));
            }
            state.interval_hours = hours;
        }
        state.save(self.store.as_ref())?;
        info!(enabled, interval_hours = state.interval_hours, "Auto backup updated");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackupBackend, BackupBlobDescriptor, BlobId, MemoryBackend};
    use crate::bridge::{BridgeStatus, MockPlatformBackupBridge};
    use crate::clock::ManualClock;
    use crate::model::{MoodEntryRecord, Segment};
    use crate::store::{keys, MemoryStore, StoreExt};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tokio::sync::Notify;

    struct Fixture {
        store: Arc<MemoryStore>,
        backend: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        scheduler: Arc<BackupScheduler>,
    }

    fn fixture_with(build: impl FnOnce(BackupScheduler) -> BackupScheduler) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let archive = Arc::new(BackupArchive::new(backend.clone(), clock.clone()));
        let scheduler = BackupScheduler::new(store.clone(), archive, clock.clone())
            .with_debounce(Duration::from_secs(3));
        Fixture {
            store,
            backend,
            clock,
            scheduler: Arc::new(build(scheduler)),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|s| s)
    }

    fn log_mood(store: &MemoryStore, day: u32) {
        let date = NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        let entry = MoodEntryRecord::new(
            date,
            Segment::Evening,
            Some(6),
            "",
            Utc.with_ymd_and_hms(2024, 5, day, 20, 0, 0).unwrap(),
        );
        store
            .set_json(&keys::mood(date, Segment::Evening), &entry)
            .unwrap();
    }

    #[tokio::test]
    async fn test_should_backup_is_false_while_disabled() {
        let f = fixture();
        assert!(!f.scheduler.should_backup().await);

        f.clock.advance(chrono::Duration::days(365));
        assert!(!f.scheduler.should_backup().await);
    }

    #[tokio::test]
    async fn test_should_backup_crosses_interval_exactly() {
        let f = fixture();
        f.scheduler.set_auto_backup(true, Some(24)).unwrap();
        assert!(f.scheduler.should_backup().await);

        f.scheduler.perform_backup().await.unwrap();
        assert!(!f.scheduler.should_backup().await);

        f.clock.advance(chrono::Duration::hours(24) - chrono::Duration::seconds(1));
        assert!(!f.scheduler.should_backup().await);
        f.clock.advance(chrono::Duration::seconds(1));
        assert!(f.scheduler.should_backup().await);
    }

    #[tokio::test]
    async fn test_should_backup_requires_available_backend() {
        let f = fixture();
        f.scheduler.set_auto_backup(true, None).unwrap();
        f.backend.set_available(false);
        assert!(!f.scheduler.should_backup().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_triggers_uploads_once() {
        let f = fixture();
        f.scheduler.set_auto_backup(true, None).unwrap();

        let mut handles = Vec::new();
        for day in 1..=5 {
            log_mood(&f.store, day);
            handles.push(f.scheduler.trigger_if_needed());
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(f.backend.upload_count(), 1);
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Idle);
        let state = BackupState::load(f.store.as_ref()).unwrap();
        assert_eq!(state.last_successful_backup_at, Some(f.clock.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_trigger_is_skipped() {
        let f = fixture();
        log_mood(&f.store, 1);
        f.scheduler.trigger_if_needed().await.unwrap();
        assert_eq!(f.backend.upload_count(), 0);
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_scheduled_backup_is_swallowed_and_retried_next_time() {
        let f = fixture();
        f.scheduler.set_auto_backup(true, None).unwrap();
        f.backend.fail_uploads_after(Some(0));

        f.scheduler.trigger_if_needed().await.unwrap();
        assert_eq!(f.scheduler.phase(), SchedulerPhase::Failed);
        let state = BackupState::load(f.store.as_ref()).unwrap();
        assert!(state.last_successful_backup_at.is_none());
        assert!(f.scheduler.should_backup().await);

        f.backend.fail_uploads_after(None);
        f.scheduler.trigger_if_needed().await.unwrap();
        assert_eq!(f.backend.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_successful_backup_prunes_to_keep() {
        let f = fixture();
        for epoch in 1..=6 {
            f.backend
                .insert_raw(&format!("moodvault_backup_{epoch}.json.gz"), vec![0]);
        }

        f.scheduler.perform_backup().await.unwrap();
        assert_eq!(f.backend.blob_count(), 5);
        assert!(f
            .backend
            .names()
            .iter()
            .all(|name| !name.starts_with("moodvault_backup_1.") && !name.starts_with("moodvault_backup_2.")));
    }

    #[tokio::test]
    async fn test_backup_now_reports_errors_verbatim() {
        let f = fixture();
        f.backend.set_available(false);

        let result = f.scheduler.backup_now().await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("memory backend switched off"));

        f.backend.set_available(true);
        let result = f.scheduler.backup_now().await;
        assert!(result.success);
        assert!(result.message.unwrap().contains("1 blob"));
    }

    #[tokio::test]
    async fn test_platform_bridge_is_nudged_after_success() {
        let mut bridge = MockPlatformBackupBridge::new();
        bridge.expect_is_available().return_const(true);
        bridge.expect_request_backup().times(1).returning(|| Ok(()));
        bridge.expect_status().return_const(BridgeStatus::Pending);

        let f = fixture_with(|s| s.with_bridge(Arc::new(bridge)));
        f.scheduler.perform_backup().await.unwrap();
    }

    #[tokio::test]
    async fn test_platform_bridge_untouched_after_failure() {
        let mut bridge = MockPlatformBackupBridge::new();
        bridge.expect_is_available().never();
        bridge.expect_request_backup().never();

        let f = fixture_with(|s| s.with_bridge(Arc::new(bridge)));
        f.backend.fail_uploads_after(Some(0));
        assert!(f.scheduler.perform_backup().await.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let f = fixture();
        assert!(f.scheduler.set_auto_backup(true, Some(0)).is_err());
        let state = BackupState::load(f.store.as_ref()).unwrap();
        assert!(!state.auto_backup_enabled);
    }

    /// Holds every upload until released
    struct GatedBackend {
        inner: MemoryBackend,
        release: Notify,
    }

    #[async_trait]
    impl BackupBackend for GatedBackend {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn is_available(&self) -> bool {
            self.inner.is_available().await
        }

        async fn upload(&self, bytes: &[u8], name_hint: &str) -> Result<BlobId> {
            self.release.notified().await;
            self.inner.upload(bytes, name_hint).await
        }

        async fn list(&self) -> Result<Vec<BackupBlobDescriptor>> {
            self.inner.list().await
        }

        async fn download(&self, id: &BlobId) -> Result<Vec<u8>> {
            self.inner.download(id).await
        }

        async fn delete(&self, id: &BlobId) -> Result<bool> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_upload_keeps_its_phase() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(GatedBackend {
            inner: MemoryBackend::new(),
            release: Notify::new(),
        });
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let archive = Arc::new(BackupArchive::new(backend.clone(), clock.clone()));
        let scheduler = Arc::new(
            BackupScheduler::new(store.clone(), archive, clock.clone())
                .with_debounce(Duration::from_secs(3)),
        );
        scheduler.set_auto_backup(true, Some(24)).unwrap();
        log_mood(&store, 20);

        let running = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.perform_backup().await })
        };
        while scheduler.phase() != SchedulerPhase::Uploading {
            tokio::task::yield_now().await;
        }

        let trigger = scheduler.trigger_if_needed();
        assert_eq!(scheduler.phase(), SchedulerPhase::Debouncing);

        backend.release.notify_one();
        running.await.unwrap().unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Debouncing);

        // The backup just recorded makes the next evaluation not due
        trigger.await.unwrap();
        assert_eq!(scheduler.phase(), SchedulerPhase::Skipped);
    }
}
