/*!
Engine facade wiring the components around one selected backend.
*/

use crate::archive::{BackupArchive, BackupEntry};
use crate::backend::drive::DriveSession;
use crate::backend::{BackupBackend, CloudBackend, DriveBackend};
use crate::bridge::PlatformBackupBridge;
use crate::clock::{Clock, SystemClock};
use crate::codec::{self, SnapshotCodec};
use crate::config::{BackendKind, VaultConfig};
use crate::merge::MergeImporter;
use crate::model::Snapshot;
use crate::outcome::{ImportReport, OperationResult};
use crate::restore::RestoreOrchestrator;
use crate::retention::{PruneReport, RetentionManager};
use crate::scheduler::BackupScheduler;
use crate::snapshot::{ExportFilter, SnapshotBuilder};
use crate::state::BackupState;
use crate::store::LocalStore;
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Build the backend named by the configuration.
///
/// Called once at startup; the engine never switches backends afterwards.
pub fn create_backend(
    config: &VaultConfig,
    drive_session: DriveSession,
) -> Result<Arc<dyn BackupBackend>> {
    config.validate()?;

    let backend: Arc<dyn BackupBackend> = match config.backend_kind() {
        BackendKind::Drive => Arc::new(DriveBackend::from_config(
            &config.drive,
            drive_session,
            config.network_timeout(),
        )?),
        BackendKind::Cloud => Arc::new(CloudBackend::from_config(
            &config.cloud,
            config.network_timeout(),
        )),
    };
    info!(backend = %backend.name(), "Selected backup backend");
    Ok(backend)
}

pub struct BackupEngine {
    config: VaultConfig,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    archive: Arc<BackupArchive>,
    retention: RetentionManager,
    scheduler: Arc<BackupScheduler>,
    restore: RestoreOrchestrator,
}

impl BackupEngine {
    pub fn new(
        config: VaultConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn BackupBackend>,
        clock: Arc<dyn Clock>,
        bridge: Option<Arc<dyn PlatformBackupBridge>>,
    ) -> Result<Self> {
        config.validate()?;

        let codec = if config.compress_backups {
            SnapshotCodec::compressed()
        } else {
            SnapshotCodec::plain()
        };
        let archive = Arc::new(
            BackupArchive::new(backend, Arc::clone(&clock))
                .with_codec(codec)
                .with_prefix(config.blob_prefix.clone()),
        );

        let mut scheduler = BackupScheduler::new(
            Arc::clone(&store),
            Arc::clone(&archive),
            Arc::clone(&clock),
        )
        .with_debounce(config.debounce())
        .with_retention_keep(config.retention_keep)
        .with_history_window(config.history_window_days);
        if let Some(bridge) = bridge {
            scheduler = scheduler.with_bridge(bridge);
        }

        Ok(Self {
            retention: RetentionManager::new(Arc::clone(&archive)),
            restore: RestoreOrchestrator::new(
                Arc::clone(&store),
                Arc::clone(&archive),
                Arc::clone(&clock),
            ),
            scheduler: Arc::new(scheduler),
            archive,
            config,
            store,
            clock,
        })
    }

    /// Engine on the wall clock with the platform's backend
    pub fn from_config(
        config: VaultConfig,
        store: Arc<dyn LocalStore>,
        drive_session: DriveSession,
    ) -> Result<Self> {
        let backend = create_backend(&config, drive_session)?;
        Self::new(config, store, backend, Arc::new(SystemClock), None)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn BackupBackend> {
        self.archive.backend()
    }

    pub fn archive(&self) -> &Arc<BackupArchive> {
        &self.archive
    }

    pub fn scheduler(&self) -> &Arc<BackupScheduler> {
        &self.scheduler
    }

    pub fn restore(&self) -> &RestoreOrchestrator {
        &self.restore
    }

    pub fn backup_state(&self) -> Result<BackupState> {
        BackupState::load(self.store.as_ref())
    }

    /// Hook for the record-save path; returns immediately
    pub fn notify_change(&self) -> JoinHandle<()> {
        self.scheduler.trigger_if_needed()
    }

    pub async fn backup_now(&self) -> OperationResult {
        self.scheduler.backup_now().await
    }

    pub async fn restore_now(&self) -> OperationResult {
        self.restore.restore_now().await
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        self.archive.list_backups().await
    }

    /// Prune with an explicit keep count, or the configured one
    pub async fn prune(&self, keep: Option<usize>) -> Result<PruneReport> {
        self.retention
            .prune(keep.unwrap_or(self.config.retention_keep))
            .await
    }

    /// Partial or full export for the user; never used for backups
    pub fn export(&self, filter: &ExportFilter) -> Result<Snapshot> {
        SnapshotBuilder::new(self.store.as_ref(), self.clock.as_ref())
            .with_history_window(self.config.history_window_days)
            .export_selected(filter)
    }

    pub fn import_snapshot(&self, snapshot: &Snapshot) -> ImportReport {
        MergeImporter::new(self.store.as_ref()).import(snapshot)
    }

    /// Decode an exported file (plain or gzip) and merge it
    pub fn import_bytes(&self, bytes: &[u8]) -> Result<ImportReport> {
        let snapshot = codec::decode(bytes)?;
        Ok(self.import_snapshot(&snapshot))
    }
}
