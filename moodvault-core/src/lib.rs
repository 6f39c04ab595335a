/*!
# Moodvault Core

Backup, export and restore engine for personal mood tracking records.

The engine mirrors the on-device record store to exactly one remote backend,
keeps a bounded number of backups, and can bring a fresh install back to its
last backed-up state after the user confirms.

- Versioned, leniently decoded snapshot format (gzip-compressed JSON)
- Pluggable backends behind one async contract: drive storage, platform
  container storage, and an in-memory store for tests
- Chunked uploads for backends that cap blob size, with all-or-nothing
  reconstruction
- Debounced automatic backups gated by an interval, and newest-first retention
- Non-destructive merge import

## Architecture

Domain logic (snapshot building, merging, scheduling) talks to the outside
world only through the [`LocalStore`] and [`BackupBackend`] contracts, so the
concrete store and backend are chosen by the host application.

## Usage

```rust,no_run
use moodvault_core::{BackupEngine, DriveSession, FileStore, VaultConfig};
use std::sync::Arc;

# async fn run() -> moodvault_core::Result<()> {
let store = Arc::new(FileStore::open("records.json")?);
let engine = BackupEngine::from_config(
    VaultConfig::default(),
    store,
    DriveSession::signed_in("access-token"),
)?;

// After every record save
engine.notify_change();

// Manual backup from the settings screen
let result = engine.backup_now().await;
println!("{:?}", result);
# Ok(())
# }
```
*/

pub mod archive;
pub mod backend;
pub mod bridge;
pub mod chunk;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod model;
pub mod observability;
pub mod outcome;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod store;


pub use archive::{BackupArchive, BackupEntry, StoredBackup};
pub use backend::drive::{DriveApi, DriveSession, HttpDriveApi};
pub use backend::{
    BackupBackend, BackupBlobDescriptor, BlobId, CloudBackend, DriveBackend, MemoryBackend,
};
pub use bridge::{BridgeStatus, PlatformBackupBridge};
pub use chunk::{chunk, reconstruct, Chunk, ChunkManifest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode, SnapshotCodec};
pub use config::{BackendKind, CloudConfig, DriveConfig, VaultConfig};
pub use engine::{create_backend, BackupEngine};
pub use error::{Result, VaultError};
pub use merge::MergeImporter;
pub use model::{
    CorrelationRecord, GoalRecord, GoalType, MoodEntryRecord, NotificationSettings,
    SavedAnalysis, Segment, Snapshot, UserPreferences, SCHEMA_VERSION,
};
pub use outcome::{ImportReport, OperationResult};
pub use restore::{RestoreOffer, RestoreOrchestrator, RestorePrompt};
pub use retention::{PruneReport, RetentionManager};
pub use scheduler::{BackupScheduler, SchedulerPhase};
pub use snapshot::{DateRange, ExportCategory, ExportFilter, SnapshotBuilder};
pub use state::{BackupState, RestoreOfferState};
pub use store::{FileStore, LocalStore, MemoryStore, StoreExt};
