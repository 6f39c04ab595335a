/*!
Logical backups over raw backend blobs.

A backup is either one blob or, on backends that cap blob size, a set of
part blobs sharing a stem. The archive encodes and uploads snapshots, groups
listed blobs back into backups (keeping the backend's newest-first order) and
downloads them again with all-or-nothing reconstruction.
*/

use crate::backend::{naming, BackupBackend, BackupBlobDescriptor, BlobId};
use crate::chunk::{self, Chunk, ChunkManifest};
use crate::clock::Clock;
use crate::codec::{self, SnapshotCodec};
use crate::config::DEFAULT_BLOB_PREFIX;
use crate::model::Snapshot;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One logical backup as seen through `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    /// Name shared by every blob of this backup, up to the first dot
    pub stem: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Total stored bytes across all blobs
    pub size: u64,
    /// Expected part count; `None` for a single-blob backup
    pub chunk_count: Option<usize>,
    pub blobs: Vec<BackupBlobDescriptor>,
}

impl BackupEntry {
    pub fn is_chunked(&self) -> bool {
        self.chunk_count.is_some()
    }

    /// Whether every part of a chunked backup is present
    pub fn is_complete(&self) -> bool {
        match self.chunk_count {
            None => self.blobs.len() == 1,
            Some(count) => {
                let mut seen = vec![false; count];
                for blob in &self.blobs {
                    if let Some((index, _)) = naming::parse(&blob.name).part {
                        if let Some(slot) = seen.get_mut(index) {
                            *slot = true;
                        }
                    }
                }
                seen.iter().all(|present| *present)
            }
        }
    }
}

/// Where a freshly written backup ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub stem: String,
    pub blob_ids: Vec<BlobId>,
    pub size: usize,
}

pub struct BackupArchive {
    backend: Arc<dyn BackupBackend>,
    codec: SnapshotCodec,
    prefix: String,
    clock: Arc<dyn Clock>,
    /// Newest epoch handed out by this archive
    last_epoch_ms: AtomicI64,
}

impl BackupArchive {
    pub fn new(backend: Arc<dyn BackupBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            codec: SnapshotCodec::default(),
            prefix: DEFAULT_BLOB_PREFIX.to_string(),
            clock,
            last_epoch_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn with_codec(mut self, codec: SnapshotCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn backend(&self) -> &Arc<dyn BackupBackend> {
        &self.backend
    }

    /// Encode and upload a snapshot, splitting it into parts when the backend
    /// caps blob size.
    ///
    /// Parts already written by a failed chunked upload are deleted on a best
    /// effort basis; anything left behind is detected as incomplete on read.
    pub async fn store(&self, snapshot: &Snapshot) -> Result<StoredBackup> {
        let bytes = self.codec.encode(snapshot)?;
        let epoch_ms = self.next_epoch_ms().await?;
        let ext = self.codec.extension();
        let stem = format!("{}_{epoch_ms}", self.prefix);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::VaultMetrics::global() {
            metrics.record_snapshot_size(bytes.len());
        }

        let max = self.backend.max_blob_size();
        if max.map_or(true, |max| bytes.len() <= max) {
            let name = naming::backup_name(&self.prefix, epoch_ms, ext);
            let id = self.backend.upload(&bytes, &name).await?;
            info!(
                backend = %self.backend.name(),
                name = %name,
                size = bytes.len(),
                "Stored backup"
            );
            return Ok(StoredBackup {
                stem,
                blob_ids: vec![id],
                size: bytes.len(),
            });
        }

        let manifest = chunk::chunk(&bytes, max.unwrap_or(bytes.len()))?;
        let count = manifest.chunk_count;
        let mut uploaded = Vec::with_capacity(count);
        for part in &manifest.chunks {
            let name = naming::part_name(&self.prefix, epoch_ms, part.index, count, ext);
            match self.backend.upload(&part.data, &name).await {
                Ok(id) => uploaded.push(id),
                Err(e) => {
                    warn!(
                        backend = %self.backend.name(),
                        part = part.index,
                        chunk_count = count,
                        error = %e,
                        "Chunked upload failed; removing written parts"
                    );
                    self.discard(&uploaded).await;
                    return Err(e);
                }
            }
        }

        info!(
            backend = %self.backend.name(),
            stem = %stem,
            size = manifest.total_len(),
            chunk_count = count,
            "Stored chunked backup"
        );
        Ok(StoredBackup {
            stem,
            blob_ids: uploaded,
            size: bytes.len(),
        })
    }

    /// Epoch for a new backup's name, strictly after every backup already
    /// stored under this prefix and every epoch this archive handed out.
    async fn next_epoch_ms(&self) -> Result<i64> {
        let listed_max = self
            .backend
            .list()
            .await?
            .iter()
            .map(|descriptor| naming::parse(&descriptor.name))
            .filter(|parsed| {
                parsed.stem.rsplit_once('_').map(|(prefix, _)| prefix) == Some(self.prefix.as_str())
            })
            .filter_map(|parsed| parsed.epoch_ms)
            .max();

        let now_ms = self.clock.now().timestamp_millis();
        let floor = listed_max.map_or(now_ms, |max| now_ms.max(max.saturating_add(1)));
        let bump = |last: i64| floor.max(last.saturating_add(1));

        let previous = match self
            .last_epoch_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(bump(last)))
        {
            Ok(previous) | Err(previous) => previous,
        };
        let epoch_ms = bump(previous);
        if epoch_ms != now_ms {
            debug!(now_ms, epoch_ms, "Moved backup name past an existing one");
        }
        Ok(epoch_ms)
    }

    async fn discard(&self, ids: &[BlobId]) {
        for id in ids {
            if let Err(e) = self.backend.delete(id).await {
                warn!(blob = %id, error = %e, "Could not remove orphaned part");
            }
        }
    }

    /// Logical backups, newest first. Blobs without a generated name are
    /// not backups and are left out.
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        let descriptors = self.backend.list().await?;
        let mut entries: Vec<BackupEntry> = Vec::new();

        for descriptor in descriptors {
            let parsed = naming::parse(&descriptor.name);
            if parsed.epoch_ms.is_none() {
                debug!(name = %descriptor.name, "Ignoring foreign blob");
                continue;
            }
            let chunk_count = parsed.part.map(|(_, count)| count);

            match entries.iter_mut().find(|e| e.stem == parsed.stem) {
                Some(entry) => {
                    entry.size += descriptor.size;
                    if entry.created_at.is_none() {
                        entry.created_at = descriptor.created_at;
                    }
                    if entry.chunk_count.is_none() {
                        entry.chunk_count = chunk_count;
                    }
                    entry.blobs.push(descriptor);
                }
                None => entries.push(BackupEntry {
                    stem: parsed.stem,
                    created_at: descriptor.created_at,
                    size: descriptor.size,
                    chunk_count,
                    blobs: vec![descriptor],
                }),
            }
        }

        Ok(entries)
    }

    /// Download and decode one backup. A chunked backup with any part
    /// missing fails with [`VaultError::IncompleteManifest`].
    pub async fn fetch(&self, entry: &BackupEntry) -> Result<Snapshot> {
        let bytes = match entry.chunk_count {
            None => {
                let blob = entry.blobs.first().ok_or_else(|| {
                    VaultError::storage(format!("Backup {} has no blobs", entry.stem))
                })?;
                self.backend.download(&blob.id).await?
            }
            Some(count) => self.fetch_chunked(entry, count).await?,
        };

        debug!(stem = %entry.stem, size = bytes.len(), "Decoding backup");
        codec::decode(&bytes)
    }

    async fn fetch_chunked(&self, entry: &BackupEntry, count: usize) -> Result<Vec<u8>> {
        let mut chunks = Vec::with_capacity(entry.blobs.len());
        for blob in &entry.blobs {
            let Some((index, part_count)) = naming::parse(&blob.name).part else {
                return Err(VaultError::format(format!(
                    "Backup {} mixes whole and chunked blobs",
                    entry.stem
                )));
            };
            if part_count != count {
                return Err(VaultError::format(format!(
                    "Backup {} has parts of {part_count} and {count}",
                    entry.stem
                )));
            }
            chunks.push(Chunk {
                index,
                data: Vec::new(),
            });
        }

        // Fail closed before spending downloads on a torn backup
        let probe = ChunkManifest::from_parts(count, chunks);
        if let Err(e @ VaultError::IncompleteManifest { .. }) = chunk::reconstruct(&probe) {
            warn!(stem = %entry.stem, error = %e, "Backup is incomplete");
            return Err(e);
        }

        let mut chunks = Vec::with_capacity(entry.blobs.len());
        for blob in &entry.blobs {
            let data = self.backend.download(&blob.id).await?;
            if let Some((index, _)) = naming::parse(&blob.name).part {
                chunks.push(Chunk { index, data });
            }
        }
        chunk::reconstruct(&ChunkManifest::from_parts(count, chunks))
    }

    /// Newest backup and its decoded snapshot. Only the newest one is tried;
    /// if it cannot be read the error is returned rather than an older copy.
    pub async fn fetch_latest(&self) -> Result<Option<(BackupEntry, Snapshot)>> {
        let Some(entry) = self.list_backups().await?.into_iter().next() else {
            return Ok(None);
        };
        let snapshot = self.fetch(&entry).await?;
        Ok(Some((entry, snapshot)))
    }

    /// Delete every blob of a backup concurrently. All blobs are attempted;
    /// the first failure is returned.
    pub async fn remove(&self, entry: &BackupEntry) -> Result<usize> {
        let results = join_all(entry.blobs.iter().map(|blob| async move {
            (blob, self.backend.delete(&blob.id).await)
        }))
        .await;

        let mut removed = 0;
        let mut first_error = None;
        for (blob, result) in results {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(blob = %blob.id, error = %e, "Failed to delete backup blob");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}
