/*!
In-process backend.

Keeps blobs in a vector. It reports no creation metadata, so listing order
comes entirely from the names. Useful for tests and dry runs.
*/

use super::{order_newest_first, BackupBackend, BackupBlobDescriptor, BlobId};
use crate::{Result, VaultError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredBlob {
    id: BlobId,
    name: String,
    bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct MemoryBackend {
    blobs: Mutex<Vec<StoredBlob>>,
    max_blob_size: Option<usize>,
    available: AtomicBool,
    fail_uploads_after: Mutex<Option<usize>>,
    next_id: AtomicUsize,
    uploads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(Vec::new()),
            max_blob_size: None,
            available: AtomicBool::new(true),
            fail_uploads_after: Mutex::new(None),
            next_id: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Cap blob size, forcing callers to chunk larger payloads
    pub fn with_max_blob_size(mut self, max: usize) -> Self {
        self.max_blob_size = Some(max);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Let `successes` more uploads through, then fail every upload.
    /// `None` clears the failure mode.
    pub fn fail_uploads_after(&self, successes: Option<usize>) {
        *lock(&self.fail_uploads_after) = successes;
    }

    /// Number of successful uploads so far
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.blobs).iter().map(|b| b.name.clone()).collect()
    }

    /// Store a blob directly, bypassing size checks and failure modes
    pub fn insert_raw(&self, name: &str, bytes: Vec<u8>) -> BlobId {
        let id = self.allocate_id();
        lock(&self.blobs).push(StoredBlob {
            id: id.clone(),
            name: name.to_string(),
            bytes,
        });
        id
    }

    fn allocate_id(&self) -> BlobId {
        BlobId(format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl BackupBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn max_blob_size(&self) -> Option<usize> {
        self.max_blob_size
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn upload(&self, bytes: &[u8], name_hint: &str) -> Result<BlobId> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(VaultError::availability("memory backend switched off"));
        }
        {
            let mut budget = lock(&self.fail_uploads_after);
            match budget.as_mut() {
                Some(0) => return Err(VaultError::network("simulated upload failure")),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        if let Some(max) = self.max_blob_size {
            if bytes.len() > max {
                return Err(VaultError::storage(format!(
                    "blob of {} bytes exceeds the {max} byte limit",
                    bytes.len()
                )));
            }
        }

        let id = self.insert_raw(name_hint, bytes.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<BackupBlobDescriptor>> {
        let mut descriptors: Vec<BackupBlobDescriptor> = lock(&self.blobs)
            .iter()
            .map(|blob| BackupBlobDescriptor {
                id: blob.id.clone(),
                name: blob.name.clone(),
                created_at: None,
                size: blob.bytes.len() as u64,
            })
            .collect();
        order_newest_first(&mut descriptors);
        Ok(descriptors)
    }

    async fn download(&self, id: &BlobId) -> Result<Vec<u8>> {
        lock(&self.blobs)
            .iter()
            .find(|blob| &blob.id == id)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| VaultError::storage(format!("Blob not found: {id}")))
    }

    async fn delete(&self, id: &BlobId) -> Result<bool> {
        let mut blobs = lock(&self.blobs);
        let before = blobs.len();
        blobs.retain(|blob| &blob.id != id);
        Ok(blobs.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_basic_operations() {
        let backend = MemoryBackend::new();
        let id = backend
            .upload(b"payload", "moodvault_backup_10.json.gz")
            .await
            .unwrap();

        assert_eq!(backend.download(&id).await.unwrap(), b"payload");
        let listed = backend.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 7);
        assert!(listed[0].created_at.is_some());

        assert!(backend.delete(&id).await.unwrap());
        assert!(!backend.delete(&id).await.unwrap());
        assert!(backend.download(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_limits_and_failures() {
        let backend = MemoryBackend::new().with_max_blob_size(4);
        assert!(backend.upload(b"12345", "a_1.json").await.is_err());
        assert!(backend.upload(b"1234", "a_1.json").await.is_ok());

        backend.fail_uploads_after(Some(1));
        assert!(backend.upload(b"1", "a_2.json").await.is_ok());
        assert!(matches!(
            backend.upload(b"1", "a_3.json").await,
            Err(VaultError::Network(_))
        ));

        backend.fail_uploads_after(None);
        backend.set_available(false);
        assert!(!backend.is_available().await);
        assert!(matches!(
            backend.upload(b"1", "a_4.json").await,
            Err(VaultError::Availability(_))
        ));
        assert_eq!(backend.upload_count(), 2);
    }
}
