/*!
Local Store collaborator.

The primary record store is owned by the tracking feature; the backup engine
only sees it through the [`LocalStore`] contract: string values addressed by
key, plus key enumeration. The builder reads from it, the importer writes to
it, and engine state (`BackupState`, restore offer flags) lives in it too.
*/

use crate::model::Segment;
use crate::{Result, VaultError};
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Key-value contract of the primary record store
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a key; returns whether it was present
    fn remove(&self, key: &str) -> Result<bool>;

    /// Every key currently stored, in no particular order
    fn keys(&self) -> Result<Vec<String>>;
}

/// Typed JSON access on top of any [`LocalStore`]
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()>;
}

impl<S: LocalStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

/// Key layout shared by the tracking feature and the backup engine
pub mod keys {
    use super::*;

    pub const MOOD_PREFIX: &str = "mood:";
    pub const CORRELATION_PREFIX: &str = "correlation:";
    pub const GOALS: &str = "goals";
    pub const NOTIFICATION_SETTINGS: &str = "settings:notifications";
    pub const USER_PREFERENCES: &str = "settings:preferences";
    pub const SAVED_ANALYSES: &str = "analyses";
    pub const BACKUP_STATE: &str = "backup:state";
    pub const RESTORE_OFFER: &str = "backup:restore_offer";

    pub fn mood(date: NaiveDate, segment: Segment) -> String {
        format!("{MOOD_PREFIX}{}:{}", date.format("%Y-%m-%d"), segment)
    }

    pub fn parse_mood(key: &str) -> Option<(NaiveDate, Segment)> {
        let rest = key.strip_prefix(MOOD_PREFIX)?;
        let (date, segment) = rest.rsplit_once(':')?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
        let segment = segment.parse().ok()?;
        Some((date, segment))
    }

    pub fn correlation(date: NaiveDate) -> String {
        format!("{CORRELATION_PREFIX}{}", date.format("%Y-%m-%d"))
    }

    pub fn parse_correlation(key: &str) -> Option<NaiveDate> {
        let rest = key.strip_prefix(CORRELATION_PREFIX)?;
        NaiveDate::parse_from_str(rest, "%Y-%m-%d").ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.data).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.data).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.data).contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.data).remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.data).keys().cloned().collect())
    }
}

/// Store backed by a single JSON document on disk
///
/// The whole map is rewritten on every mutation through a temporary file in
/// the same directory, so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;

        let data = match fs::read(&path) {
            Ok(raw) if raw.is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                VaultError::storage(format!("Corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(VaultError::storage(format!(
                    "Failed to read store file {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut staged, data)?;
        staged.flush()?;
        staged.persist(&self.path).map_err(|e| {
            VaultError::storage(format!(
                "Failed to write store file {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                VaultError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.data).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = lock(&self.data);
        let mut updated = data.clone();
        updated.insert(key.to_string(), value.to_string());
        self.flush(&updated)?;
        *data = updated;
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.data).contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut data = lock(&self.data);
        if !data.contains_key(key) {
            return Ok(false);
        }
        let mut updated = data.clone();
        updated.remove(key);
        self.flush(&updated)?;
        *data = updated;
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.data).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", "1").unwrap();
        assert!(store.has("a").unwrap());
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.keys().unwrap(), vec!["a".to_string()]);

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_typed_json_access() {
        let store = MemoryStore::new();
        store.set_json("numbers", &vec![1, 2, 3]).unwrap();
        let numbers: Vec<u32> = store.get_json("numbers").unwrap().unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);

        let missing: Option<Vec<u32>> = store.get_json("missing").unwrap();
        assert!(missing.is_none());

        store.set("broken", "{not json").unwrap();
        assert!(store.get_json::<Vec<u32>>("broken").is_err());
    }

    #[test]
    fn test_key_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let key = keys::mood(date, Segment::Morning);
        assert_eq!(key, "mood:2024-01-01:morning");
        assert_eq!(keys::parse_mood(&key), Some((date, Segment::Morning)));
        assert_eq!(keys::parse_mood("mood:2024-01-01:night"), None);
        assert_eq!(keys::parse_mood("goals"), None);

        let key = keys::correlation(date);
        assert_eq!(key, "correlation:2024-01-01");
        assert_eq!(keys::parse_correlation(&key), Some(date));
    }

    #[test]
    fn test_file_store_keeps_memory_in_step_with_disk_on_failed_write() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("records");
        let path = dir.join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("goals", "[]").unwrap();

        fs::remove_dir_all(&dir).unwrap();
        assert!(store.set("analyses", "[]").is_err());
        assert!(!store.has("analyses").unwrap());
        assert!(store.remove("goals").is_err());
        assert!(store.has("goals").unwrap());
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("mood:2024-01-01:morning", "{}").unwrap();
        store.set("goals", "[]").unwrap();
        assert!(store.remove("goals").unwrap());
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.keys().unwrap(),
            vec!["mood:2024-01-01:morning".to_string()]
        );
        assert!(!reopened.has("goals").unwrap());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.json");
        fs::write(&path, b"not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(VaultError::Storage(_))));
    }
}
