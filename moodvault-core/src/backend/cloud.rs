/*!
Platform container backend.

Blobs are files inside a fixed folder of the platform's synced container.
There is no sign-in step: the backend is usable whenever the platform is
enabled and the container is mounted. Every upload and download passes
through a staging file that is removed on every exit path.
*/

use super::{naming, order_newest_first, with_timeout, BackupBackend, BackupBlobDescriptor, BlobId};
use crate::config::CloudConfig;
use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Folder inside the container holding every backup blob
pub const BACKUP_FOLDER: &str = "MoodVaultBackups";

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct CloudBackend {
    container_root: PathBuf,
    staging_dir: PathBuf,
    max_blob_size: Option<usize>,
    platform_enabled: bool,
    timeout: Duration,
}

impl CloudBackend {
    pub fn new<P: AsRef<Path>, S: AsRef<Path>>(container_root: P, staging_dir: S) -> Self {
        Self {
            container_root: container_root.as_ref().to_path_buf(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
            max_blob_size: Some(crate::config::DEFAULT_CLOUD_MAX_BLOB_BYTES),
            platform_enabled: true,
            timeout: Duration::from_secs(crate::config::DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &CloudConfig, timeout: Duration) -> Self {
        Self::new(&config.container_root, &config.staging_dir)
            .with_max_blob_size(Some(config.max_blob_bytes))
            .with_platform_enabled(config.platform_enabled)
            .with_timeout(timeout)
    }

    pub fn with_max_blob_size(mut self, max: Option<usize>) -> Self {
        self.max_blob_size = max;
        self
    }

    pub fn with_platform_enabled(mut self, enabled: bool) -> Self {
        self.platform_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn folder(&self) -> PathBuf {
        self.container_root.join(BACKUP_FOLDER)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.platform_enabled {
            Ok(())
        } else {
            Err(VaultError::availability(
                "platform container storage is not enabled on this device",
            ))
        }
    }

    /// Writes need the container itself; a missing root means it is not mounted
    async fn ensure_container(&self) -> Result<()> {
        self.ensure_enabled()?;
        match tokio::fs::metadata(&self.container_root).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            _ => Err(VaultError::availability(format!(
                "platform container {} is not reachable",
                self.container_root.display()
            ))),
        }
    }

    /// Path of a blob, refusing anything that could escape the folder
    fn blob_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(VaultError::validation(format!("Invalid blob name: {name:?}")));
        }
        Ok(self.folder().join(name))
    }

    fn staging_file(&self) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.staging_dir).map_err(|e| {
            VaultError::storage(format!(
                "Failed to create staging directory {}: {e}",
                self.staging_dir.display()
            ))
        })?;
        tempfile::Builder::new()
            .prefix("moodvault-staging-")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| VaultError::storage(format!("Failed to create staging file: {e}")))
    }

    async fn upload_inner(&self, bytes: &[u8], dest: PathBuf) -> Result<()> {
        // Dropped on every return below, deleting the staging file
        let mut staging = self.staging_file()?;
        staging.write_all(bytes)?;
        staging.flush()?;

        let folder = self.folder();
        tokio::fs::create_dir_all(&folder).await.map_err(|e| {
            VaultError::storage(format!(
                "Failed to create backup folder {}: {e}",
                folder.display()
            ))
        })?;

        let mut partial = dest.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        if let Err(e) = tokio::fs::copy(staging.path(), &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(VaultError::storage(format!(
                "Failed to copy staging file into {}: {e}",
                folder.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(VaultError::storage(format!(
                "Failed to publish {}: {e}",
                dest.display()
            )));
        }
        Ok(())
    }

    async fn download_inner(&self, source: PathBuf) -> Result<Vec<u8>> {
        let staging = self.staging_file()?;
        tokio::fs::copy(&source, staging.path())
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    VaultError::storage(format!("Blob not found: {}", source.display()))
                }
                _ => VaultError::storage(format!(
                    "Failed to stage {} for download: {e}",
                    source.display()
                )),
            })?;
        Ok(tokio::fs::read(staging.path()).await?)
    }

    async fn list_inner(&self) -> Result<Vec<BackupBlobDescriptor>> {
        let folder = self.folder();
        let mut entries = match tokio::fs::read_dir(&folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut descriptors = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }

            // File times are rewritten by container sync; the name is authoritative
            let created_at = match naming::embedded_timestamp(&name) {
                Some(_) => None,
                None => metadata.modified().ok().map(DateTime::<Utc>::from),
            };
            descriptors.push(BackupBlobDescriptor {
                id: BlobId(name.clone()),
                name,
                created_at,
                size: metadata.len(),
            });
        }

        order_newest_first(&mut descriptors);
        Ok(descriptors)
    }
}

#[async_trait]
impl BackupBackend for CloudBackend {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn max_blob_size(&self) -> Option<usize> {
        self.max_blob_size
    }

    async fn is_available(&self) -> bool {
        if !self.platform_enabled {
            return false;
        }
        match tokio::fs::metadata(&self.container_root).await {
            Ok(metadata) => metadata.is_dir(),
            Err(e) => {
                debug!(root = %self.container_root.display(), error = %e, "Container not reachable");
                false
            }
        }
    }

    async fn upload(&self, bytes: &[u8], name_hint: &str) -> Result<BlobId> {
        self.ensure_container().await?;
        let dest = self.blob_path(name_hint)?;
        if let Some(max) = self.max_blob_size {
            if bytes.len() > max {
                return Err(VaultError::storage(format!(
                    "Blob of {} bytes exceeds the container limit of {max} bytes",
                    bytes.len()
                )));
            }
        }

        info!(backend = "cloud", name = %name_hint, size = bytes.len(), "Uploading backup blob");
        with_timeout("upload", self.timeout, self.upload_inner(bytes, dest)).await?;
        Ok(BlobId(name_hint.to_string()))
    }

    async fn list(&self) -> Result<Vec<BackupBlobDescriptor>> {
        self.ensure_enabled()?;
        let descriptors = with_timeout("list", self.timeout, self.list_inner()).await?;
        debug!(backend = "cloud", count = descriptors.len(), "Listed backup blobs");
        Ok(descriptors)
    }

    async fn download(&self, id: &BlobId) -> Result<Vec<u8>> {
        self.ensure_enabled()?;
        let source = self.blob_path(id.as_str())?;
        info!(backend = "cloud", blob = %id, "Downloading backup blob");
        with_timeout("download", self.timeout, self.download_inner(source)).await
    }

    async fn delete(&self, id: &BlobId) -> Result<bool> {
        self.ensure_enabled()?;
        let path = self.blob_path(id.as_str())?;
        let removal = with_timeout("delete", self.timeout, async {
            Ok(tokio::fs::remove_file(&path).await)
        })
        .await?;

        match removal {
            Ok(()) => {
                info!(backend = "cloud", blob = %id, "Deleted backup blob");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!(backend = "cloud", blob = %id, error = %e, "Failed to delete backup blob");
                Err(VaultError::storage(format!(
                    "Failed to delete {}: {e}",
                    path.display()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        container: PathBuf,
        staging: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let container = root.path().join("container");
        let staging = root.path().join("staging");
        std::fs::create_dir_all(&container).unwrap();
        Fixture {
            _root: root,
            container,
            staging,
        }
    }

    fn staging_is_empty(path: &Path) -> bool {
        match std::fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn test_cloud_backend_basic_operations() {
        let f = fixture();
        let backend = CloudBackend::new(&f.container, &f.staging);
        assert!(backend.is_available().await);

        let id = backend
            .upload(b"snapshot bytes", "moodvault_backup_1700000000000.json.gz")
            .await
            .unwrap();
        assert!(f
            .container
            .join(BACKUP_FOLDER)
            .join("moodvault_backup_1700000000000.json.gz")
            .exists());

        let listed = backend.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 14);
        assert_eq!(
            listed[0].created_at,
            naming::embedded_timestamp("moodvault_backup_1700000000000.json.gz")
        );

        assert_eq!(backend.download(&id).await.unwrap(), b"snapshot bytes");
        assert!(backend.delete(&id).await.unwrap());
        assert!(!backend.delete(&id).await.unwrap());
        assert!(staging_is_empty(&f.staging));
    }

    #[tokio::test]
    async fn test_staging_removed_when_upload_fails() {
        let f = fixture();
        // A plain file where the backup folder should be makes the copy fail
        std::fs::write(f.container.join(BACKUP_FOLDER), b"not a folder").unwrap();
        let backend = CloudBackend::new(&f.container, &f.staging);

        let result = backend
            .upload(b"data", "moodvault_backup_1.json.gz")
            .await;
        assert!(result.is_err());
        assert!(staging_is_empty(&f.staging));
    }

    #[tokio::test]
    async fn test_staging_removed_when_download_fails() {
        let f = fixture();
        let backend = CloudBackend::new(&f.container, &f.staging);

        let result = backend
            .download(&BlobId::new("moodvault_backup_404.json.gz"))
            .await;
        assert!(matches!(result, Err(VaultError::Storage(_))));
        assert!(staging_is_empty(&f.staging));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_ignores_partials() {
        let f = fixture();
        let backend = CloudBackend::new(&f.container, &f.staging);
        for epoch in [3000, 1000, 2000] {
            backend
                .upload(b"x", &format!("moodvault_backup_{epoch}.json.gz"))
                .await
                .unwrap();
        }
        std::fs::write(
            f.container
                .join(BACKUP_FOLDER)
                .join("moodvault_backup_9000.json.gz.partial"),
            b"torn",
        )
        .unwrap();

        let names: Vec<String> = backend
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "moodvault_backup_3000.json.gz",
                "moodvault_backup_2000.json.gz",
                "moodvault_backup_1000.json.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_platform_gate_and_limits() {
        let f = fixture();
        let disabled = CloudBackend::new(&f.container, &f.staging).with_platform_enabled(false);
        assert!(!disabled.is_available().await);
        assert!(matches!(
            disabled.list().await,
            Err(VaultError::Availability(_))
        ));

        let missing = CloudBackend::new(f.container.join("unmounted"), &f.staging);
        assert!(!missing.is_available().await);
        assert!(matches!(
            missing.upload(b"x", "moodvault_backup_1.json").await,
            Err(VaultError::Availability(_))
        ));
        assert!(!f.container.join("unmounted").exists());

        let capped = CloudBackend::new(&f.container, &f.staging).with_max_blob_size(Some(2));
        assert!(capped.upload(b"abc", "moodvault_backup_1.json").await.is_err());
        assert!(capped.upload(b"ab", "../escape.json").await.is_err());
    }
}
