/*!
Account-linked drive backend.

Backups live in one app-scoped folder of the user's drive account. The folder
is created lazily on first use, searching by name before creating so repeated
installs share it. Every operation needs a signed-in [`DriveSession`]; until
the interactive sign-in has produced an access token, calls fail with
[`VaultError::AuthRequired`].

The HTTP transport sits behind [`DriveApi`] so the backend logic can be
exercised without network access.
*/

use super::{order_newest_first, with_timeout, BackupBackend, BackupBlobDescriptor, BlobId};
use crate::config::DriveConfig;
use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,createdTime,size";

/// Access token obtained by the interactive sign-in flow
#[derive(Debug, Clone, Default)]
pub struct DriveSession {
    token: Arc<RwLock<Option<String>>>,
}

impl DriveSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(token);
        session
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    pub fn sign_out(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_signed_in(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn token(&self) -> Result<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| VaultError::auth_required("drive account is not signed in"))
    }
}

/// File metadata as reported by the drive API
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    /// Sent as a decimal string by the API
    #[serde(default)]
    pub size: Option<String>,
}

/// Drive REST operations the backend relies on
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>>;

    async fn create_folder(&self, token: &str, name: &str) -> Result<String>;

    async fn create_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<DriveFile>;

    async fn list_files(&self, token: &str, folder_id: &str) -> Result<Vec<DriveFile>>;

    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>>;

    /// `false` when the file does not exist
    async fn delete(&self, token: &str, file_id: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// [`DriveApi`] over HTTPS
#[derive(Debug, Clone)]
pub struct HttpDriveApi {
    client: Client,
    api_base: String,
    upload_base: String,
    timeout: Duration,
}

impl HttpDriveApi {
    pub fn new(config: &DriveConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_transport(&self, op: &str, error: reqwest::Error) -> VaultError {
        if error.is_timeout() {
            VaultError::timeout(format!("drive {op}"), self.timeout.as_secs())
        } else {
            VaultError::network(format!("Drive {op} request failed: {error}"))
        }
    }

    async fn list_page(
        &self,
        token: &str,
        query: &str,
        fields: &str,
        page_token: Option<&str>,
    ) -> Result<FileList> {
        let mut request = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[("q", query), ("fields", fields), ("spaces", "drive")]);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request.send().await.map_err(|e| self.map_transport("list", e))?;
        let response = check_status("list", response).await?;
        response
            .json::<FileList>()
            .await
            .map_err(|e| VaultError::network(format!("Malformed drive list response: {e}")))
    }
}

/// Escape a value for use inside a single-quoted drive query literal
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

async fn check_status(op: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => {
            VaultError::auth_required(format!("drive {op} rejected the access token"))
        }
        StatusCode::TOO_MANY_REQUESTS => VaultError::network(format!("Drive {op} was rate limited")),
        s if s.is_server_error() => {
            VaultError::network(format!("Drive {op} failed with {s}: {body}"))
        }
        s => VaultError::storage(format!("Drive {op} failed with {s}: {body}")),
    })
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn find_folder(&self, token: &str, name: &str) -> Result<Option<String>> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
            quote(name)
        );
        let page = self
            .list_page(token, &query, "files(id,name)", None)
            .await?;
        Ok(page.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, token: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&[("fields", "id,name")])
            .json(&serde_json::json!({ "name": name, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await
            .map_err(|e| self.map_transport("create folder", e))?;
        let response = check_status("create folder", response).await?;
        let folder: DriveFile = response
            .json()
            .await
            .map_err(|e| VaultError::network(format!("Malformed drive folder response: {e}")))?;
        Ok(folder.id)
    }

    async fn create_file(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<DriveFile> {
        let boundary = format!("moodvault-{}", uuid::Uuid::new_v4().simple());
        let metadata = serde_json::json!({ "name": name, "parents": [folder_id] });

        let mut body = Vec::with_capacity(bytes.len() + 512);
        body.extend_from_slice(
            format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(metadata.to_string().as_bytes());
        body.extend_from_slice(
            format!("\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = self
            .client
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_transport("upload", e))?;
        let response = check_status("upload", response).await?;
        response
            .json()
            .await
            .map_err(|e| VaultError::network(format!("Malformed drive upload response: {e}")))
    }

    async fn list_files(&self, token: &str, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed = false", quote(folder_id));
        let fields = format!("nextPageToken,files({FILE_FIELDS})");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page(token, &query, &fields, page_token.as_deref())
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }

    async fn download(&self, token: &str, file_id: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| self.map_transport("download", e))?;
        let response = check_status("download", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_transport("download", e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, token: &str, file_id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| self.map_transport("delete", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status("delete", response).await?;
        Ok(true)
    }
}

/// Drive storage behind the common backend contract
pub struct DriveBackend {
    api: Arc<dyn DriveApi>,
    session: DriveSession,
    folder_name: String,
    folder_id: Mutex<Option<String>>,
    timeout: Duration,
}

impl DriveBackend {
    pub fn new(api: Arc<dyn DriveApi>, session: DriveSession, folder_name: impl Into<String>) -> Self {
        Self {
            api,
            session,
            folder_name: folder_name.into(),
            folder_id: Mutex::new(None),
            timeout: Duration::from_secs(crate::config::DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }

    /// Backend talking to the real drive API
    pub fn from_config(config: &DriveConfig, session: DriveSession, timeout: Duration) -> Result<Self> {
        let api = HttpDriveApi::new(config, timeout)?;
        Ok(Self::new(Arc::new(api), session, config.folder_name.clone()).with_timeout(timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &DriveSession {
        &self.session
    }

    fn token(&self) -> Result<String> {
        self.session.token()
    }

    /// Run one API call under the timeout; a rejected token ends the session
    async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        let result = with_timeout(operation, self.timeout, fut).await;
        if let Err(VaultError::AuthRequired(reason)) = &result {
            warn!(operation = %operation, reason = %reason, "Drive session rejected; signing out");
            self.session.sign_out();
            *self.folder_id.lock().await = None;
        }
        result
    }

    /// Id of the app folder, searched for and then created if absent
    async fn ensure_folder(&self, token: &str) -> Result<String> {
        let mut cached = self.folder_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let found = with_timeout(
            "find folder",
            self.timeout,
            self.api.find_folder(token, &self.folder_name),
        )
        .await?;
        let id = match found {
            Some(id) => {
                debug!(folder = %self.folder_name, id = %id, "Found drive backup folder");
                id
            }
            None => {
                let id = with_timeout(
                    "create folder",
                    self.timeout,
                    self.api.create_folder(token, &self.folder_name),
                )
                .await?;
                info!(folder = %self.folder_name, id = %id, "Created drive backup folder");
                id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }

    async fn folder(&self, token: &str) -> Result<String> {
        match self.ensure_folder(token).await {
            Err(VaultError::AuthRequired(reason)) => {
                self.session.sign_out();
                Err(VaultError::AuthRequired(reason))
            }
            other => other,
        }
    }
}

#[async_trait]
impl BackupBackend for DriveBackend {
    fn name(&self) -> &'static str {
        "drive"
    }

    async fn is_available(&self) -> bool {
        self.session.is_signed_in()
    }

    async fn upload(&self, bytes: &[u8], name_hint: &str) -> Result<BlobId> {
        let token = self.token()?;
        let folder = self.folder(&token).await?;

        info!(backend = "drive", name = %name_hint, size = bytes.len(), "Uploading backup blob");
        let file = self
            .call(
                "upload",
                self.api.create_file(&token, &folder, name_hint, bytes),
            )
            .await?;
        debug!(backend = "drive", id = %file.id, "Upload complete");
        Ok(BlobId(file.id))
    }

    async fn list(&self) -> Result<Vec<BackupBlobDescriptor>> {
        let token = self.token()?;
        let folder = self.folder(&token).await?;

        let files = self
            .call("list", self.api.list_files(&token, &folder))
            .await?;
        let mut descriptors: Vec<BackupBlobDescriptor> = files
            .into_iter()
            .map(|file| BackupBlobDescriptor {
                size: file
                    .size
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                id: BlobId(file.id),
                name: file.name,
                created_at: file.created_time,
            })
            .collect();
        order_newest_first(&mut descriptors);
        debug!(backend = "drive", count = descriptors.len(), "Listed backup blobs");
        Ok(descriptors)
    }

    async fn download(&self, id: &BlobId) -> Result<Vec<u8>> {
        let token = self.token()?;
        info!(backend = "drive", blob = %id, "Downloading backup blob");
        self.call("download", self.api.download(&token, id.as_str()))
            .await
    }

    async fn delete(&self, id: &BlobId) -> Result<bool> {
        let token = self.token()?;
        info!(backend = "drive", blob = %id, "Deleting backup blob");
        self.call("delete", self.api.delete(&token, id.as_str()))
            .await
    }
}
