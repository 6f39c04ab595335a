/*!
Snapshot codec.

Encodes snapshots as camelCase JSON, optionally gzip-compressed for upload.
Decoding is deliberately lenient so backups written by older or newer
releases stay restorable: it only fails when the root document cannot be
parsed or announces a schema version this build does not know.
*/

use crate::model::{
    CorrelationRecord, GoalRecord, MoodEntryRecord, NotificationSettings, SavedAnalysis, Snapshot,
    UserPreferences, SUPPORTED_SCHEMA_VERSIONS,
};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::io::{Read, Write};
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Encoder/decoder for the snapshot wire format
#[derive(Debug, Clone)]
pub struct SnapshotCodec {
    compression: Option<Compression>,
    pretty: bool,
}

impl SnapshotCodec {
    /// Gzip-compressed JSON, used for backend uploads
    pub fn compressed() -> Self {
        Self {
            compression: Some(Compression::default()),
            pretty: false,
        }
    }

    /// Plain JSON, used for user-facing exports
    pub fn plain() -> Self {
        Self {
            compression: None,
            pretty: false,
        }
    }

    /// Indented plain JSON
    pub fn pretty() -> Self {
        Self {
            compression: None,
            pretty: true,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// File extension matching this codec's output
    pub fn extension(&self) -> &'static str {
        if self.is_compressed() {
            "json.gz"
        } else {
            "json"
        }
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<Vec<u8>> {
        let json = if self.pretty {
            serde_json::to_vec_pretty(snapshot)?
        } else {
            serde_json::to_vec(snapshot)?
        };

        match self.compression {
            Some(level) => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(&json).map_err(|e| {
                    VaultError::compression(format!("Failed to write data for compression: {e}"))
                })?;
                encoder
                    .finish()
                    .map_err(|e| VaultError::compression(format!("Failed to finish compression: {e}")))
            }
            None => Ok(json),
        }
    }

    /// Decode either compressed or plain bytes; the codec's own setting only
    /// affects encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<Snapshot> {
        decode(bytes)
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::compressed()
    }
}

/// Decode snapshot bytes, sniffing for gzip
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let inflated;
    let json = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| VaultError::format(format!("Failed to decompress snapshot: {e}")))?;
        inflated = out;
        &inflated[..]
    } else {
        bytes
    };

    let root: Value = serde_json::from_slice(json)
        .map_err(|e| VaultError::format(format!("Snapshot is not valid JSON: {e}")))?;
    let Value::Object(mut root) = root else {
        return Err(VaultError::format("Snapshot root is not an object"));
    };

    let schema_version = read_schema_version(&root)?;
    let created_at = root
        .remove("createdAt")
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v).ok())
        .unwrap_or_default();

    let mut snapshot = Snapshot {
        schema_version,
        created_at,
        mood_entries: read_items::<MoodEntryRecord>(&mut root, "moodEntries"),
        goals: read_items::<GoalRecord>(&mut root, "goals"),
        correlation_entries: read_items::<CorrelationRecord>(&mut root, "correlationEntries"),
        notification_settings: read_optional::<NotificationSettings>(
            &mut root,
            "notificationSettings",
        ),
        user_preferences: read_optional::<UserPreferences>(&mut root, "userPreferences"),
        saved_analyses: read_items::<SavedAnalysis>(&mut root, "savedAnalyses"),
    };

    let duplicates = snapshot.dedup();
    if duplicates > 0 {
        warn!(duplicates, "Dropped duplicate records while decoding snapshot");
    }

    debug!(
        schema_version,
        moods = snapshot.mood_entries.len(),
        goals = snapshot.goals.len(),
        "Decoded snapshot"
    );
    Ok(snapshot)
}

fn read_schema_version(root: &Map<String, Value>) -> Result<u32> {
    let version = match root.get("schemaVersion") {
        None | Some(Value::Null) => 1,
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| VaultError::format(format!("Unrecognized schema version {value}")))?,
    };

    if !SUPPORTED_SCHEMA_VERSIONS.contains(&version) {
        return Err(VaultError::format(format!(
            "Unrecognized schema version {version} (supported: {}..={})",
            SUPPORTED_SCHEMA_VERSIONS.start(),
            SUPPORTED_SCHEMA_VERSIONS.end()
        )));
    }
    Ok(version)
}

/// Collect the well-formed elements of an array field; anything else in the
/// field is skipped with a warning
fn read_items<T: DeserializeOwned>(root: &mut Map<String, Value>, field: &str) -> Vec<T> {
    let items = match root.remove(field) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => return Vec::new(),
        Some(_) => {
            warn!(field = %field, "Snapshot field is not a list; ignoring it");
            return Vec::new();
        }
    };

    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(field = %field, error = %e, "Skipping malformed record");
                None
            }
        })
        .collect();

    if parsed.len() < total {
        debug!(field = %field, kept = parsed.len(), total, "Some records were skipped");
    }
    parsed
}

fn read_optional<T: DeserializeOwned>(root: &mut Map<String, Value>, field: &str) -> Option<T> {
    match root.remove(field) {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(field = %field, error = %e, "Ignoring malformed settings block");
                None
            }
        },
    }
}
