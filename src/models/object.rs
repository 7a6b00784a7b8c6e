//! Represents an object row stored by the SQLite backend.

use super::entry::RemoteEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a single object within a container.
///
/// The payload itself lives on disk; this struct only holds what the store
/// reports back on `head` and `list`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent container.
    pub container_id: Uuid,

    /// Object key (path-like identifier within the container).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: String,

    /// Manifest reference for segmented objects.
    pub manifest: Option<String>,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,
}

impl From<Object> for RemoteEntry {
    fn from(obj: Object) -> Self {
        RemoteEntry::new(obj.key, obj.size_bytes.max(0) as u64, obj.content_type, obj.etag)
            .with_manifest(obj.manifest)
            .with_last_modified(obj.last_modified)
    }
}
