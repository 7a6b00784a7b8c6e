//! Snapshots of a single object or local path.

use super::{DELIMITER, DIRECTORY_CONTENT_TYPE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A remote object as reported by the store.
///
/// `etag` is the raw value the store returned; for a manifest it is the hash
/// of the (usually empty) manifest body, not the aggregate of its segments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Object key within its container.
    pub key: String,

    /// Whether the object was present when the snapshot was taken.
    pub exists: bool,

    /// Payload size in bytes as stored at `key`.
    pub size: u64,

    /// Content type (MIME type).
    pub content_type: String,

    /// MD5 of the stored payload, lowercase hex.
    pub etag: String,

    /// Set when `content_type` is the directory marker type.
    pub is_directory_marker: bool,

    /// Manifest reference (`"{segments_container}/{prefix}"`) if this object
    /// stands for a segmented upload.
    pub manifest: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Build an entry for an existing object, deriving the marker flag.
    pub fn new(
        key: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
        etag: impl Into<String>,
    ) -> Self {
        let content_type = content_type.into();
        Self {
            key: key.into(),
            exists: true,
            size,
            is_directory_marker: content_type == DIRECTORY_CONTENT_TYPE,
            content_type,
            etag: etag.into(),
            manifest: None,
            last_modified: None,
        }
    }

    /// Placeholder for a key that is not present in the container.
    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            exists: false,
            size: 0,
            content_type: String::new(),
            etag: String::new(),
            is_directory_marker: false,
            manifest: None,
            last_modified: None,
        }
    }

    pub fn with_manifest(mut self, manifest: Option<String>) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Last delimiter-separated segment of the key.
    pub fn name(&self) -> &str {
        last_segment(&self.key)
    }
}

/// A file or directory on the local filesystem.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,
    pub is_directory: bool,
}

impl LocalEntry {
    /// Snapshot `path` from the filesystem. A missing path yields
    /// `exists = false` rather than an error.
    pub async fn stat(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Self {
                exists: true,
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_directory: meta.is_dir(),
                path,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path,
                exists: false,
                size: 0,
                is_directory: false,
            }),
            Err(err) => Err(err),
        }
    }

    /// File or directory name, lossily converted.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Strip trailing delimiters and return the last key segment.
pub fn last_segment(key: &str) -> &str {
    let trimmed = key.trim_end_matches(DELIMITER);
    trimmed
        .rsplit(DELIMITER)
        .next()
        .unwrap_or(trimmed)
}

/// Join a key prefix and a relative key with exactly one delimiter between.
pub fn join_key(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_end_matches(DELIMITER);
    let rel = rel.trim_start_matches(DELIMITER);
    match (prefix.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}{DELIMITER}{rel}"),
    }
}
