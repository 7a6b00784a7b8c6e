//! The object-store collaborator consumed by the engine.
//!
//! Anything that can `head`, `get`, `put`, `delete` and `list` objects inside
//! named containers can sit behind this trait: an HTTP Swift client, the
//! SQLite backend in `storage_service`, or the in-memory store used in tests.

use crate::models::entry::RemoteEntry;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::io;
use thiserror::Error;

/// Default number of keys requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("object `{key}` not found in container `{container}`")]
    ObjectNotFound { container: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Streamed object payload.
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Wrap an in-memory payload as a single-chunk body.
pub fn body_from_bytes(bytes: Bytes) -> BodyStream {
    futures::stream::once(async move { Ok(bytes) }).boxed()
}

/// Object metadata plus its streamed body.
pub struct ObjectBody {
    pub entry: RemoteEntry,
    pub body: BodyStream,
}

/// What to store at a key.
#[derive(Clone, Debug)]
pub struct PutRequest {
    pub body: Bytes,
    pub content_type: String,
    /// Manifest reference in `"{container}/{prefix}"` form.
    pub manifest: Option<String>,
}

impl PutRequest {
    pub fn new(body: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            body,
            content_type: content_type.into(),
            manifest: None,
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub delimiter: Option<char>,
    /// Only keys strictly greater than the marker are returned.
    pub marker: Option<String>,
    pub page_size: usize,
}

impl ListParams {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            page_size: DEFAULT_PAGE_SIZE,
            ..Self::default()
        }
    }
}

/// One ordered page of a listing.
#[derive(Debug, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Folded key prefixes (only when a delimiter was requested).
    pub common_prefixes: Vec<String>,
    /// Marker for the next page, `None` when the listing is complete.
    pub next_marker: Option<String>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create the container if it does not exist yet. Idempotent.
    async fn ensure_container(&self, container: &str) -> StoreResult<()>;

    async fn container_exists(&self, container: &str) -> StoreResult<bool>;

    /// Metadata for `key`, or `None` when absent.
    async fn head(&self, container: &str, key: &str) -> StoreResult<Option<RemoteEntry>>;

    async fn get(&self, container: &str, key: &str) -> StoreResult<ObjectBody>;

    /// Store (or overwrite) `key`, returning the resulting entry.
    async fn put(&self, container: &str, key: &str, req: PutRequest) -> StoreResult<RemoteEntry>;

    async fn delete(&self, container: &str, key: &str) -> StoreResult<()>;

    async fn list(&self, container: &str, params: ListParams) -> StoreResult<ListPage>;

    fn name(&self) -> &'static str;
}

/// Drain every page of a listing into one ordered vector of entries.
pub async fn list_all<S>(store: &S, container: &str, prefix: &str) -> StoreResult<Vec<RemoteEntry>>
where
    S: RemoteStore + ?Sized,
{
    let mut entries = Vec::new();
    let mut marker = None;
    loop {
        let page = store
            .list(
                container,
                ListParams {
                    prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                    delimiter: None,
                    marker: marker.take(),
                    page_size: DEFAULT_PAGE_SIZE,
                },
            )
            .await?;
        entries.extend(page.entries);
        match page.next_marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }
    Ok(entries)
}

/// Fold a key into its delimiter-level common prefix, S3/Swift style.
///
/// Returns `Some(prefix)` if the key lies below the next delimiter after the
/// requested prefix, otherwise `None`.
pub fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: char,
) -> Option<String> {
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len_utf8()]);
    Some(combined)
}
