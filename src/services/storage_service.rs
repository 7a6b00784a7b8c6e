//! src/services/storage_service.rs
//!
//! StorageService: a local `RemoteStore` backed by SQLite for metadata and
//! local disk for object payloads. Payloads are sharded beneath
//! `base_path/{container}/{shard}/{shard}/{md5(key)}`. It lets the engine run
//! end-to-end without a network and mirrors the semantics the engine relies
//! on from a Swift cluster: idempotent container creation, MD5 ETags, manifest
//! references stored as object metadata, and marker-ordered listings.

use super::{
    hasher::hash_bytes,
    remote::{
        ListPage, ListParams, ObjectBody, PutRequest, RemoteStore, StoreError, StoreResult,
        compute_common_prefix,
    },
};
use crate::models::{container::Container, entry::RemoteEntry, object::Object};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MAX_LEN: usize = 256;

/// Embedded schema, applied by `run_migrations`.
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Key validation: non-empty, bounded, no traversal or control bytes.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|part| part == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Swift-style container naming: 1–256 bytes, no `/`.
    fn ensure_container_name_safe(&self, name: &str) -> StoreResult<()> {
        let reason = if name.is_empty() || name.len() > CONTAINER_NAME_MAX_LEN {
            Some("must be between 1 and 256 bytes")
        } else if name.contains('/') {
            Some("must not contain `/`")
        } else if name == "." || name == ".." {
            Some("must not be `.` or `..`")
        } else if name.bytes().any(|b| b.is_ascii_control()) {
            Some("must not contain control characters")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(StoreError::InvalidContainerName {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    fn container_root(&self, container: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(container);
        path
    }

    /// Two-level shard identifiers from MD5(container/key).
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Payload path. Keys may themselves contain `/`, so the key is stored
    /// under its MD5 inside the shard to keep `a` and `a/b` from colliding.
    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(container, key);
        let mut path = self.container_root(container);
        path.push(shard_a);
        path.push(shard_b);
        path.push(hash_bytes(key.as_bytes()).as_str());
        path
    }

    async fn fetch_container(&self, name: &str) -> StoreResult<Option<Container>> {
        self.ensure_container_name_safe(name)?;
        let row = sqlx::query_as::<Sqlite, Container>(
            "SELECT id, name, created_at FROM containers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn require_container(&self, name: &str) -> StoreResult<Container> {
        self.fetch_container(name)
            .await?
            .ok_or_else(|| StoreError::ContainerNotFound(name.to_string()))
    }

    async fn fetch_object(&self, container: &Container, key: &str) -> StoreResult<Option<Object>> {
        let row = sqlx::query_as::<_, Object>(
            "SELECT id, container_id, key, content_type, size_bytes, etag, manifest, last_modified
             FROM objects WHERE key = ? AND container_id = ?",
        )
        .bind(key)
        .bind(container.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Write a payload durably: temp file, fsync, rename into place.
    async fn write_payload(&self, file_path: &Path, body: &[u8]) -> StoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to the container root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for StorageService {
    async fn ensure_container(&self, container: &str) -> StoreResult<()> {
        self.ensure_container_name_safe(container)?;
        fs::create_dir_all(self.container_root(container)).await?;
        sqlx::query(
            "INSERT INTO containers (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(container)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> StoreResult<bool> {
        Ok(self.fetch_container(container).await?.is_some())
    }

    async fn head(&self, container: &str, key: &str) -> StoreResult<Option<RemoteEntry>> {
        self.ensure_key_safe(key)?;
        let rec = self.require_container(container).await?;
        Ok(self.fetch_object(&rec, key).await?.map(RemoteEntry::from))
    }

    async fn get(&self, container: &str, key: &str) -> StoreResult<ObjectBody> {
        self.ensure_key_safe(key)?;
        let rec = self.require_container(container).await?;
        let not_found = || StoreError::ObjectNotFound {
            container: container.to_string(),
            key: key.to_string(),
        };
        let object = self.fetch_object(&rec, key).await?.ok_or_else(not_found)?;

        let file = File::open(self.object_path(container, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    not_found()
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok(ObjectBody {
            entry: object.into(),
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn put(&self, container: &str, key: &str, req: PutRequest) -> StoreResult<RemoteEntry> {
        self.ensure_key_safe(key)?;
        let rec = self.require_container(container).await?;

        let file_path = self.object_path(container, key);
        self.write_payload(&file_path, &req.body).await?;

        let etag = hash_bytes(&req.body).to_string();
        let inserted = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, container_id, key, content_type, size_bytes, etag, manifest, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                manifest = excluded.manifest,
                last_modified = excluded.last_modified
            RETURNING id, container_id, key, content_type, size_bytes, etag, manifest, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(rec.id)
        .bind(key)
        .bind(&req.content_type)
        .bind(req.body.len() as i64)
        .bind(&etag)
        .bind(req.manifest.as_deref())
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(obj) => Ok(obj.into()),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StoreError::Sqlx(err))
            }
        }
    }

    async fn delete(&self, container: &str, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let rec = self.require_container(container).await?;
        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND container_id = ?")
            .bind(key)
            .bind(rec.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(container, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.container_root(container))
                .await;
        }
        Ok(())
    }

    /// Ordered listing with prefix filter, marker paging and optional
    /// delimiter folding.
    async fn list(&self, container: &str, params: ListParams) -> StoreResult<ListPage> {
        let rec = self.require_container(container).await?;
        let page_size = params.page_size.clamp(1, 10_000);
        let fetch_limit = page_size + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, container_id, key, content_type, size_bytes, etag, manifest, \
             last_modified FROM objects WHERE container_id = ",
        );
        builder.push_bind(rec.id);
        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            // substr avoids LIKE wildcards inside keys.
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix.to_string());
        }
        if let Some(marker) = &params.marker {
            builder.push(" AND key > ");
            builder.push_bind(marker.clone());
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_marker = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_marker = rows.last().map(|last| last.key.clone());
        }

        let mut entries = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for obj in rows {
            if let Some(delim) = params.delimiter {
                if let Some(prefix) = compute_common_prefix(&obj.key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            entries.push(obj.into());
        }

        Ok(ListPage {
            entries,
            common_prefixes: common_prefixes.into_iter().collect(),
            next_marker,
        })
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// Apply the embedded schema, one statement at a time.
pub async fn run_migrations(db: &SqlitePool) -> StoreResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());
    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service(dir: &Path) -> StorageService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        StorageService::new(Arc::new(pool), dir.join("objects"))
    }

    async fn read_body(svc: &StorageService, container: &str, key: &str) -> Vec<u8> {
        let mut object = svc.get(container, key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = object.body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn ensure_container_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        assert!(!svc.container_exists("box").await.unwrap());
        svc.ensure_container("box").await.unwrap();
        svc.ensure_container("box").await.unwrap();
        assert!(svc.container_exists("box").await.unwrap());
        assert!(matches!(
            svc.ensure_container("a/b").await,
            Err(StoreError::InvalidContainerName { .. })
        ));
    }

    #[tokio::test]
    async fn put_get_overwrite_delete() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        svc.ensure_container("box").await.unwrap();

        let entry = svc
            .put("box", "a", PutRequest::new(Bytes::from_static(b"parent"), "text/plain"))
            .await
            .unwrap();
        assert_eq!(entry.etag, hash_bytes(b"parent").to_string());
        svc.put("box", "a/b", PutRequest::new(Bytes::from_static(b"child"), "text/plain"))
            .await
            .unwrap();
        assert_eq!(read_body(&svc, "box", "a").await, b"parent");
        assert_eq!(read_body(&svc, "box", "a/b").await, b"child");

        let manifest = svc
            .put(
                "box",
                "a",
                PutRequest::new(Bytes::new(), "video/mp4").with_manifest("box_segments/a/"),
            )
            .await
            .unwrap();
        assert_eq!(manifest.size, 0);
        assert_eq!(manifest.manifest.as_deref(), Some("box_segments/a/"));
        let head = svc.head("box", "a").await.unwrap().unwrap();
        assert_eq!(head.content_type, "video/mp4");

        svc.delete("box", "a").await.unwrap();
        assert!(svc.head("box", "a").await.unwrap().is_none());
        assert!(matches!(
            svc.delete("box", "a").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            svc.put("box", "../etc", PutRequest::new(Bytes::new(), "x")).await,
            Err(StoreError::InvalidObjectKey(_))
        ));
    }

    #[tokio::test]
    async fn listing_pages_by_marker_and_folds_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path()).await;
        svc.ensure_container("box").await.unwrap();
        for key in ["x/1", "x/2", "x/sub/3", "x%y", "y"] {
            svc.put("box", key, PutRequest::new(Bytes::from_static(b"."), "text/plain"))
                .await
                .unwrap();
        }

        let first = svc
            .list(
                "box",
                ListParams {
                    prefix: Some("x/".into()),
                    page_size: 2,
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = first.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["x/1", "x/2"]);
        assert_eq!(first.next_marker.as_deref(), Some("x/2"));

        let folded = svc
            .list(
                "box",
                ListParams {
                    prefix: Some("x/".into()),
                    delimiter: Some('/'),
                    page_size: 100,
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = folded.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["x/1", "x/2"]);
        assert_eq!(folded.common_prefixes, ["x/sub/"]);
        assert!(folded.next_marker.is_none());
    }
}
