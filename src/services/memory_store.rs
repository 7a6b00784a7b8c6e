//! In-memory `RemoteStore`.
//!
//! Intended for tests and embedding. Containers and objects are held behind a
//! `RwLock`; payloads are `Bytes`, so reads are cheap clones. Every `put` and
//! `delete` is counted so callers can assert that an operation did no writes.

use super::{
    hasher::hash_bytes,
    remote::{
        ListPage, ListParams, ObjectBody, PutRequest, RemoteStore, StoreError, StoreResult,
        body_from_bytes, compute_common_prefix,
    },
};
use crate::models::entry::RemoteEntry;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Clone, Debug)]
struct StoredObject {
    entry: RemoteEntry,
    body: Bytes,
}

#[derive(Default)]
pub struct InMemoryStore {
    containers: RwLock<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful `delete` calls so far.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Sorted keys of a container; empty if it does not exist.
    pub fn keys(&self, container: &str) -> Vec<String> {
        let map = self.containers.read().expect("lock poisoned");
        map.get(container)
            .map(|objs| objs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw payload stored at a key.
    pub fn body(&self, container: &str, key: &str) -> Option<Bytes> {
        let map = self.containers.read().expect("lock poisoned");
        map.get(container)?.get(key).map(|o| o.body.clone())
    }

    /// Remove an object without counting it, to simulate outside tampering.
    pub fn remove_raw(&self, container: &str, key: &str) {
        let mut map = self.containers.write().expect("lock poisoned");
        if let Some(objs) = map.get_mut(container) {
            objs.remove(key);
        }
    }

    fn not_found(container: &str, key: &str) -> StoreError {
        StoreError::ObjectNotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn ensure_container(&self, container: &str) -> StoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        map.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> StoreResult<bool> {
        let map = self.containers.read().expect("lock poisoned");
        Ok(map.contains_key(container))
    }

    async fn head(&self, container: &str, key: &str) -> StoreResult<Option<RemoteEntry>> {
        let map = self.containers.read().expect("lock poisoned");
        let objs = map
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        Ok(objs.get(key).map(|o| o.entry.clone()))
    }

    async fn get(&self, container: &str, key: &str) -> StoreResult<ObjectBody> {
        let stored = {
            let map = self.containers.read().expect("lock poisoned");
            let objs = map
                .get(container)
                .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
            objs.get(key)
                .cloned()
                .ok_or_else(|| Self::not_found(container, key))?
        };
        Ok(ObjectBody {
            entry: stored.entry,
            body: body_from_bytes(stored.body),
        })
    }

    async fn put(&self, container: &str, key: &str, req: PutRequest) -> StoreResult<RemoteEntry> {
        if key.is_empty() {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        let entry = RemoteEntry::new(
            key,
            req.body.len() as u64,
            req.content_type,
            hash_bytes(&req.body).to_string(),
        )
        .with_manifest(req.manifest)
        .with_last_modified(Utc::now());

        let mut map = self.containers.write().expect("lock poisoned");
        let objs = map
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        objs.insert(
            key.to_string(),
            StoredObject {
                entry: entry.clone(),
                body: req.body,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    async fn delete(&self, container: &str, key: &str) -> StoreResult<()> {
        let mut map = self.containers.write().expect("lock poisoned");
        let objs = map
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        objs.remove(key)
            .ok_or_else(|| Self::not_found(container, key))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, container: &str, params: ListParams) -> StoreResult<ListPage> {
        let map = self.containers.read().expect("lock poisoned");
        let objs = map
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        let page_size = params.page_size.max(1);
        let prefix = params.prefix.as_deref().unwrap_or("");

        let mut page = ListPage::default();
        let mut prefixes = BTreeSet::new();
        let mut taken = 0;
        let mut last_key: Option<&String> = None;
        let candidates = objs.iter().filter(|(k, _)| {
            k.starts_with(prefix)
                && params
                    .marker
                    .as_deref()
                    .is_none_or(|marker| k.as_str() > marker)
        });
        for (key, obj) in candidates {
            if taken == page_size {
                page.next_marker = last_key.cloned();
                break;
            }
            taken += 1;
            last_key = Some(key);
            if let Some(delim) = params.delimiter {
                if let Some(common) = compute_common_prefix(key, params.prefix.as_deref(), delim) {
                    prefixes.insert(common);
                    continue;
                }
            }
            page.entries.push(obj.entry.clone());
        }
        page.common_prefixes = prefixes.into_iter().collect();
        Ok(page)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote::list_all;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.ensure_container("c").await.unwrap();
        for key in ["a/1", "a/2", "b", "c/d/e"] {
            store
                .put("c", key, PutRequest::new(Bytes::from(key.to_string()), "text/plain"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn put_head_get_delete() {
        let store = seeded().await;
        let head = store.head("c", "b").await.unwrap().unwrap();
        assert_eq!(head.size, 1);
        assert_eq!(head.etag, hash_bytes(b"b").to_string());
        assert!(store.head("c", "missing").await.unwrap().is_none());

        store.delete("c", "b").await.unwrap();
        assert!(store.head("c", "b").await.unwrap().is_none());
        assert!(matches!(
            store.delete("c", "b").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
        assert_eq!(store.put_count(), 4);
        assert_eq!(store.delete_count(), 1);
    }

    #[tokio::test]
    async fn paged_listing_visits_every_key_once() {
        let store = seeded().await;
        let page = store
            .list(
                "c",
                ListParams {
                    page_size: 2,
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.next_marker.as_deref(), Some("a/2"));

        let all = list_all(&store, "c", "").await.unwrap();
        let keys: Vec<_> = all.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a/1", "a/2", "b", "c/d/e"]);
    }

    #[tokio::test]
    async fn delimiter_folds_common_prefixes() {
        let store = seeded().await;
        let page = store
            .list(
                "c",
                ListParams {
                    delimiter: Some('/'),
                    page_size: 100,
                    ..ListParams::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = page.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["b"]);
        assert_eq!(page.common_prefixes, ["a/", "c/"]);
    }

    #[tokio::test]
    async fn missing_container_is_reported() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.head("nope", "k").await,
            Err(StoreError::ContainerNotFound(_))
        ));
        assert!(!store.container_exists("nope").await.unwrap());
    }
}
