//! Reconcile a local directory against a remote key prefix.
//!
//! Both sides are mapped onto keys relative to their roots, so
//! `local_root/sub/file` and `remote_root/sub/file` correspond. Each key lands
//! in exactly one of: local only, remote only, differing, or identical (which
//! is only counted). Content identity is `(hash, size)`; names and timestamps
//! are never compared.

use super::{
    hasher::ContentHash,
    local_fs::{self, LocalListing},
    remote::{RemoteStore, list_all},
    transfer::TransferEngine,
};
use crate::{
    errors::TransferResult,
    models::{
        DELIMITER,
        comparison::{ComparisonItem, ComparisonResult, DifferingPair, LocalItem, RemoteItem},
        entry::{LocalEntry, RemoteEntry, join_key},
    },
};
use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    path::Path,
};
use tracing::{debug, info, warn};

pub struct DiffEngine<'a, S> {
    engine: &'a TransferEngine<S>,
}

/// Remote entries keyed by relative path. A key that maps onto a path already
/// taken (`sub` and `sub/`) is kept in `shadowed` and reported on its own.
#[derive(Default)]
struct RemoteSide {
    remotes: BTreeMap<String, RemoteEntry>,
    shadowed: Vec<(String, RemoteEntry)>,
}

/// The two sides found for one relative key.
#[derive(Default)]
struct Sides {
    local: Option<LocalEntry>,
    remote: Option<RemoteEntry>,
}

impl<'a, S: RemoteStore> DiffEngine<'a, S> {
    pub fn new(engine: &'a TransferEngine<S>) -> Self {
        Self { engine }
    }

    /// Classify every entry below `local_root` and below `remote_root` in
    /// `container`.
    ///
    /// A missing local root or container is an empty side, not an error.
    /// Hashes are computed once here: for every key present on both sides
    /// and for remote-only objects (whose hash needs no download). Local-only
    /// files are not read.
    pub async fn reconcile(
        &self,
        local_root: &Path,
        container: &str,
        remote_root: &str,
    ) -> TransferResult<ComparisonResult> {
        let remote_root = remote_root.trim_matches(DELIMITER);
        let locals = self.local_side(local_root).await?;
        let RemoteSide { remotes, shadowed } = self.remote_side(container, remote_root).await?;
        info!(
            "reconciling {} ({} entries) against `{}/{}` ({} entries)",
            local_root.display(),
            locals.len(),
            container,
            remote_root,
            remotes.len() + shadowed.len()
        );

        // Directories that exist remotely only as a path prefix.
        let remote_dirs: BTreeSet<String> = remotes
            .keys()
            .chain(shadowed.iter().map(|(rel, _)| rel))
            .flat_map(|rel| ancestors(rel))
            .collect();

        let mut sides: BTreeMap<String, Sides> = BTreeMap::new();
        for listing in locals {
            sides.entry(listing.rel_key).or_default().local = Some(listing.entry);
        }
        for (rel, entry) in remotes {
            sides.entry(rel).or_default().remote = Some(entry);
        }

        let mut result = ComparisonResult {
            container: container.to_string(),
            ..ComparisonResult::default()
        };
        for (rel, side) in sides {
            match (side.local, side.remote) {
                (Some(local), None) if local.is_directory && remote_dirs.contains(&rel) => {
                    result.identical += 1;
                }
                (Some(local), None) => {
                    result
                        .local_only
                        .push(self.local_item(local, remote_root, &rel, None));
                }
                (None, Some(remote)) => {
                    let item = self.remote_item(remote, local_root, &rel).await?;
                    result.remote_only.push(item);
                }
                (Some(local), Some(remote)) => {
                    self.classify_pair(&mut result, local, remote, local_root, remote_root, &rel)
                        .await?;
                }
                (None, None) => {}
            }
        }
        for (rel, entry) in shadowed {
            let item = self.remote_item(entry, local_root, &rel).await?;
            result.remote_only.push(item);
        }

        info!(
            "reconciled: {} local only, {} remote only, {} differing, {} identical",
            result.local_only.len(),
            result.remote_only.len(),
            result.differing.len(),
            result.identical
        );
        Ok(result)
    }

    async fn classify_pair(
        &self,
        result: &mut ComparisonResult,
        local: LocalEntry,
        remote: RemoteEntry,
        local_root: &Path,
        remote_root: &str,
        rel: &str,
    ) -> TransferResult<()> {
        if local.is_directory && remote.is_directory_marker {
            result.identical += 1;
            return Ok(());
        }

        let (remote_item, segmented) = self.remote_item_with_shape(remote, local_root, rel).await?;
        if local.is_directory || remote_item.is_directory() {
            // A directory on one side and a file on the other never match,
            // even when the file is empty.
            debug!("`{}` is a directory on one side only", rel);
            let local_item = self.local_item(local, remote_root, rel, None);
            result.differing.push(DifferingPair {
                local: local_item,
                remote: remote_item,
            });
            return Ok(());
        }

        let local_hash = match self.engine.local_hash(&local.path, segmented).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!("could not hash {}: {}", local.path.display(), err);
                None
            }
        };
        let local_item = self.local_item(local, remote_root, rel, local_hash);

        if local_item.same_content(&remote_item) {
            result.identical += 1;
        } else {
            result.differing.push(DifferingPair {
                local: local_item,
                remote: remote_item,
            });
        }
        Ok(())
    }

    fn local_item(
        &self,
        entry: LocalEntry,
        remote_root: &str,
        rel: &str,
        hash: Option<ContentHash>,
    ) -> ComparisonItem {
        ComparisonItem::Local(LocalItem {
            entry,
            remote_full_name: join_key(remote_root, rel),
            hash,
        })
    }

    async fn remote_item(
        &self,
        entry: RemoteEntry,
        local_root: &Path,
        rel: &str,
    ) -> TransferResult<ComparisonItem> {
        Ok(self.remote_item_with_shape(entry, local_root, rel).await?.0)
    }

    /// The remote item plus whether it is segmented, so the local side can be
    /// hashed in the same shape.
    async fn remote_item_with_shape(
        &self,
        entry: RemoteEntry,
        local_root: &Path,
        rel: &str,
    ) -> TransferResult<(ComparisonItem, bool)> {
        let identity = self.engine.remote_identity(&entry).await?;
        let item = ComparisonItem::Remote(RemoteItem {
            local_path: local_fs::local_path_for(local_root, rel),
            size: identity.size,
            hash: Some(identity.hash),
            entry,
        });
        Ok((item, identity.segments.is_some()))
    }

    async fn local_side(&self, local_root: &Path) -> TransferResult<Vec<LocalListing>> {
        let root = LocalEntry::stat(local_root).await?;
        if !root.exists || !root.is_directory {
            debug!("local root {} missing, treating as empty", local_root.display());
            return Ok(Vec::new());
        }
        Ok(local_fs::enumerate(local_root).await?)
    }

    /// Remote entries keyed by their path below `remote_root`. The root's own
    /// directory marker is not part of the comparison.
    async fn remote_side(
        &self,
        container: &str,
        remote_root: &str,
    ) -> TransferResult<RemoteSide> {
        let store = self.engine.store();
        if !store.container_exists(container).await? {
            debug!("container `{}` missing, treating as empty", container);
            return Ok(RemoteSide::default());
        }
        let prefix = if remote_root.is_empty() {
            String::new()
        } else {
            format!("{remote_root}{DELIMITER}")
        };
        let mut side = RemoteSide::default();
        for entry in list_all(store, container, &prefix).await? {
            let rel = entry.key[prefix.len()..].trim_matches(DELIMITER).to_string();
            if rel.is_empty() {
                continue;
            }
            match side.remotes.entry(rel) {
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
                Entry::Occupied(slot) => {
                    debug!("`{}` shares the path `{}` with another key", entry.key, slot.key());
                    side.shadowed.push((slot.key().clone(), entry));
                }
            }
        }
        Ok(side)
    }
}

/// Every proper ancestor path of a relative key: `a/b/c` yields `a`, `a/b`.
fn ancestors(rel: &str) -> impl Iterator<Item = String> + '_ {
    rel.match_indices(DELIMITER)
        .map(move |(pos, _)| rel[..pos].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{memory_store::InMemoryStore, progress::NoProgress};

    const SEG: u64 = 800;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    async fn upload(engine: &mut TransferEngine<InMemoryStore>, rel: &str, data: &[u8]) {
        let scratch = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(scratch.path(), data).unwrap();
        engine
            .upload_file("box", &format!("backup/{rel}"), scratch.path(), None, true, &NoProgress)
            .await
            .unwrap();
    }

    fn rel_names(items: &[ComparisonItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| i.remote_full_name().trim_start_matches("backup/").to_string())
            .collect()
    }

    #[tokio::test]
    async fn buckets_partition_the_key_union() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup");
        let big = vec![42u8; 2000];
        write(&local, "same.txt", b"same");
        write(&local, "changed.txt", b"local version");
        write(&local, "only-local.txt", b"mine");
        write(&local, "sub/big.bin", &big);

        let mut engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        upload(&mut engine, "same.txt", b"same").await;
        upload(&mut engine, "changed.txt", b"remote version").await;
        upload(&mut engine, "only-remote.txt", b"theirs").await;
        upload(&mut engine, "sub/big.bin", &big).await;

        let result = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup")
            .await
            .unwrap();

        assert_eq!(rel_names(&result.local_only), ["only-local.txt"]);
        assert_eq!(rel_names(&result.remote_only), ["only-remote.txt"]);
        assert_eq!(result.differing.len(), 1);
        assert_eq!(result.differing[0].local.name(), "changed.txt");
        // same.txt, sub (virtual remotely) and sub/big.bin
        assert_eq!(result.identical, 3);

        let mut seen = BTreeSet::new();
        let buckets = result
            .local_only
            .iter()
            .chain(&result.remote_only)
            .map(|i| i.remote_full_name().to_string())
            .chain(result.differing.iter().map(|p| p.local.remote_full_name().to_string()));
        for key in buckets {
            assert!(seen.insert(key), "key in two buckets");
        }
        assert_eq!(seen.len() + result.identical, 6);
    }

    #[tokio::test]
    async fn differing_items_carry_both_identities() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup");
        write(&local, "a.txt", b"left");

        let mut engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        upload(&mut engine, "a.txt", b"right!").await;

        let result = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup/")
            .await
            .unwrap();
        let pair = &result.differing[0];
        assert_eq!(pair.local.size(), 4);
        assert_eq!(pair.remote.size(), 6);
        assert!(pair.local.hash().is_some());
        assert!(pair.remote.hash().is_some());
        assert_eq!(pair.remote.local_path(), local.join("a.txt"));
        assert_eq!(pair.local.remote_full_name(), "backup/a.txt");
    }

    #[tokio::test]
    async fn resolving_items_brings_sides_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup");
        write(&local, "push.txt", b"push me");
        write(&local, "docs/readme.md", b"# hi");

        let mut engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        upload(&mut engine, "pull.bin", &vec![1u8; 1500]).await;

        let result = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup")
            .await
            .unwrap();
        for item in &result.local_only {
            engine
                .upload_item("box", item, false, &NoProgress)
                .await
                .unwrap();
        }
        for item in &result.remote_only {
            engine.download_item("box", item, &NoProgress).await.unwrap();
        }

        let after = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup")
            .await
            .unwrap();
        assert!(after.is_in_sync(), "{after:?}");
        assert_eq!(std::fs::read(local.join("pull.bin")).unwrap(), vec![1u8; 1500]);
    }

    #[tokio::test]
    async fn directory_against_file_is_never_identical() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup");
        std::fs::create_dir_all(local.join("thing")).unwrap();
        write(&local, "marker", b"");

        let mut engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        upload(&mut engine, "thing", b"").await;
        engine
            .create_directory_marker("box", "backup/marker")
            .await
            .unwrap();

        let result = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup")
            .await
            .unwrap();
        assert_eq!(result.differing.len(), 2);
        assert_eq!(result.identical, 0);
        assert!(result.differing.iter().all(|p| p.local.is_directory() != p.remote.is_directory()));
    }

    #[tokio::test]
    async fn missing_sides_are_data_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        let result = DiffEngine::new(&engine)
            .reconcile(&dir.path().join("nope"), "absent", "x")
            .await
            .unwrap();
        assert!(result.is_in_sync());
        assert_eq!(result.identical, 0);
    }

    #[tokio::test]
    async fn keys_differing_only_by_trailing_delimiter_both_appear() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("backup");
        std::fs::create_dir_all(local.join("sub")).unwrap();

        let mut engine = TransferEngine::new(InMemoryStore::new(), SEG).unwrap();
        upload(&mut engine, "sub", b"file named like a directory").await;
        engine
            .create_directory_marker("box", "backup/sub/")
            .await
            .unwrap();

        let result = DiffEngine::new(&engine)
            .reconcile(&local, "box", "backup")
            .await
            .unwrap();
        assert_eq!(result.identical, 0);
        assert_eq!(result.differing.len(), 1);
        assert_eq!(result.differing[0].remote.remote_full_name(), "backup/sub");
        let remote_only: Vec<&str> = result.remote_only.iter().map(|i| i.remote_full_name()).collect();
        assert_eq!(remote_only, ["backup/sub/"]);
    }

    #[test]
    fn ancestors_of_nested_key() {
        let found: Vec<String> = ancestors("a/b/c").collect();
        assert_eq!(found, ["a", "a/b"]);
        assert_eq!(ancestors("top").count(), 0);
    }
}
