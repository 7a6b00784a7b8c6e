//! Items produced by reconciling a local tree against a remote prefix.
//!
//! Both variants carry the full correspondence (`local_path` and
//! `remote_full_name`) so a resolution can upload, download or delete the item
//! without walking either tree again.

use super::entry::{LocalEntry, RemoteEntry};
use crate::services::hasher::ContentHash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocalItem {
    pub entry: LocalEntry,
    /// Key the item has, or would have, under the remote comparison root.
    pub remote_full_name: String,
    pub hash: Option<ContentHash>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteItem {
    pub entry: RemoteEntry,
    /// Path the item has, or would have, under the local comparison root.
    pub local_path: PathBuf,
    /// Logical size; the sum of segment sizes for a segmented object.
    pub size: u64,
    pub hash: Option<ContentHash>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "side", rename_all = "lowercase")]
pub enum ComparisonItem {
    Local(LocalItem),
    Remote(RemoteItem),
}

impl ComparisonItem {
    pub fn name(&self) -> String {
        match self {
            Self::Local(item) => item.entry.name(),
            Self::Remote(item) => item.entry.name().to_string(),
        }
    }

    pub fn remote_full_name(&self) -> &str {
        match self {
            Self::Local(item) => &item.remote_full_name,
            Self::Remote(item) => &item.entry.key,
        }
    }

    pub fn local_path(&self) -> &Path {
        match self {
            Self::Local(item) => &item.entry.path,
            Self::Remote(item) => &item.local_path,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Local(item) => item.entry.size,
            Self::Remote(item) => item.size,
        }
    }

    /// Hash computed during reconciliation. Remote items always carry one
    /// (it comes from ETags, never a download). Local items are hashed only
    /// when a remote counterpart exists; local-only files are left unread
    /// and report `None`, as do directories.
    pub fn hash(&self) -> Option<&ContentHash> {
        match self {
            Self::Local(item) => item.hash.as_ref(),
            Self::Remote(item) => item.hash.as_ref(),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Self::Local(item) => item.entry.exists,
            Self::Remote(item) => item.entry.exists,
        }
    }

    pub fn is_directory(&self) -> bool {
        match self {
            Self::Local(item) => item.entry.is_directory,
            Self::Remote(item) => item.entry.is_directory_marker,
        }
    }

    /// Content identity: equal iff both hashes are known and `(hash, size)`
    /// match. Keys and paths play no part.
    pub fn same_content(&self, other: &ComparisonItem) -> bool {
        match (self.hash(), other.hash()) {
            (Some(a), Some(b)) => a == b && self.size() == other.size(),
            _ => false,
        }
    }
}

/// Both sides of a key whose contents differ.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DifferingPair {
    pub local: ComparisonItem,
    pub remote: ComparisonItem,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ComparisonResult {
    pub container: String,
    pub local_only: Vec<ComparisonItem>,
    pub remote_only: Vec<ComparisonItem>,
    pub differing: Vec<DifferingPair>,
    /// Number of keys found identical and left out of every bucket.
    pub identical: usize,
}

impl ComparisonResult {
    /// `true` when nothing needs to be done.
    pub fn is_in_sync(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty() && self.differing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::hasher::hash_bytes;

    fn local(size: u64, hash: Option<ContentHash>) -> ComparisonItem {
        ComparisonItem::Local(LocalItem {
            entry: LocalEntry {
                path: PathBuf::from("/data/a.txt"),
                exists: true,
                size,
                is_directory: false,
            },
            remote_full_name: "backup/a.txt".into(),
            hash,
        })
    }

    fn remote(key: &str, size: u64, hash: Option<ContentHash>) -> ComparisonItem {
        ComparisonItem::Remote(RemoteItem {
            entry: RemoteEntry::new(key, size, "text/plain", "etag"),
            local_path: PathBuf::from("/elsewhere/b.txt"),
            size,
            hash,
        })
    }

    #[test]
    fn identity_ignores_names() {
        let h = hash_bytes(b"abc");
        assert!(local(3, Some(h.clone())).same_content(&remote("other/name", 3, Some(h.clone()))));
        assert!(!local(3, Some(h.clone())).same_content(&remote("backup/a.txt", 4, Some(h))));
        assert!(!local(3, None).same_content(&remote("backup/a.txt", 3, None)));
    }

    #[test]
    fn capability_surface_dispatches_by_side() {
        let item = remote("backup/sub/b.txt", 9, None);
        assert_eq!(item.name(), "b.txt");
        assert_eq!(item.remote_full_name(), "backup/sub/b.txt");
        assert_eq!(item.size(), 9);
        assert!(item.exists());

        let item = local(3, None);
        assert_eq!(item.name(), "a.txt");
        assert_eq!(item.remote_full_name(), "backup/a.txt");
    }
}
