//! Local filesystem side of a transfer: enumeration and key mapping.

use crate::models::{DELIMITER, entry::LocalEntry};
use std::{
    io,
    path::{Component, Path, PathBuf},
};
use tracing::debug;
use walkdir::WalkDir;

/// A local entry together with its delimiter-joined path relative to the
/// enumeration root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalListing {
    pub rel_key: String,
    pub entry: LocalEntry,
}

/// Convert a relative path into an object key fragment.
pub fn rel_key(rel: &Path) -> String {
    let mut key = String::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            if !key.is_empty() {
                key.push(DELIMITER);
            }
            key.push_str(&part.to_string_lossy());
        }
    }
    key
}

/// Map a relative object key back onto a local path below `root`.
pub fn local_path_for(root: &Path, rel: &str) -> PathBuf {
    rel.split(DELIMITER)
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Recursively list everything below `root` (the root itself excluded),
/// sorted by relative key. Symlinks are not followed.
pub async fn enumerate(root: &Path) -> io::Result<Vec<LocalListing>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || enumerate_blocking(&root))
        .await
        .map_err(io::Error::other)?
}

fn enumerate_blocking(root: &Path) -> io::Result<Vec<LocalListing>> {
    let mut listings = Vec::new();
    for item in WalkDir::new(root).min_depth(1).follow_links(false) {
        let item = item.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop while walking"))
        })?;
        let file_type = item.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            debug!("skipping special file {}", item.path().display());
            continue;
        }
        let rel = item
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;
        let size = if file_type.is_dir() {
            0
        } else {
            item.metadata().map_err(io::Error::other)?.len()
        };
        listings.push(LocalListing {
            rel_key: rel_key(rel),
            entry: LocalEntry {
                path: item.path().to_path_buf(),
                exists: true,
                size,
                is_directory: file_type.is_dir(),
            },
        });
    }
    listings.sort_by(|a, b| a.rel_key.cmp(&b.rel_key));
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enumerates_files_and_directories_with_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"top").unwrap();
        std::fs::write(dir.path().join("sub/deeper/leaf.bin"), b"leafy").unwrap();

        let listed = enumerate(dir.path()).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|l| l.rel_key.as_str()).collect();
        assert_eq!(keys, ["sub", "sub/deeper", "sub/deeper/leaf.bin", "top.txt"]);

        let leaf = &listed[2].entry;
        assert!(!leaf.is_directory);
        assert_eq!(leaf.size, 5);
        assert!(listed[0].entry.is_directory);
    }

    #[test]
    fn local_paths_ignore_traversal_segments() {
        let root = Path::new("/tmp/root");
        assert_eq!(local_path_for(root, "a/b"), root.join("a").join("b"));
        assert_eq!(local_path_for(root, "../a//b/"), root.join("a").join("b"));
    }
}
