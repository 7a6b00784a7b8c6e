//! Content hashing: the equality oracle shared by transfers and diffs.
//!
//! Whole objects hash to the MD5 of their bytes. Segmented objects hash to the
//! MD5 of the concatenated hex digests of their segments, in index order. Two
//! copies of the same bytes split at different segment sizes therefore do not
//! compare equal; both sides must agree on the segment size.

use md5::Context;
use serde::{Deserialize, Serialize};
use std::{fmt, io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

/// Read buffer used when streaming files through the digest.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex MD5 digest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Normalize a store-reported ETag (quotes stripped, lowercased).
    pub fn parse(etag: &str) -> Self {
        Self(etag.trim().trim_matches('"').to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(digest: md5::Digest) -> Self {
        Self(format!("{:x}", digest))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of hashing a file the way a segmented upload would.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentedHash {
    pub segments: Vec<ContentHash>,
    pub aggregate: ContentHash,
}

/// MD5 over an in-memory byte slice.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash::from_digest(md5::compute(bytes))
}

/// Hash of hashes over an ordered list of segment digests.
pub fn hash_segmented<'a, I>(ordered: I) -> ContentHash
where
    I: IntoIterator<Item = &'a ContentHash>,
{
    let mut digest = Context::new();
    for hash in ordered {
        digest.consume(hash.as_str().as_bytes());
    }
    ContentHash::from_digest(digest.compute())
}

/// Stream a whole file through MD5.
pub async fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        digest.consume(&buf[..read]);
    }
    Ok(ContentHash::from_digest(digest.compute()))
}

/// Hash each `segment_size` window of a file, then the hash of hashes.
///
/// An empty file yields no segments; callers only use this shape for files
/// larger than one segment.
pub async fn hash_file_segmented(path: &Path, segment_size: u64) -> io::Result<SegmentedHash> {
    if segment_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "segment size must be positive",
        ));
    }
    let mut file = File::open(path).await?;
    let mut segments = Vec::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut digest = Context::new();
    let mut in_window: u64 = 0;
    loop {
        let want = (segment_size - in_window).min(buf.len() as u64) as usize;
        let read = file.read(&mut buf[..want]).await?;
        if read == 0 {
            break;
        }
        digest.consume(&buf[..read]);
        in_window += read as u64;
        if in_window == segment_size {
            let full = std::mem::replace(&mut digest, Context::new());
            segments.push(ContentHash::from_digest(full.compute()));
            in_window = 0;
        }
    }
    if in_window > 0 {
        segments.push(ContentHash::from_digest(digest.compute()));
    }
    let aggregate = hash_segmented(&segments);
    Ok(SegmentedHash {
        segments,
        aggregate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn whole_hash_matches_known_md5() {
        assert_eq!(hash_bytes(b"").as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            hash_bytes(b"hello world").as_str(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn parse_normalizes_quoted_etags() {
        assert_eq!(
            ContentHash::parse("\"5EB63BBBE01EEED093CB22BB8F5ACDC3\""),
            hash_bytes(b"hello world")
        );
    }

    #[test]
    fn hash_of_hashes_digests_hex_strings() {
        let a = hash_bytes(b"abc");
        let b = hash_bytes(b"def");
        let expected = hash_bytes(format!("{a}{b}").as_bytes());
        assert_eq!(hash_segmented([&a, &b]), expected);
        assert_ne!(hash_segmented([&a, &b]), hash_bytes(b"abcdef"));
    }

    #[tokio::test]
    async fn file_hashes_agree_with_in_memory_hashes() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        assert_eq!(hash_file(tmp.path()).await.unwrap(), hash_bytes(&data));

        let seg = hash_file_segmented(tmp.path(), 1000).await.unwrap();
        let expected: Vec<ContentHash> = data.chunks(1000).map(hash_bytes).collect();
        assert_eq!(seg.segments, expected);
        assert_eq!(seg.aggregate, hash_segmented(&expected));
    }

    #[tokio::test]
    async fn segment_size_changes_aggregate() {
        let data = vec![7u8; 4000];
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        let a = hash_file_segmented(tmp.path(), 1000).await.unwrap();
        let b = hash_file_segmented(tmp.path(), 2000).await.unwrap();
        assert_ne!(a.aggregate, b.aggregate);
    }
}
