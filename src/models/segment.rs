//! Segment and manifest naming for large objects.

use super::SEGMENTS_CONTAINER_SUFFIX;
use crate::services::hasher::ContentHash;
use serde::{Deserialize, Serialize};

/// Width of the zero-padded index in a segment key.
pub const SEGMENT_INDEX_WIDTH: usize = 8;

/// Highest index that still fits in `SEGMENT_INDEX_WIDTH` digits.
pub const MAX_SEGMENT_COUNT: u32 = 99_999_999;

/// One fixed-size slice of a large object, stored as its own object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Position in the object (1-based).
    pub index: u32,

    /// Key within the segments container.
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// MD5 of this segment's bytes.
    pub hash: ContentHash,
}

impl SegmentDescriptor {
    pub fn new(object_key: &str, index: u32, size: u64, hash: ContentHash) -> Self {
        Self {
            index,
            key: segment_key(object_key, index),
            size,
            hash,
        }
    }
}

/// Name of the sibling container holding segments for `container`.
pub fn segments_container(container: &str) -> String {
    format!("{container}{SEGMENTS_CONTAINER_SUFFIX}")
}

/// `"{object_key}/{index:08}"`
pub fn segment_key(object_key: &str, index: u32) -> String {
    format!("{object_key}/{index:0width$}", width = SEGMENT_INDEX_WIDTH)
}

/// Prefix under which all segments of `object_key` are listed.
pub fn segment_prefix(object_key: &str) -> String {
    format!("{object_key}/")
}

/// Parse the index out of a key listed under `segment_prefix(object_key)`.
///
/// Anything that is not exactly eight ASCII digits directly under the prefix
/// is not a segment of this object (for instance a segment of a longer key
/// that happens to share the prefix).
pub fn parse_segment_index(object_key: &str, listed_key: &str) -> Option<u32> {
    let rest = listed_key.strip_prefix(&segment_prefix(object_key))?;
    if rest.len() != SEGMENT_INDEX_WIDTH || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Reference stored with a manifest object, pointing at its segments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestRef {
    pub container: String,
    pub prefix: String,
}

impl ManifestRef {
    /// Manifest for `object_key` uploaded into `container`.
    pub fn for_object(container: &str, object_key: &str) -> Self {
        Self {
            container: segments_container(container),
            prefix: segment_prefix(object_key),
        }
    }

    /// Parse the `"{container}/{prefix}"` form stored on the object.
    pub fn parse(raw: &str) -> Option<Self> {
        let (container, prefix) = raw.split_once('/')?;
        if container.is_empty() || prefix.is_empty() {
            return None;
        }
        Some(Self {
            container: container.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// The object key the segments belong to.
    pub fn object_key(&self) -> &str {
        self.prefix.strip_suffix('/').unwrap_or(&self.prefix)
    }

    pub fn to_header_value(&self) -> String {
        format!("{}/{}", self.container, self.prefix)
    }
}

/// `ceil(total_size / segment_size)`, or `None` when the segments could not
/// all be named (zero segment size, or more than `MAX_SEGMENT_COUNT`).
pub fn segment_count(total_size: u64, segment_size: u64) -> Option<u32> {
    if segment_size == 0 {
        return None;
    }
    u32::try_from(total_size.div_ceil(segment_size))
        .ok()
        .filter(|&count| count <= MAX_SEGMENT_COUNT)
}
