//! Errors raised by the transfer engine.
//!
//! Diff classification never produces these: missing files, missing objects
//! and hash mismatches are reported as data. Only moving bytes can fail.

use crate::services::remote::StoreError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A segment buffer could not be allocated.
    #[error("out of memory buffering {bytes} bytes for `{key}`")]
    OutOfMemory { key: String, bytes: u64 },
    /// The manifest points at a segment sequence with a hole in it.
    #[error("object `{key}` is missing segment {index}")]
    MissingSegment { key: String, index: u32 },
    #[error("manifest of `{key}` is malformed: `{manifest}`")]
    InvalidManifest { key: String, manifest: String },
    #[error("local path `{0}` does not exist")]
    LocalNotFound(String),
    #[error("`{0}` is a directory")]
    IsDirectory(String),
    #[error("segment size must be positive")]
    InvalidSegmentSize,
    /// The object would need more segments than an 8-digit index can name.
    #[error("{size} bytes in {segment_size}-byte segments exceeds the segment limit")]
    TooManySegments { size: u64, segment_size: u64 },
}

impl TransferError {
    /// Errors after which a batch must stop instead of moving on to the
    /// next object.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
