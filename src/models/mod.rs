//! Core data models shared by the transfer, diff and tree services.
//!
//! Entries are read-only snapshots of one side of a transfer: `RemoteEntry`
//! for an object in a container, `LocalEntry` for a file or directory on disk.
//! They serialize naturally as JSON via `serde` so the CLI can print them.

pub mod comparison;
pub mod container;
pub mod entry;
pub mod object;
pub mod segment;
pub mod tree;

/// Reserved character that simulates path hierarchy inside object keys.
pub const DELIMITER: char = '/';

/// Content type flagging a zero-byte object as a materialized directory.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Content type used when the caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Suffix appended to a container name to get its segments container.
pub const SEGMENTS_CONTAINER_SUFFIX: &str = "_segments";
