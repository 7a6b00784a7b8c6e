//! Client-side engine for Swift-compatible object stores.
//!
//! - `services::transfer` moves files larger than one object can hold by
//!   splitting them into segments behind a manifest.
//! - `services::hasher` defines content identity, including the hash of
//!   hashes used for segmented objects.
//! - `services::diff` reconciles a local directory against a remote prefix.
//! - `services::namespace` turns flat delimited keys into a tree.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use errors::{TransferError, TransferResult};
pub use services::{
    diff::DiffEngine,
    namespace::NamespaceTree,
    remote::{RemoteStore, StoreError},
    transfer::TransferEngine,
};
