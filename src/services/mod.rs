//! Engine services: hashing, transfers, reconciliation and tree projection,
//! plus the store backends they run against.

pub mod diff;
pub mod hasher;
pub mod local_fs;
pub mod memory_store;
pub mod namespace;
pub mod progress;
pub mod remote;
pub mod storage_service;
pub mod transfer;
