//! Progress and error reporting channels.
//!
//! Both sinks are called synchronously on the transferring task. They must not
//! block; a slow sink stalls the transfer.

use crate::errors::TransferError;
use std::sync::Mutex;
use tracing::warn;

pub trait ProgressSink: Send + Sync {
    /// `overall_*` describes the whole batch, `item_*` the current object.
    /// Fractions are in `0.0..=1.0`.
    fn on_progress(&self, overall: f64, overall_message: &str, item: f64, item_message: &str);
}

pub trait ErrorSink: Send + Sync {
    fn on_error(&self, key: &str, err: &TransferError);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _: f64, _: &str, _: f64, _: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str, f64, &str) + Send + Sync,
{
    fn on_progress(&self, overall: f64, overall_message: &str, item: f64, item_message: &str) {
        self(overall, overall_message, item, item_message)
    }
}

/// Logs every reported error and keeps it for a summary.
#[derive(Default)]
pub struct CollectErrors {
    errors: Mutex<Vec<(String, String)>>,
}

impl CollectErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, message)` pairs in report order.
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.errors.lock().expect("lock poisoned"))
    }
}

impl ErrorSink for CollectErrors {
    fn on_error(&self, key: &str, err: &TransferError) {
        warn!("transfer of `{}` failed: {}", key, err);
        self.errors
            .lock()
            .expect("lock poisoned")
            .push((key.to_string(), err.to_string()));
    }
}

/// Records the fractions it sees, for assertions.
#[derive(Default)]
pub struct RecordProgress {
    pub items: Mutex<Vec<f64>>,
}

impl ProgressSink for RecordProgress {
    fn on_progress(&self, _: f64, _: &str, item: f64, _: &str) {
        self.items.lock().expect("lock poisoned").push(item);
    }
}
