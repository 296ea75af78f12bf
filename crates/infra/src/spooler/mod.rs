//! Keeps views up to date by polling the event log.
//!
//! Every view owns a cursor into the global sequence. A worker locks the
//! view, queries the events after the cursor, reduces them one by one and
//! advances the cursor after each success. Views run independently of each
//! other; one view never blocks or fails another.

mod handler;
mod runner;
mod worker;

use serde::{Deserialize, Serialize};

pub use handler::{ErrorOutcome, ViewHandler, handle_error};
pub use runner::{Spooler, SpoolerHandle};
pub use worker::{StepOutcome, ViewWorker};

/// Polling and retry behaviour shared by all views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolerConfig {
    /// Max events reduced per step.
    pub bulk_limit: u64,
    /// Failures after which an event is skipped for good.
    pub error_count_until_skip: u64,
    pub poll_interval_ms: u64,
    pub lock_duration_ms: u64,
    pub worker_id: String,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            bulk_limit: 100,
            error_count_until_skip: 5,
            poll_interval_ms: 1_000,
            lock_duration_ms: 5_000,
            worker_id: "spooler-1".to_string(),
        }
    }
}
