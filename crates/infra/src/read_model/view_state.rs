//! Per-view bookkeeping: the position in the global log a view has consumed
//! and the events that failed to reduce.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

/// An event a view failed to reduce, with how often it failed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEvent {
    pub view_name: String,
    pub failed_sequence: u64,
    pub failure_count: u64,
    pub error_message: String,
}

impl FailedEvent {
    pub fn new(view_name: impl Into<String>, failed_sequence: u64) -> Self {
        Self {
            view_name: view_name.into(),
            failed_sequence,
            failure_count: 0,
            error_message: String::new(),
        }
    }
}

pub trait ViewStateStore: Send + Sync {
    /// Sequence of the last event the view consumed; 0 before the first one.
    fn current_sequence(&self, view: &str) -> DomainResult<u64>;

    /// Advances the cursor. Values at or below the stored one are ignored.
    fn save_current_sequence(&self, view: &str, sequence: u64) -> DomainResult<()>;

    /// The failure record for `sequence`, with a count of 0 if it never failed.
    fn failed_event(&self, view: &str, sequence: u64) -> DomainResult<FailedEvent>;

    fn save_failed_event(&self, failed: &FailedEvent) -> DomainResult<()>;
}

#[derive(Debug, Default)]
struct State {
    sequences: HashMap<String, u64>,
    failed: HashMap<(String, u64), FailedEvent>,
}

/// In-memory view state for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryViewStateStore {
    inner: RwLock<State>,
}

impl InMemoryViewStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DomainError {
    DomainError::internal("view state lock poisoned")
}

impl ViewStateStore for InMemoryViewStateStore {
    fn current_sequence(&self, view: &str) -> DomainResult<u64> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state.sequences.get(view).copied().unwrap_or(0))
    }

    fn save_current_sequence(&self, view: &str, sequence: u64) -> DomainResult<()> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        let current = state.sequences.entry(view.to_string()).or_insert(0);
        if sequence > *current {
            *current = sequence;
        }
        Ok(())
    }

    fn failed_event(&self, view: &str, sequence: u64) -> DomainResult<FailedEvent> {
        let state = self.inner.read().map_err(|_| poisoned())?;
        Ok(state
            .failed
            .get(&(view.to_string(), sequence))
            .cloned()
            .unwrap_or_else(|| FailedEvent::new(view, sequence)))
    }

    fn save_failed_event(&self, failed: &FailedEvent) -> DomainResult<()> {
        let mut state = self.inner.write().map_err(|_| poisoned())?;
        state.failed.insert(
            (failed.view_name.clone(), failed.failed_sequence),
            failed.clone(),
        );
        Ok(())
    }
}
