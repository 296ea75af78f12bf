//! Rebuilding state by folding events.
//!
//! Replay is deterministic: the same ordered events always produce the same
//! state. Each entity registers one fold function per event type it cares
//! about; everything else is skipped.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::DomainResult;

use crate::event::Event;

/// Bookkeeping common to every folded entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRoot {
    pub aggregate_id: String,
    /// Sequence of the last applied event; the concurrency token for the next push.
    pub sequence: u64,
    pub creation_date: Option<DateTime<Utc>>,
    pub change_date: Option<DateTime<Utc>>,
    pub resource_owner: String,
}

impl ObjectRoot {
    pub fn new(aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            ..Self::default()
        }
    }

    pub fn append_event(&mut self, event: &Event) {
        if self.aggregate_id.is_empty() {
            self.aggregate_id = event.aggregate_id.clone();
        }
        if self.resource_owner.is_empty() {
            self.resource_owner = event.resource_owner.clone();
        }
        if self.creation_date.is_none() {
            self.creation_date = Some(event.creation_date);
        }
        self.change_date = Some(event.creation_date);
        self.sequence = event.sequence;
    }

    /// Nothing has been folded yet.
    pub fn is_new(&self) -> bool {
        self.sequence == 0
    }
}

/// Fold step for one event type.
pub type FoldFn<S> = fn(&mut S, &Event) -> DomainResult<()>;

/// Registered table from event type to fold step.
pub struct Reducers<S> {
    table: HashMap<&'static str, FoldFn<S>>,
}

impl<S> Default for Reducers<S> {
    fn default() -> Self {
        Self {
            table: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for Reducers<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.table.keys().collect();
        types.sort();
        f.debug_struct("Reducers").field("event_types", &types).finish()
    }
}

impl<S> Reducers<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, event_type: &'static str, fold: FoldFn<S>) -> Self {
        self.table.insert(event_type, fold);
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.table.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }

    /// Applies the registered step; returns whether one was registered.
    pub fn reduce(&self, state: &mut S, event: &Event) -> DomainResult<bool> {
        match self.table.get(event.event_type.as_str()) {
            Some(fold) => fold(state, event).map(|()| true),
            None => Ok(false),
        }
    }
}

/// Entity rebuilt from its events.
pub trait EventSourced {
    fn root(&self) -> &ObjectRoot;
    fn root_mut(&mut self) -> &mut ObjectRoot;

    /// Applies a single event to the entity-specific state.
    fn reduce(&mut self, event: &Event) -> DomainResult<()>;

    /// Folds events in order, advancing the object root after each one.
    fn append_events(&mut self, events: &[Event]) -> DomainResult<()> {
        for event in events {
            self.reduce(event)?;
            self.root_mut().append_event(event);
        }
        Ok(())
    }

    fn sequence(&self) -> u64 {
        self.root().sequence
    }
}
