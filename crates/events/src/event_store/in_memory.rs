use std::collections::HashSet;
use std::sync::RwLock;

use tracing::debug;

use warden_core::{Context, DomainError, DomainResult};

use super::r#trait::EventRepository;
use crate::aggregate::{Aggregate, UniqueConstraintAction};
use crate::event::Event;
use crate::search_query::SearchQuery;

#[derive(Debug, Default)]
struct Log {
    // Ordered by sequence; index i holds sequence i + 1.
    events: Vec<Event>,
    unique: HashSet<(String, String)>,
}

impl Log {
    fn latest_sequence_of(&self, aggregate: &Aggregate) -> u64 {
        self.events
            .iter()
            .rev()
            .find(|e| e.aggregate_id == aggregate.id && e.aggregate_type == aggregate.aggregate_type)
            .map(|e| e.sequence)
            .unwrap_or(0)
    }

    fn next_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0) + 1
    }
}

/// Runs `query` over an ordered log slice.
pub(crate) fn select(events: &[Event], query: &SearchQuery) -> Vec<Event> {
    let limit = query.limit().map(|l| l as usize).unwrap_or(usize::MAX);
    let matching = events.iter().filter(|e| query.matches(e));
    if query.is_desc() {
        matching.rev().take(limit).cloned().collect()
    } else {
        matching.take(limit).cloned().collect()
    }
}

/// In-memory append-only log with a single global sequence.
///
/// Intended for tests/dev. Pushes serialize on one write lock, which makes the
/// whole push contract trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    log: RwLock<Log>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.log.read().map(|l| l.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> DomainError {
        DomainError::internal("event log lock poisoned")
    }
}

impl EventRepository for InMemoryEventRepository {
    fn push(&self, ctx: &Context, aggregates: Vec<Aggregate>) -> DomainResult<Vec<Event>> {
        ctx.ensure_active()?;
        let mut log = self.log.write().map_err(|_| Self::poisoned())?;

        for aggregate in &aggregates {
            let latest = log.latest_sequence_of(aggregate);
            if latest != aggregate.previous_sequence {
                return Err(DomainError::precondition_failed(format!(
                    "{} {} was changed concurrently (loaded at {}, now at {latest})",
                    aggregate.aggregate_type, aggregate.id, aggregate.previous_sequence
                )));
            }
            if let Some(precondition) = &aggregate.precondition {
                let found = select(&log.events, precondition.query());
                if let Err(err) = precondition.check(&found) {
                    debug!(
                        aggregate_id = %aggregate.id,
                        aggregate_type = %aggregate.aggregate_type,
                        error = %err,
                        "precondition rejected push"
                    );
                    return Err(err);
                }
            }
        }

        let mut unique = log.unique.clone();
        for constraint in aggregates.iter().flat_map(|a| a.unique_constraints.iter()) {
            let key = (constraint.unique_type.clone(), constraint.unique_field.clone());
            match constraint.action {
                UniqueConstraintAction::Add => {
                    if !unique.insert(key) {
                        return Err(DomainError::already_exists(constraint.error_message.clone()));
                    }
                }
                UniqueConstraintAction::Remove => {
                    unique.remove(&key);
                }
            }
        }

        // Last chance to back out; nothing has been written yet.
        ctx.ensure_active()?;

        let mut next = log.next_sequence();
        let mut committed = Vec::new();
        for aggregate in aggregates {
            for mut event in aggregate.events {
                event.sequence = next;
                next += 1;
                committed.push(event);
            }
        }
        log.events.extend(committed.iter().cloned());
        log.unique = unique;

        Ok(committed)
    }

    fn filter(&self, ctx: &Context, query: &SearchQuery) -> DomainResult<Vec<Event>> {
        ctx.ensure_active()?;
        let log = self.log.read().map_err(|_| Self::poisoned())?;
        Ok(select(&log.events, query))
    }

    fn health(&self, _ctx: &Context) -> DomainResult<()> {
        self.log.read().map(|_| ()).map_err(|_| Self::poisoned())
    }
}
