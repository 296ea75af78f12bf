//! Event storage.
//!
//! [`Eventstore`] is what repositories talk to: it validates batches and
//! queries, then delegates to an [`EventRepository`] engine.

mod in_memory;
mod r#trait;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use warden_core::{Context, DomainError, DomainResult};

use crate::aggregate::{Aggregate, AggregateCreator, AggregateStruct};
use crate::event::Event;
use crate::fold::EventSourced;
use crate::search_query::SearchQuery;

pub use in_memory::InMemoryEventRepository;
pub use r#trait::EventRepository;

/// Validating facade over a persistence engine.
#[derive(Clone)]
pub struct Eventstore {
    repo: Arc<dyn EventRepository>,
    creator: AggregateCreator,
}

impl fmt::Debug for Eventstore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eventstore")
            .field("service", &self.creator.service_name())
            .finish_non_exhaustive()
    }
}

impl Eventstore {
    pub fn new(repo: Arc<dyn EventRepository>, service_name: impl Into<String>) -> Self {
        Self {
            repo,
            creator: AggregateCreator::new(service_name),
        }
    }

    /// Eventstore over a fresh [`InMemoryEventRepository`].
    pub fn in_memory(service_name: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemoryEventRepository::new()), service_name)
    }

    pub fn aggregate_creator(&self) -> &AggregateCreator {
        &self.creator
    }

    pub fn health(&self, ctx: &Context) -> DomainResult<()> {
        self.repo.health(ctx)
    }

    /// Persists all aggregates atomically and returns the stored events.
    pub fn push_aggregates(
        &self,
        ctx: &Context,
        aggregates: Vec<Aggregate>,
    ) -> DomainResult<Vec<Event>> {
        if aggregates.is_empty() {
            return Err(DomainError::invalid_argument("no aggregates to push"));
        }
        for aggregate in &aggregates {
            if aggregate.events().is_empty() {
                return Err(DomainError::invalid_argument(format!(
                    "no events in aggregate {} {}",
                    aggregate.aggregate_type(),
                    aggregate.id()
                )));
            }
            for event in aggregate.events() {
                event.validate()?;
            }
        }

        let aggregate_count = aggregates.len();
        let events = self.repo.push(ctx, aggregates)?;
        debug!(
            aggregates = aggregate_count,
            events = events.len(),
            last_sequence = events.last().map(|e| e.sequence).unwrap_or(0),
            "pushed aggregates"
        );
        Ok(events)
    }

    pub fn push_aggregate_structs(
        &self,
        ctx: &Context,
        structs: &[&dyn AggregateStruct],
    ) -> DomainResult<Vec<Event>> {
        if structs.is_empty() {
            return Err(DomainError::invalid_argument("no aggregates to push"));
        }
        let aggregates = structs
            .iter()
            .map(|s| s.to_aggregate(ctx, &self.creator))
            .collect::<DomainResult<Vec<_>>>()?;
        self.push_aggregates(ctx, aggregates)
    }

    pub fn filter_events(&self, ctx: &Context, query: &SearchQuery) -> DomainResult<Vec<Event>> {
        query.validate()?;
        self.repo.filter(ctx, query)
    }

    /// Filters and folds the result into `entity`; returns the number of events folded.
    pub fn filter_and_fold<E: EventSourced>(
        &self,
        ctx: &Context,
        query: &SearchQuery,
        entity: &mut E,
    ) -> DomainResult<usize> {
        let events = self.filter_events(ctx, query)?;
        entity.append_events(&events)?;
        Ok(events.len())
    }
}
