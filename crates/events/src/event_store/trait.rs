use std::sync::Arc;

use warden_core::{Context, DomainResult};

use crate::aggregate::Aggregate;
use crate::event::Event;
use crate::search_query::SearchQuery;

/// Persistence engine behind the [`Eventstore`](super::Eventstore).
///
/// ## Push contract
///
/// A push is all-or-nothing. Inside one critical section the engine must:
///
/// 1. compare each aggregate's `previous_sequence` with the latest stored
///    sequence of that aggregate (`PreconditionFailed` on mismatch),
/// 2. run every precondition query against the log and hand the result to
///    its validator,
/// 3. apply unique constraints (`AlreadyExists` on collision),
/// 4. assign strictly increasing global sequences in batch order and append.
///
/// The returned events carry their assigned sequences.
pub trait EventRepository: Send + Sync {
    fn push(&self, ctx: &Context, aggregates: Vec<Aggregate>) -> DomainResult<Vec<Event>>;

    /// Events matching `query`, ascending by sequence unless the query says otherwise.
    fn filter(&self, ctx: &Context, query: &SearchQuery) -> DomainResult<Vec<Event>>;

    fn health(&self, ctx: &Context) -> DomainResult<()>;
}

impl<R> EventRepository for Arc<R>
where
    R: EventRepository + ?Sized,
{
    fn push(&self, ctx: &Context, aggregates: Vec<Aggregate>) -> DomainResult<Vec<Event>> {
        (**self).push(ctx, aggregates)
    }

    fn filter(&self, ctx: &Context, query: &SearchQuery) -> DomainResult<Vec<Event>> {
        (**self).filter(ctx, query)
    }

    fn health(&self, ctx: &Context) -> DomainResult<()> {
        (**self).health(ctx)
    }
}
