//! `warden-events`: the event-sourcing core.
//!
//! - [`Event`]: the immutable fact, ordered by one global sequence
//! - [`Aggregate`] / [`AggregateCreator`]: pending events pushed atomically
//! - [`Precondition`]: commit-time validation against a fresh read
//! - [`SearchQuery`]: filters over the log
//! - [`Reducers`] / [`EventSourced`]: deterministic folding into state
//! - [`Eventstore`]: validating facade over an [`EventRepository`] engine

pub mod aggregate;
pub mod changes;
pub mod event;
pub mod event_store;
pub mod fold;
pub mod precondition;
pub mod search_query;

pub use aggregate::{
    Aggregate, AggregateCreator, AggregateOption, AggregateStruct, UniqueConstraint,
    UniqueConstraintAction,
};
pub use changes::{Change, Changes, changes_from_events, changes_query};
pub use event::{AggregateType, Event, EventType, Version};
pub use event_store::{EventRepository, Eventstore, InMemoryEventRepository};
pub use fold::{EventSourced, FoldFn, ObjectRoot, Reducers};
pub use precondition::{NoEvents, Precondition, PreconditionValidator};
pub use search_query::SearchQuery;
