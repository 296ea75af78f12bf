//! Commit-time checks attached to an aggregate.
//!
//! The store runs the precondition's query against the log inside the push's
//! critical section and hands the result to the validator. A rejection fails
//! the whole push.

use std::fmt;

use warden_core::{DomainError, DomainResult};

use crate::event::Event;
use crate::search_query::SearchQuery;

/// Strategy deciding whether a push may proceed given a fresh read.
pub trait PreconditionValidator: Send + Sync {
    fn validate(&self, events: &[Event]) -> DomainResult<()>;
}

impl<F> PreconditionValidator for F
where
    F: Fn(&[Event]) -> DomainResult<()> + Send + Sync,
{
    fn validate(&self, events: &[Event]) -> DomainResult<()> {
        self(events)
    }
}

/// Query plus validator.
pub struct Precondition {
    query: SearchQuery,
    validator: Box<dyn PreconditionValidator>,
}

impl Precondition {
    pub fn new(query: SearchQuery, validator: impl PreconditionValidator + 'static) -> Self {
        Self {
            query,
            validator: Box::new(validator),
        }
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn check(&self, events: &[Event]) -> DomainResult<()> {
        self.validator.validate(events)
    }
}

impl fmt::Debug for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Precondition")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Fails with the given error as soon as the query returns anything.
#[derive(Debug, Clone)]
pub struct NoEvents(pub DomainError);

impl PreconditionValidator for NoEvents {
    fn validate(&self, events: &[Event]) -> DomainResult<()> {
        if events.is_empty() {
            Ok(())
        } else {
            Err(self.0.clone())
        }
    }
}
