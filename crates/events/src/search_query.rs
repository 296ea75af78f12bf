//! Filters over the global log.

use warden_core::{DomainError, DomainResult};

use crate::event::{AggregateType, Event, EventType};

/// Read filter: aggregate types, aggregate ids, event types, a minimum
/// sequence, an optional resource owner, plus limit and sort order.
///
/// All lists are alternatives within themselves and combined with AND.
/// `latest_sequence` is exclusive: only events with a greater sequence match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    aggregate_types: Vec<AggregateType>,
    aggregate_ids: Vec<String>,
    event_types: Vec<EventType>,
    latest_sequence: u64,
    resource_owner: Option<String>,
    limit: Option<u64>,
    desc: bool,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_type_filter<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AggregateType>,
    {
        self.aggregate_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn aggregate_id_filter<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.aggregate_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn event_types_filter<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        self.event_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn latest_sequence_filter(mut self, sequence: u64) -> Self {
        self.latest_sequence = sequence;
        self
    }

    pub fn resource_owner_filter(mut self, resource_owner: impl Into<String>) -> Self {
        self.resource_owner = Some(resource_owner.into());
        self
    }

    /// Caps the number of returned events; 0 means unlimited.
    pub fn set_limit(mut self, limit: u64) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn order_desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn order_asc(mut self) -> Self {
        self.desc = false;
        self
    }

    pub fn aggregate_types(&self) -> &[AggregateType] {
        &self.aggregate_types
    }

    pub fn aggregate_ids(&self) -> &[String] {
        &self.aggregate_ids
    }

    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest_sequence
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn is_desc(&self) -> bool {
        self.desc
    }

    /// Rejects queries that would scan the whole log.
    pub fn validate(&self) -> DomainResult<()> {
        if self.aggregate_types.is_empty()
            && self.aggregate_ids.is_empty()
            && self.event_types.is_empty()
        {
            return Err(DomainError::invalid_argument("search query has no filters"));
        }
        if self.aggregate_types.iter().any(AggregateType::is_empty) {
            return Err(DomainError::invalid_argument("empty aggregate type in search query"));
        }
        Ok(())
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.sequence > self.latest_sequence
            && (self.aggregate_types.is_empty()
                || self.aggregate_types.contains(&event.aggregate_type))
            && (self.aggregate_ids.is_empty() || self.aggregate_ids.contains(&event.aggregate_id))
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
            && self
                .resource_owner
                .as_ref()
                .is_none_or(|owner| *owner == event.resource_owner)
    }
}
