//! Batches of pending events for one aggregate, plus the factory that stamps
//! editor and resource-owner metadata onto them.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use warden_core::{Context, DomainError, DomainResult};

use crate::event::{AggregateType, Event, EventType, Version};
use crate::precondition::{Precondition, PreconditionValidator};
use crate::search_query::SearchQuery;

/// Whether a push claims or releases a unique value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraintAction {
    Add,
    Remove,
}

/// Storage-enforced uniqueness (verified domains, user names, IDP links).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub unique_type: String,
    pub unique_field: String,
    pub action: UniqueConstraintAction,
    /// Reported as `AlreadyExists` when an `Add` collides.
    pub error_message: String,
}

impl UniqueConstraint {
    pub fn add(
        unique_type: impl Into<String>,
        unique_field: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            unique_type: unique_type.into(),
            unique_field: unique_field.into(),
            action: UniqueConstraintAction::Add,
            error_message: error_message.into(),
        }
    }

    pub fn remove(unique_type: impl Into<String>, unique_field: impl Into<String>) -> Self {
        Self {
            unique_type: unique_type.into(),
            unique_field: unique_field.into(),
            action: UniqueConstraintAction::Remove,
            error_message: String::new(),
        }
    }
}

/// Pending events of one aggregate, pushed atomically.
///
/// `previous_sequence` is the sequence the caller folded up to. The store
/// rejects the push if the aggregate moved on in the meantime.
#[derive(Debug)]
pub struct Aggregate {
    pub(crate) id: String,
    pub(crate) aggregate_type: AggregateType,
    pub(crate) version: Version,
    pub(crate) previous_sequence: u64,
    pub(crate) editor_service: String,
    pub(crate) editor_user: String,
    pub(crate) resource_owner: String,
    pub(crate) events: Vec<Event>,
    pub(crate) precondition: Option<Precondition>,
    pub(crate) unique_constraints: Vec<UniqueConstraint>,
}

impl Aggregate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    pub fn previous_sequence(&self) -> u64 {
        self.previous_sequence
    }

    pub fn resource_owner(&self) -> &str {
        &self.resource_owner
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn precondition(&self) -> Option<&Precondition> {
        self.precondition.as_ref()
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    /// Appends an event carrying `payload`.
    pub fn append_event<P: Serialize + ?Sized>(
        &mut self,
        event_type: impl Into<EventType>,
        payload: &P,
    ) -> DomainResult<&mut Self> {
        let payload = serde_json::to_value(payload)?;
        self.push_event(event_type.into(), Some(payload))
    }

    /// Appends an event without payload (state transitions like `deactivated`).
    pub fn append_empty_event(
        &mut self,
        event_type: impl Into<EventType>,
    ) -> DomainResult<&mut Self> {
        self.push_event(event_type.into(), None)
    }

    pub fn set_precondition(
        &mut self,
        query: SearchQuery,
        validator: impl PreconditionValidator + 'static,
    ) -> &mut Self {
        self.precondition = Some(Precondition::new(query, validator));
        self
    }

    pub fn add_unique_constraint(&mut self, constraint: UniqueConstraint) -> &mut Self {
        self.unique_constraints.push(constraint);
        self
    }

    fn push_event(
        &mut self,
        event_type: EventType,
        payload: Option<serde_json::Value>,
    ) -> DomainResult<&mut Self> {
        if self.id.is_empty() {
            return Err(DomainError::invalid_argument("aggregate id must not be empty"));
        }
        if event_type.is_empty() {
            return Err(DomainError::invalid_argument("event type must not be empty"));
        }
        self.events.push(Event {
            id: Uuid::now_v7(),
            sequence: 0,
            previous_sequence: self.previous_sequence,
            event_type,
            payload,
            aggregate_id: self.id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_version: self.version.clone(),
            editor_user: self.editor_user.clone(),
            editor_service: self.editor_service.clone(),
            resource_owner: self.resource_owner.clone(),
            creation_date: Utc::now(),
        });
        Ok(self)
    }
}

/// Overrides applied when creating an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateOption {
    OverwriteResourceOwner(String),
    OverwriteEditorUser(String),
}

/// Factory stamping the service name and the context's editor onto aggregates.
#[derive(Debug, Clone)]
pub struct AggregateCreator {
    service_name: String,
}

impl AggregateCreator {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Creates an empty aggregate.
    ///
    /// The resource owner defaults to the context's, and to the aggregate id
    /// itself for top-level aggregates created without one (orgs, the IAM).
    pub fn new_aggregate(
        &self,
        ctx: &Context,
        id: impl Into<String>,
        aggregate_type: impl Into<AggregateType>,
        version: impl Into<Version>,
        previous_sequence: u64,
        options: &[AggregateOption],
    ) -> DomainResult<Aggregate> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::invalid_argument("aggregate id must not be empty"));
        }
        let aggregate_type = aggregate_type.into();
        if aggregate_type.is_empty() {
            return Err(DomainError::invalid_argument("aggregate type must not be empty"));
        }

        let mut resource_owner = if ctx.resource_owner().is_empty() {
            id.clone()
        } else {
            ctx.resource_owner().to_string()
        };
        let mut editor_user = ctx.editor_user().to_string();
        for option in options {
            match option {
                AggregateOption::OverwriteResourceOwner(owner) => resource_owner = owner.clone(),
                AggregateOption::OverwriteEditorUser(user) => editor_user = user.clone(),
            }
        }

        Ok(Aggregate {
            id,
            aggregate_type,
            version: version.into(),
            previous_sequence,
            editor_service: self.service_name.clone(),
            editor_user,
            resource_owner,
            events: Vec::new(),
            precondition: None,
            unique_constraints: Vec::new(),
        })
    }
}

/// Anything that knows how to turn itself into an aggregate, used for
/// pushing heterogeneous batches in one go.
pub trait AggregateStruct {
    fn to_aggregate(&self, ctx: &Context, creator: &AggregateCreator) -> DomainResult<Aggregate>;
}
