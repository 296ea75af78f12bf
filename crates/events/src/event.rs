//! The immutable fact stored in the log.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{DomainError, DomainResult};

macro_rules! impl_name_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_name_newtype!(
    /// Kind of fact, e.g. `iam.member.added`.
    EventType
);
impl_name_newtype!(
    /// Kind of aggregate, e.g. `org`.
    AggregateType
);
impl_name_newtype!(
    /// Schema version of an aggregate's events, e.g. `v1`.
    Version
);

/// A persisted (or about to be persisted) event.
///
/// `sequence` is 0 until the store assigns the global sequence on push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub sequence: u64,
    pub previous_sequence: u64,
    pub event_type: EventType,
    pub payload: Option<serde_json::Value>,
    pub aggregate_id: String,
    pub aggregate_type: AggregateType,
    pub aggregate_version: Version,
    pub editor_user: String,
    pub editor_service: String,
    pub resource_owner: String,
    pub creation_date: DateTime<Utc>,
}

impl Event {
    /// Checks the fields every stored event must carry.
    pub fn validate(&self) -> DomainResult<()> {
        let required = [
            ("aggregate id", self.aggregate_id.is_empty()),
            ("aggregate type", self.aggregate_type.is_empty()),
            ("aggregate version", self.aggregate_version.is_empty()),
            ("event type", self.event_type.is_empty()),
            ("editor user", self.editor_user.is_empty()),
            ("editor service", self.editor_service.is_empty()),
            ("resource owner", self.resource_owner.is_empty()),
        ];
        match required.iter().find(|(_, missing)| *missing) {
            Some((field, _)) => Err(DomainError::invalid_argument(format!(
                "event {} is missing its {field}",
                self.event_type
            ))),
            None => Ok(()),
        }
    }

    /// Decodes the payload; a missing payload decodes from `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> DomainResult<T> {
        let value = self.payload.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|err| {
            DomainError::internal(format!(
                "could not decode payload of {} (sequence {}): {err}",
                self.event_type, self.sequence
            ))
        })
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Event as it comes back from the store.
    pub fn stored_event(
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        sequence: u64,
        payload: Option<serde_json::Value>,
    ) -> Event {
        Event {
            id: Uuid::now_v7(),
            sequence,
            previous_sequence: sequence.saturating_sub(1),
            event_type: event_type.into(),
            payload,
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.into(),
            aggregate_version: "v1".into(),
            editor_user: "user-1".to_string(),
            editor_service: "test".to_string(),
            resource_owner: "org-1".to_string(),
            creation_date: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::stored_event;
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    #[test]
    fn validate_names_the_missing_field() {
        let mut event = stored_event("iam", "iam-1", "iam.setup.started", 1, None);
        assert!(event.validate().is_ok());

        event.editor_service.clear();
        let err = event.validate().unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("editor service"));
    }

    #[test]
    fn decode_reads_the_payload() {
        let event = stored_event(
            "org",
            "org-1",
            "org.added",
            3,
            Some(serde_json::json!({ "name": "caos" })),
        );
        assert_eq!(event.decode::<Named>().unwrap(), Named { name: "caos".into() });
    }

    #[test]
    fn decode_failures_are_internal() {
        let event = stored_event("org", "org-1", "org.added", 3, None);
        assert!(event.decode::<Named>().unwrap_err().is_internal());
    }
}
