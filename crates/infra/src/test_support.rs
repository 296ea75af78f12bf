//! Builders shared by the unit tests of this crate.

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use warden_events::Event;

/// An event as the store hands it out.
pub(crate) fn stored_event(
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    sequence: u64,
    payload: Option<serde_json::Value>,
) -> Event {
    Event {
        id: Uuid::from_u128(u128::from(sequence)),
        sequence,
        previous_sequence: sequence.saturating_sub(1),
        event_type: event_type.into(),
        payload,
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: aggregate_type.into(),
        aggregate_version: "v1".into(),
        editor_user: "admin-1".to_string(),
        editor_service: "test".to_string(),
        resource_owner: "org-1".to_string(),
        creation_date: Utc
            .timestamp_opt(1_714_550_400 + sequence as i64, 0)
            .single()
            .unwrap_or_default(),
    }
}
