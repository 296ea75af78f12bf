//! Audit-style change history read straight from the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

use crate::event::{AggregateType, Event, EventType};
use crate::search_query::SearchQuery;

/// One entry in an aggregate's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub change_date: DateTime<Utc>,
    pub event_type: EventType,
    pub sequence: u64,
    pub modifier_id: String,
    pub data: Option<serde_json::Value>,
}

/// A page of history plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub changes: Vec<Change>,
    pub last_sequence: u64,
}

/// Query for one aggregate's history, paged by sequence.
///
/// Ascending pages continue above `latest_sequence`. Descending pages continue
/// below it, so they are cut to size by [`changes_from_events`] instead.
pub fn changes_query(
    aggregate_type: impl Into<AggregateType>,
    aggregate_id: &str,
    latest_sequence: u64,
    limit: u64,
    sort_ascending: bool,
) -> SearchQuery {
    let query = SearchQuery::new()
        .aggregate_type_filter([aggregate_type.into()])
        .aggregate_id_filter([aggregate_id]);
    if sort_ascending {
        query
            .latest_sequence_filter(latest_sequence)
            .set_limit(limit)
            .order_asc()
    } else {
        query.order_desc()
    }
}

/// Builds a page of at most `limit` entries (0 = unlimited) from the events
/// returned by [`changes_query`]. Fails with `NotFound` when the page is empty.
pub fn changes_from_events(
    events: &[Event],
    latest_sequence: u64,
    limit: u64,
    sort_ascending: bool,
) -> DomainResult<Changes> {
    let limit = if limit == 0 { usize::MAX } else { limit as usize };
    let page: Vec<Change> = events
        .iter()
        .filter(|e| sort_ascending || latest_sequence == 0 || e.sequence < latest_sequence)
        .take(limit)
        .map(|e| Change {
            change_date: e.creation_date,
            event_type: e.event_type.clone(),
            sequence: e.sequence,
            modifier_id: e.editor_user.clone(),
            data: e.payload.clone(),
        })
        .collect();

    let Some(last) = page.last() else {
        return Err(DomainError::not_found("no changes found"));
    };
    let last_sequence = last.sequence;
    Ok(Changes {
        changes: page,
        last_sequence,
    })
}
