use tracing::{error, warn};

use warden_core::DomainResult;
use warden_events::{Event, SearchQuery};

use crate::read_model::ViewStateStore;

/// A read model fed by the spooler.
pub trait ViewHandler: Send + Sync {
    /// Name of the view; keys its cursor, failed events and lock.
    fn view_model(&self) -> &str;

    fn aggregate_types(&self) -> &[&'static str];

    /// Events after `current_sequence` for the aggregate types of the view.
    fn event_query(&self, current_sequence: u64) -> SearchQuery {
        SearchQuery::new()
            .aggregate_type_filter(self.aggregate_types().iter().copied())
            .latest_sequence_filter(current_sequence)
            .order_asc()
    }

    /// Folds one event into the view's rows.
    ///
    /// Event types the view does not care about must succeed untouched so
    /// the cursor moves past them.
    fn reduce(&self, event: &Event) -> anyhow::Result<()>;

    /// Called for every failed reduce before the failure is recorded.
    fn on_error(&self, event: &Event, err: &anyhow::Error) {
        warn!(
            view = self.view_model(),
            sequence = event.sequence,
            event_type = %event.event_type,
            error = %err,
            "reduce failed"
        );
    }
}

/// What happens to an event after a failed reduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Stays in place; the next poll tries it again.
    Retry { failure_count: u64 },
    /// Threshold reached; the cursor moves past it.
    Skipped { failure_count: u64 },
}

/// Counts the failure and skips the event once it failed
/// `error_count_until_skip` times.
pub fn handle_error(
    state: &dyn ViewStateStore,
    view: &str,
    event: &Event,
    err: &anyhow::Error,
    error_count_until_skip: u64,
) -> DomainResult<ErrorOutcome> {
    let mut failed = state.failed_event(view, event.sequence)?;
    failed.failure_count += 1;
    failed.error_message = format!("{err:#}");
    state.save_failed_event(&failed)?;

    if failed.failure_count < error_count_until_skip {
        return Ok(ErrorOutcome::Retry {
            failure_count: failed.failure_count,
        });
    }
    state.save_current_sequence(view, event.sequence)?;
    error!(
        view,
        sequence = event.sequence,
        failure_count = failed.failure_count,
        error = %failed.error_message,
        "event skipped permanently"
    );
    Ok(ErrorOutcome::Skipped {
        failure_count: failed.failure_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryViewStateStore;
    use crate::test_support::stored_event;

    fn event(sequence: u64) -> Event {
        stored_event("user", "user-1", "user.locked", sequence, None)
    }

    #[test]
    fn event_is_retried_until_the_threshold() {
        let state = InMemoryViewStateStore::new();
        let err = anyhow::anyhow!("row missing");
        let failing = event(5);

        for expected in 1..3 {
            let outcome = handle_error(&state, "users", &failing, &err, 3).unwrap();
            assert_eq!(outcome, ErrorOutcome::Retry { failure_count: expected });
            assert_eq!(state.current_sequence("users").unwrap(), 0);
        }

        let outcome = handle_error(&state, "users", &failing, &err, 3).unwrap();
        assert_eq!(outcome, ErrorOutcome::Skipped { failure_count: 3 });
        assert_eq!(state.current_sequence("users").unwrap(), 5);

        let failed = state.failed_event("users", 5).unwrap();
        assert_eq!(failed.failure_count, 3);
        assert_eq!(failed.error_message, "row missing");
    }
}
