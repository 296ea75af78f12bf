use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use warden_core::{Context, DomainResult};
use warden_events::Eventstore;

use super::SpoolerConfig;
use super::handler::{ErrorOutcome, ViewHandler, handle_error};
use crate::read_model::{ViewLocker, ViewStateStore};

/// Result of one poll of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Another worker holds the view.
    NotLocked,
    /// Nothing after the cursor.
    Idle { current_sequence: u64 },
    /// The batch was consumed; skipped events count as consumed.
    Committed {
        reduced: usize,
        skipped: usize,
        current_sequence: u64,
    },
    /// The batch stopped at a failed event that will be retried.
    Retrying {
        reduced: usize,
        sequence: u64,
        failure_count: u64,
    },
}

/// Drives a single view: lock, query, reduce, commit.
pub struct ViewWorker {
    handler: Arc<dyn ViewHandler>,
    eventstore: Eventstore,
    state: Arc<dyn ViewStateStore>,
    locker: Arc<dyn ViewLocker>,
    config: SpoolerConfig,
}

impl ViewWorker {
    pub fn new(
        handler: Arc<dyn ViewHandler>,
        eventstore: Eventstore,
        state: Arc<dyn ViewStateStore>,
        locker: Arc<dyn ViewLocker>,
        config: SpoolerConfig,
    ) -> Self {
        Self {
            handler,
            eventstore,
            state,
            locker,
            config,
        }
    }

    pub fn view_model(&self) -> &str {
        self.handler.view_model()
    }

    /// Runs one cycle. The cursor is read again before every event, so an
    /// event at or below it is never reduced twice.
    pub fn step(&self, ctx: &Context) -> DomainResult<StepOutcome> {
        let view = self.handler.view_model();
        let lease = Duration::from_millis(self.config.lock_duration_ms);
        if !self.locker.renew(view, &self.config.worker_id, lease)? {
            trace!(view, "view locked by another worker");
            return Ok(StepOutcome::NotLocked);
        }
        trace!(view, worker = %self.config.worker_id, "view locked");

        let current = self.state.current_sequence(view)?;
        let query = self
            .handler
            .event_query(current)
            .set_limit(self.config.bulk_limit);
        let events = self.eventstore.filter_events(ctx, &query)?;
        if events.is_empty() {
            return Ok(StepOutcome::Idle {
                current_sequence: current,
            });
        }

        let mut reduced = 0;
        let mut skipped = 0;
        for event in &events {
            ctx.ensure_active()?;
            if event.sequence <= self.state.current_sequence(view)? {
                continue;
            }
            match self.handler.reduce(event) {
                Ok(()) => {
                    self.state.save_current_sequence(view, event.sequence)?;
                    reduced += 1;
                }
                Err(err) => {
                    self.handler.on_error(event, &err);
                    match handle_error(
                        self.state.as_ref(),
                        view,
                        event,
                        &err,
                        self.config.error_count_until_skip,
                    )? {
                        ErrorOutcome::Skipped { .. } => skipped += 1,
                        ErrorOutcome::Retry { failure_count } => {
                            return Ok(StepOutcome::Retrying {
                                reduced,
                                sequence: event.sequence,
                                failure_count,
                            });
                        }
                    }
                }
            }
        }

        let current_sequence = self.state.current_sequence(view)?;
        debug!(view, reduced, skipped, current_sequence, "view batch committed");
        Ok(StepOutcome::Committed {
            reduced,
            skipped,
            current_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use proptest::prelude::*;
    use serde_json::json;

    use warden_events::{Aggregate, AggregateCreator};

    use crate::read_model::{InMemoryViewLocker, InMemoryViewStateStore};

    const VIEW: &str = "counters";

    /// Counts reduced events and fails on demand.
    #[derive(Default)]
    struct Counting {
        reduced: Mutex<Vec<u64>>,
        failing: Mutex<HashSet<u64>>,
    }

    impl ViewHandler for Counting {
        fn view_model(&self) -> &str {
            VIEW
        }

        fn aggregate_types(&self) -> &[&'static str] {
            &["counter"]
        }

        fn reduce(&self, event: &warden_events::Event) -> anyhow::Result<()> {
            if self.failing.lock().unwrap().contains(&event.sequence) {
                anyhow::bail!("cannot reduce {}", event.sequence);
            }
            self.reduced.lock().unwrap().push(event.sequence);
            Ok(())
        }
    }

    fn ctx() -> Context {
        Context::new("admin-1", "test", "org-1")
    }

    fn push_counters(store: &Eventstore, count: usize) {
        let creator = AggregateCreator::new("test");
        for i in 0..count {
            let mut agg: Aggregate = creator
                .new_aggregate(&ctx(), format!("c-{i}"), "counter", "v1", 0, &[])
                .unwrap();
            agg.append_event("counter.added", &json!({ "n": i })).unwrap();
            store.push_aggregates(&ctx(), vec![agg]).unwrap();
        }
    }

    fn worker(
        store: &Eventstore,
        handler: Arc<Counting>,
        state: Arc<InMemoryViewStateStore>,
        config: SpoolerConfig,
    ) -> ViewWorker {
        ViewWorker::new(
            handler,
            store.clone(),
            state,
            Arc::new(InMemoryViewLocker::new()),
            config,
        )
    }

    #[test]
    fn batches_respect_the_bulk_limit() {
        let store = Eventstore::in_memory("test");
        push_counters(&store, 5);
        let handler = Arc::new(Counting::default());
        let state = Arc::new(InMemoryViewStateStore::new());
        let config = SpoolerConfig {
            bulk_limit: 3,
            ..SpoolerConfig::default()
        };
        let worker = worker(&store, handler.clone(), state.clone(), config);

        assert_eq!(
            worker.step(&ctx()).unwrap(),
            StepOutcome::Committed { reduced: 3, skipped: 0, current_sequence: 3 }
        );
        assert_eq!(
            worker.step(&ctx()).unwrap(),
            StepOutcome::Committed { reduced: 2, skipped: 0, current_sequence: 5 }
        );
        assert_eq!(worker.step(&ctx()).unwrap(), StepOutcome::Idle { current_sequence: 5 });
        assert_eq!(*handler.reduced.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn events_below_the_cursor_are_not_reduced_again() {
        let store = Eventstore::in_memory("test");
        push_counters(&store, 4);
        let handler = Arc::new(Counting::default());
        let state = Arc::new(InMemoryViewStateStore::new());
        // another writer already consumed up to 2
        state.save_current_sequence(VIEW, 2).unwrap();
        let worker = worker(&store, handler.clone(), state, SpoolerConfig::default());

        worker.step(&ctx()).unwrap();
        assert_eq!(*handler.reduced.lock().unwrap(), vec![3, 4]);
    }

    #[test]
    fn a_locked_view_is_left_alone() {
        let store = Eventstore::in_memory("test");
        push_counters(&store, 1);
        let locker = Arc::new(InMemoryViewLocker::new());
        locker
            .renew(VIEW, "someone-else", Duration::from_secs(60))
            .unwrap();
        let worker = ViewWorker::new(
            Arc::new(Counting::default()),
            store,
            Arc::new(InMemoryViewStateStore::new()),
            locker,
            SpoolerConfig::default(),
        );
        assert_eq!(worker.step(&ctx()).unwrap(), StepOutcome::NotLocked);
    }

    #[test]
    fn a_failing_event_blocks_the_view_until_skipped() {
        let store = Eventstore::in_memory("test");
        push_counters(&store, 4);
        let handler = Arc::new(Counting::default());
        handler.failing.lock().unwrap().insert(2);
        let state = Arc::new(InMemoryViewStateStore::new());
        let config = SpoolerConfig {
            error_count_until_skip: 2,
            ..SpoolerConfig::default()
        };
        let worker = worker(&store, handler.clone(), state.clone(), config);

        assert_eq!(
            worker.step(&ctx()).unwrap(),
            StepOutcome::Retrying { reduced: 1, sequence: 2, failure_count: 1 }
        );
        assert_eq!(state.current_sequence(VIEW).unwrap(), 1);

        assert_eq!(
            worker.step(&ctx()).unwrap(),
            StepOutcome::Committed { reduced: 2, skipped: 1, current_sequence: 4 }
        );
        assert_eq!(*handler.reduced.lock().unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn cancelled_context_stops_the_batch() {
        let store = Eventstore::in_memory("test");
        push_counters(&store, 2);
        let worker = worker(
            &store,
            Arc::new(Counting::default()),
            Arc::new(InMemoryViewStateStore::new()),
            SpoolerConfig::default(),
        );
        let ctx = ctx();
        ctx.cancellation().cancel();
        assert!(worker.step(&ctx).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn cursor_is_monotonic_across_steps(
            total in 1usize..12,
            failing in proptest::collection::hash_set(1u64..12, 0..4),
            bulk_limit in 1u64..5,
        ) {
            let store = Eventstore::in_memory("test");
            push_counters(&store, total);
            let handler = Arc::new(Counting::default());
            *handler.failing.lock().unwrap() = failing;
            let state = Arc::new(InMemoryViewStateStore::new());
            let config = SpoolerConfig {
                bulk_limit,
                error_count_until_skip: 2,
                ..SpoolerConfig::default()
            };
            let worker = worker(&store, handler.clone(), state.clone(), config);

            let mut previous = 0;
            for _ in 0..(total * 3) {
                worker.step(&ctx()).unwrap();
                let current = state.current_sequence(VIEW).unwrap();
                prop_assert!(current >= previous);
                previous = current;
            }
            prop_assert_eq!(previous, total as u64);

            let reduced = handler.reduced.lock().unwrap().clone();
            let mut sorted = reduced.clone();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), reduced.len());
        }
    }
}
