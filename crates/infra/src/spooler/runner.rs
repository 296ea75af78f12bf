use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use warden_core::{Cancellation, Context, DomainError, DomainResult};
use warden_events::Eventstore;

use super::SpoolerConfig;
use super::handler::ViewHandler;
use super::worker::{StepOutcome, ViewWorker};
use crate::read_model::{ViewLocker, ViewStateStore};

const SPOOLER_SERVICE: &str = "spooler";

/// Handle to stop all view threads and wait for them.
#[derive(Debug)]
pub struct SpoolerHandle {
    cancellation: Cancellation,
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
}

impl SpoolerHandle {
    pub fn views(&self) -> usize {
        self.joins.len()
    }

    /// Request graceful shutdown and wait for every view thread to stop.
    pub fn shutdown(mut self) {
        self.cancellation.cancel();
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
        info!("spooler stopped");
    }
}

/// Starts one polling thread per view.
#[derive(Debug)]
pub struct Spooler;

impl Spooler {
    pub fn start(
        config: SpoolerConfig,
        eventstore: Eventstore,
        state: Arc<dyn ViewStateStore>,
        locker: Arc<dyn ViewLocker>,
        handlers: Vec<Arc<dyn ViewHandler>>,
    ) -> DomainResult<SpoolerHandle> {
        let cancellation = Cancellation::new();
        let mut handle = SpoolerHandle {
            cancellation: cancellation.clone(),
            shutdown: Vec::with_capacity(handlers.len()),
            joins: Vec::with_capacity(handlers.len()),
        };

        for handler in handlers {
            let name = format!("spooler-{}", handler.view_model());
            let worker = ViewWorker::new(
                handler,
                eventstore.clone(),
                state.clone(),
                locker.clone(),
                config.clone(),
            );
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let ctx = Context::system(SPOOLER_SERVICE).with_cancellation(cancellation.clone());
            let poll = Duration::from_millis(config.poll_interval_ms);
            let bulk_limit = config.bulk_limit;

            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || view_loop(worker, ctx, shutdown_rx, poll, bulk_limit));
            let join = match spawned {
                Ok(join) => join,
                Err(err) => {
                    // already running views must not outlive a failed start
                    handle.shutdown();
                    return Err(DomainError::internal(format!(
                        "failed to spawn {name}: {err}"
                    )));
                }
            };
            handle.shutdown.push(shutdown_tx);
            handle.joins.push(join);
        }

        info!(views = handle.views(), "spooler started");
        Ok(handle)
    }
}

fn view_loop(
    worker: ViewWorker,
    ctx: Context,
    shutdown_rx: mpsc::Receiver<()>,
    poll: Duration,
    bulk_limit: u64,
) {
    loop {
        if ctx.cancellation().is_cancelled() {
            break;
        }

        let drained = match worker.step(&ctx) {
            Ok(StepOutcome::Committed { reduced, skipped, .. }) => {
                (reduced + skipped) as u64 >= bulk_limit
            }
            Ok(_) => false,
            Err(err) if err.is_cancelled() => break,
            Err(err) => {
                warn!(view = worker.view_model(), error = %err, "spooler step failed");
                false
            }
        };
        // a full batch means more events are likely waiting
        if drained {
            continue;
        }

        match shutdown_rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }
}
