use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use warden_core::{DomainError, DomainResult};

/// Lease on a view so only one spooler worker writes it at a time.
pub trait ViewLocker: Send + Sync {
    /// Takes or extends the lease for `worker_id`.
    ///
    /// Returns `false` while another worker holds an unexpired lease.
    fn renew(&self, view: &str, worker_id: &str, duration: Duration) -> DomainResult<bool>;
}

#[derive(Debug)]
struct Lease {
    holder: String,
    until: Instant,
}

/// In-process leases for tests/dev and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryViewLocker {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryViewLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewLocker for InMemoryViewLocker {
    fn renew(&self, view: &str, worker_id: &str, duration: Duration) -> DomainResult<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| DomainError::internal("view lock poisoned"))?;
        let now = Instant::now();
        if let Some(lease) = leases.get(view) {
            if lease.holder != worker_id && lease.until > now {
                return Ok(false);
            }
        }
        leases.insert(
            view.to_string(),
            Lease {
                holder: worker_id.to_string(),
                until: now + duration,
            },
        );
        Ok(true)
    }
}
