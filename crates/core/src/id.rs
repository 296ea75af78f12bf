//! Identifier generation for new aggregates and sub-entities.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::DomainResult;

/// Produces unique ids for orgs, users, IDP configs and machine keys.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> DomainResult<String>;
}

/// Time-ordered UUIDv7 ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> DomainResult<String> {
        Ok(Uuid::now_v7().to_string())
    }
}

/// Predictable `<prefix>-<n>` ids, starting at 1.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> DomainResult<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{n}", self.prefix))
    }
}
