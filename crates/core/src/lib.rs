//! `warden-core`: foundation shared by every warden crate.
//!
//! Pure building blocks only: the error taxonomy surfaced to callers, the
//! per-command [`Context`], id generation, field deltas and the bounded
//! entity cache. Nothing in here knows about events or storage.

pub mod cache;
pub mod changes;
pub mod context;
pub mod error;
pub mod id;

pub use cache::{BoundedCache, CacheConfig, EntityCache};
pub use changes::{FieldChanges, NO_CHANGES, apply_changes, changes, require_changes};
pub use context::{Cancellation, Context};
pub use error::{DomainError, DomainResult};
pub use id::{IdGenerator, SequentialIdGenerator, UuidV7Generator};
