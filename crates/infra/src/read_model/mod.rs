//! Storage for views: the rows, each view's cursor and failed events, and
//! the lock that keeps a view single-writer.

pub mod view_lock;
pub mod view_state;
pub mod view_store;

pub use view_lock::{InMemoryViewLocker, ViewLocker};
pub use view_state::{FailedEvent, InMemoryViewStateStore, ViewStateStore};
pub use view_store::{InMemoryViewStore, ViewStore};
