//! Logging setup shared by every warden process.

/// Initialize process-wide logging from `WARDEN_LOG_*`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init();
}

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{LogConfig, LogConfigError, LogFormat, init_with};
