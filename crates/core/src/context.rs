//! Per-command context: who is acting, on whose behalf, and whether the
//! caller still waits for the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DomainError, DomainResult};

/// Shared cancellation flag.
///
/// Clones observe the same flag, so a caller can keep one half and hand the
/// other to a long running filter or push.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identity of the editor plus cancellation for a single command.
#[derive(Debug, Clone)]
pub struct Context {
    editor_user: String,
    editor_service: String,
    resource_owner: String,
    cancellation: Cancellation,
}

impl Context {
    pub fn new(
        editor_user: impl Into<String>,
        editor_service: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            editor_user: editor_user.into(),
            editor_service: editor_service.into(),
            resource_owner: resource_owner.into(),
            cancellation: Cancellation::new(),
        }
    }

    /// Context for background work (spooler, setup) acting as the system.
    pub fn system(service: impl Into<String>) -> Self {
        let service = service.into();
        Self::new("SYSTEM", service, "")
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn editor_user(&self) -> &str {
        &self.editor_user
    }

    pub fn editor_service(&self) -> &str {
        &self.editor_service
    }

    pub fn resource_owner(&self) -> &str {
        &self.resource_owner
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Fails with [`DomainError::Cancelled`] once the caller gave up.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let cancel = Cancellation::new();
        let ctx = Context::new("user-1", "svc", "org-1").with_cancellation(cancel.clone());
        assert!(ctx.ensure_active().is_ok());

        cancel.cancel();
        assert_eq!(ctx.ensure_active(), Err(DomainError::Cancelled));
        assert!(ctx.clone().cancellation().is_cancelled());
    }
}
