//! Cancellation and deadline context for store operations.
//!
//! Every [`Store`](crate::Store) operation receives an [`OperationContext`].
//! Backends call [`OperationContext::check`] before each storage step; once the
//! deadline passes or [`OperationContext::cancel`] is called, the operation
//! returns [`Error::Cancelled`] and its open transaction is dropped, which rolls
//! it back.

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Deadline plus a shared cancellation flag.
///
/// Clones share the flag, so one worker can cancel an operation that another
/// thread is running.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OperationContext {
    /// A context that never times out.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a clone of this context with a (possibly tighter) deadline.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };
        Self {
            deadline,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Requests cancellation of every operation sharing this context.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled or past the deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`Error::Cancelled`] if the context is done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] naming `operation`.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_done() {
            metrics::counter!("assetdb_cancelled_operations_total").increment(1);
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}
