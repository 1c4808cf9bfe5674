use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// Terminal pipeline failures, by origin.
///
/// Causes are `Arc`-wrapped so the same error can sit in the shared latch and
/// still be returned to the caller.
#[derive(Debug, Error, Clone)]
pub enum LoadError {
    #[error("source failed: {0:#}")]
    Source(Arc<anyhow::Error>),
    #[error("bulk write failed: {0:#}")]
    Sink(Arc<anyhow::Error>),
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
}

impl LoadError {
    pub fn source(cause: anyhow::Error) -> Self {
        Self::Source(Arc::new(cause))
    }

    pub fn sink(cause: anyhow::Error) -> Self {
        Self::Sink(Arc::new(cause))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    #[error("overall deadline exceeded")]
    DeadlineExceeded,
    #[error("interrupt signal received")]
    Interrupted,
    #[error("pipeline shutdown requested")]
    Shutdown,
}

/// Sticky first-failure cell shared by every activity in one pipeline run.
///
/// The first `set` wins; later failures are dropped on the floor, which is
/// the policy for every race between concurrent failures, including
/// cancellation racing a sink failure.
#[derive(Debug, Clone, Default)]
pub struct FailureLatch {
    first: Arc<Mutex<Option<LoadError>>>,
}

impl FailureLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches `err` unless something is already latched. Returns whether
    /// `err` won.
    pub fn set(&self, err: LoadError) -> bool {
        let mut slot = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            false
        }
    }

    pub fn get(&self) -> Option<LoadError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
