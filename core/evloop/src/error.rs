//! Error types returned by event loop operations.
//!
//! Every failure is reported synchronously to the caller of the operation that
//! detected it. A misbehaving callback never surfaces here: panics inside
//! handlers are contained by the dispatcher and only show up in
//! [`LoopStats::handler_panics`](crate::LoopStats).

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = EventLoopError> = std::result::Result<T, E>;

/// Errors produced by event loop, subscription and default-loop operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLoopError {
    /// A filter combination, event identity or configuration value was rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// The loop (or the default loop) is not in a state that allows the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Which state check failed.
        reason: &'static str,
    },

    /// Queue capacity or the dispatch lock could not be obtained before the deadline.
    ///
    /// The event was not enqueued.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout the caller supplied.
        timeout: Duration,
    },

    /// An allocation failed: a payload copy, or the stack of a dispatch thread.
    #[error("out of memory allocating {size} bytes")]
    NoMemory {
        /// Requested size, zero when unknown.
        size: usize,
    },
}

impl EventLoopError {
    pub(crate) fn invalid_arg(reason: &'static str) -> Self {
        EventLoopError::InvalidArgument { reason }
    }

    pub(crate) fn invalid_state(reason: &'static str) -> Self {
        EventLoopError::InvalidState { reason }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use evloop::EventLoopError;
    /// use std::time::Duration;
    ///
    /// let err = EventLoopError::Timeout { timeout: Duration::from_millis(10) };
    /// assert_eq!(err.as_label(), "timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EventLoopError::InvalidArgument { .. } => "invalid_argument",
            EventLoopError::InvalidState { .. } => "invalid_state",
            EventLoopError::Timeout { .. } => "timeout",
            EventLoopError::NoMemory { .. } => "no_memory",
        }
    }

    /// `true` for [`EventLoopError::Timeout`]; callers that retry a publish check this.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EventLoopError::Timeout { .. })
    }
}
