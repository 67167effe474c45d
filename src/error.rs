//! Error types for flow construction, push and shutdown.
//!
//! Push failures hand the rejected item back to the caller, so they do not
//! require `T: Debug` and are implemented by hand rather than derived.

use std::fmt;
use thiserror::Error;

/// Error type for flow lifecycle operations.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid flow options: {0}")]
    InvalidConfig(String),

    #[error("Flow must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("Failed to spawn lane worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Flow is already closed")]
    AlreadyClosed,

    #[error("Output stream was already taken")]
    OutputTaken,

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Error returned by `Flow::push` and `Flow::try_push`.
#[derive(PartialEq, Eq)]
pub enum PushError<T> {
    /// The inbound buffer is full. Retry later or drop the item.
    BufferFull(T),
    /// The flow is closed. Stop pushing.
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::BufferFull(item) | Self::Closed(item) => item,
        }
    }

    /// Whether the flow refused the item for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferFull(_) => f.write_str("BufferFull(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferFull(_) => f.write_str("flow buffer is full"),
            Self::Closed(_) => f.write_str("flow is closed"),
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

/// Status returned by a lane's non-blocking push.
#[derive(PartialEq, Eq)]
pub enum LanePushError<T> {
    /// The lane holds `capacity` pending items.
    Full(T),
    /// The lane was closed.
    Closed(T),
}

impl<T> LanePushError<T> {
    /// Recover the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for LanePushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for LanePushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("lane is full"),
            Self::Closed(_) => f.write_str("lane is closed"),
        }
    }
}

impl<T> std::error::Error for LanePushError<T> {}

/// Returned by `Publisher::publish` once nobody can observe the result anymore.
///
/// Happens only after the flow was torn down (dropped, or its consumer went away).
#[derive(PartialEq, Eq)]
pub struct Disconnected<R>(pub R);

impl<R> fmt::Debug for Disconnected<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Disconnected(..)")
    }
}

impl<R> fmt::Display for Disconnected<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("lane output is disconnected")
    }
}

impl<R> std::error::Error for Disconnected<R> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_returns_item() {
        let err = PushError::BufferFull(vec![1, 2, 3]);
        assert!(!err.is_closed());
        assert_eq!(err.to_string(), "flow buffer is full");
        assert_eq!(err.into_inner(), vec![1, 2, 3]);

        let err = PushError::Closed("late");
        assert!(err.is_closed());
        assert_eq!(format!("{err:?}"), "Closed(..)");
        assert_eq!(err.into_inner(), "late");
    }

    #[test]
    fn test_push_error_converts_to_boxed_error() {
        struct Opaque;
        let boxed: Box<dyn std::error::Error> = Box::new(PushError::Closed(Opaque));
        assert_eq!(boxed.to_string(), "flow is closed");
    }

    #[test]
    fn test_flow_error_messages() {
        assert_eq!(FlowError::AlreadyClosed.to_string(), "Flow is already closed");
        assert_eq!(
            FlowError::InvalidConfig("lane_count must be at least 1".into()).to_string(),
            "Invalid flow options: lane_count must be at least 1"
        );
    }
}
