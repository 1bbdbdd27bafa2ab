//! SDK error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    /// The manager has no live connection (never initialized, closed, or
    /// reconnection was exhausted).
    #[error("not connected")]
    NotConnected,

    /// The connection task is gone; the event could not be queued.
    #[error("connection closed")]
    Closed,
}
