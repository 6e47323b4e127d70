use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the refresher's lifecycle methods.
#[derive(Debug, Error)]
pub enum Error {
    /// The refresher was closed; `start` is permanently disabled.
    #[error("refresher has been closed")]
    Closed,
}

/// Failure taxonomy of the messaging collaborator.
///
/// These are transport-level outcomes of a single ping or lookup. The routing
/// table never sees them as errors; the collaborator's failure path feeds them
/// into [`handle_failure`](crate::routing::RouteTable::handle_failure) where
/// they become failure-counter increments.
#[derive(Debug, Error)]
pub enum DhtError {
    /// The remote did not answer within the allotted time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// The operation was canceled before completion.
    #[error("operation was canceled")]
    Canceled,
    /// The transport failed outright.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
