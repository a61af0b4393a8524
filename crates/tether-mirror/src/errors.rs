//! Mirror error type.

use tether_client::ClientError;

/// Errors surfaced by the mirroring layer.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// No live subscription to run the action against (still pending, or
    /// the link is down).
    #[error("no live subscription")]
    NotReady,

    /// The topic watch loop has stopped.
    #[error("topic watch stopped")]
    Stopped,

    /// Underlying connection failure.
    #[error(transparent)]
    Client(#[from] ClientError),
}
