//! Client error type.

/// Errors surfaced by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection was explicitly closed; further traffic is a
    /// programming error and fails fast.
    #[error("connection explicitly closed")]
    Closed,

    /// The physical link is currently down; the call was not delivered.
    #[error("not connected")]
    NotConnected,

    /// The physical link dropped while a response was outstanding.
    #[error("connection lost while awaiting response")]
    ConnectionLost,

    /// The outbound queue is full; the frame was not enqueued.
    #[error("outbound queue full")]
    QueueFull,

    /// Failed to serialize an outgoing frame.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Transport-level failure while dialing.
    #[error("transport error: {0}")]
    Transport(String),
}
