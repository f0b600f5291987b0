use std::time::Duration;

/// Errors that can occur in text protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctrlbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ctrlbus_frame::FrameError),

    /// A token is empty or contains whitespace and cannot be sent.
    #[error("invalid token {0:?}")]
    InvalidToken(String),

    /// A command is already waiting for its acknowledge.
    #[error("command {seq} still waiting for acknowledge")]
    Busy { seq: u16 },

    /// No connection to the server is currently established.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped while a command was outstanding.
    #[error("connection lost while waiting for acknowledge")]
    Disconnected,

    /// No acknowledge arrived in time.
    #[error("acknowledge timed out after {0:?}")]
    Timeout(Duration),

    /// The connection task has stopped.
    #[error("connection task closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TextError>;
