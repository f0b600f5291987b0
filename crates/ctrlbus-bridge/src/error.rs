/// Errors that can occur in bridge client operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctrlbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ctrlbus_frame::FrameError),

    /// A bus frame carries at most 8 data bytes.
    #[error("payload of {len} bytes exceeds the 8 byte bus limit")]
    PayloadTooLong { len: usize },

    /// No connection to the bridge is currently established.
    #[error("not connected to bridge")]
    NotConnected,

    /// The connection task has stopped.
    #[error("bridge task closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
