use std::net::SocketAddr;
use std::time::Duration;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The connection attempt did not complete in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The peer did not drain the send buffer within the write bound.
    #[error("write not flushed within {0:?}")]
    WriteTimeout(Duration),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the error leaves the connection usable.
    ///
    /// Only a write that ran past its bound qualifies: the bytes may still be
    /// delivered and the socket is not known to be broken.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::WriteTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
