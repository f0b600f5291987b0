use crate::register::RegisterClass;

/// Why a transaction ended without success.
///
/// Exactly one cause is reported per failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameErrorCause {
    /// No response arrived before the deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// The response had the wrong length or a bad checksum.
    #[error("malformed response frame")]
    Malformed,

    /// The response answered a different request.
    #[error("sequence mismatch: expected {expected}, received {received}")]
    SequenceMismatch { expected: u8, received: u8 },

    /// The response addressed a register the device does not have.
    #[error("{class} register {idx} out of range ({len} registers)")]
    IndexOutOfRange {
        class: RegisterClass,
        idx: u8,
        len: usize,
    },

    /// The response carried an unknown frame type.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// A bootloader response answered a different command.
    #[error("bootloader command mismatch: expected {expected}, received {received}")]
    CommandMismatch { expected: u8, received: u8 },
}

/// Errors that can occur in register protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// Bridge-level error.
    #[error("bridge error: {0}")]
    Bridge(#[from] ctrlbus_bridge::BridgeError),

    /// A transaction is already outstanding.
    #[error("transaction already in progress")]
    Busy,

    /// The transaction completed with an error.
    #[error("transaction failed: {0}")]
    Failed(#[from] FrameErrorCause),

    /// The bootloader answered with an error frame.
    #[error("bootloader rejected command {command} with code {code}")]
    BootloaderRejected { command: u8, code: u8 },

    /// The bridge connection task has stopped.
    #[error("bridge connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RegisterError>;
