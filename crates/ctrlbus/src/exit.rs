use std::fmt;
use std::io;

use ctrlbus_bridge::BridgeError;
use ctrlbus_frame::FrameError;
use ctrlbus_register::{FrameErrorCause, RegisterError};
use ctrlbus_supervisor::SupervisorError;
use ctrlbus_text::TextError;
use ctrlbus_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The peer answered, but refused the request (`NOK` ack, bootloader error).
pub const REJECTED: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
/// A supervised driver is up but its revisions do not match.
pub const NOT_READY: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure reported on stderr, with the process exit code it maps to.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(context: &str) -> Self {
        Self::new(TIMEOUT, format!("{context}: timed out"))
    }

    fn caused(code: i32, context: &str, cause: impl fmt::Display) -> Self {
        Self::new(code, format!("{context}: {cause}"))
    }
}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::caused(io_code(err.kind()), context, err)
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_code(source.kind()),
        TransportError::ConnectTimeout { .. } | TransportError::WriteTimeout(_) => TIMEOUT,
    };
    CliError::caused(code, context, err)
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match &err {
        FrameError::Io(source) => io_code(source.kind()),
        FrameError::DelimiterInPayload(_) | FrameError::PayloadTooLarge { .. } => DATA_INVALID,
    };
    CliError::caused(code, context, err)
}

pub fn text_error(context: &str, err: TextError) -> CliError {
    let code = match err {
        TextError::Transport(err) => return transport_error(context, err),
        TextError::Frame(err) => return frame_error(context, err),
        TextError::InvalidToken(_) => USAGE,
        TextError::NotConnected | TextError::Disconnected => TRANSPORT_ERROR,
        TextError::Timeout(_) => TIMEOUT,
        TextError::Busy { .. } => FAILURE,
        TextError::Closed => INTERNAL,
    };
    CliError::caused(code, context, err)
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    let code = match err {
        BridgeError::Transport(err) => return transport_error(context, err),
        BridgeError::Frame(err) => return frame_error(context, err),
        BridgeError::PayloadTooLong { .. } => DATA_INVALID,
        BridgeError::NotConnected => TRANSPORT_ERROR,
        BridgeError::Closed => INTERNAL,
    };
    CliError::caused(code, context, err)
}

pub fn register_error(context: &str, err: RegisterError) -> CliError {
    let code = match err {
        RegisterError::Bridge(err) => return bridge_error(context, err),
        RegisterError::Failed(FrameErrorCause::Timeout) => TIMEOUT,
        RegisterError::Failed(FrameErrorCause::IndexOutOfRange { .. }) => USAGE,
        RegisterError::Failed(_) => DATA_INVALID,
        RegisterError::BootloaderRejected { .. } => REJECTED,
        RegisterError::Busy => FAILURE,
        RegisterError::Closed => INTERNAL,
    };
    CliError::caused(code, context, err)
}

pub fn supervisor_error(context: &str, err: SupervisorError) -> CliError {
    let code = match err {
        SupervisorError::Text(err) => return text_error(context, err),
        SupervisorError::Process(err) => return io_error(context, err),
        SupervisorError::StartupFailed(_) => FAILURE,
        SupervisorError::Rejected { .. } => REJECTED,
        SupervisorError::InvalidRevision(_) => DATA_INVALID,
    };
    CliError::caused(code, context, err)
}
