use std::time::Duration;

/// Errors raised while supervising a driver process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Text(#[from] ctrlbus_text::TextError),

    /// Starting, polling or stopping the process failed.
    #[error("process control failed: {0}")]
    Process(#[from] std::io::Error),

    #[error("process did not reach the running state within {0:?}")]
    StartupFailed(Duration),

    /// The driver answered a handshake command with `NOK`.
    #[error("{command} rejected with code {code}")]
    Rejected { command: String, code: u32 },

    #[error("invalid revision parameters: {0:?}")]
    InvalidRevision(Vec<String>),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
