//! Driver process supervision.
//!
//! A [`Supervisor`] launches a driver process if it is not already running,
//! connects to it with a [`ctrlbus_text::CommandClient`], and after every
//! connection asks for the driver's revision (`GetRevision`) and the board's
//! revision (`BoardInitialize`). The driver counts as ready only while both
//! match their expected major and minor numbers.

pub mod error;
pub mod process;
pub mod revision;
pub mod sink;
pub mod supervisor;

pub use error::{Result, SupervisorError};
pub use process::{ChildProcess, LaunchConfig, ProcessControl};
pub use revision::Revision;
pub use sink::{LogSink, WriterSink};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorEvent, SupervisorStatus, BOARD_INIT_COMMAND,
    DEFAULT_STARTUP_TIMEOUT, REVISION_COMMAND,
};
