//! TCP transport plumbing shared by every ctrlbus connection.
//!
//! Drivers, the bus bridge and the central application all talk over local
//! TCP sockets. This is the lowest layer of ctrlbus: it binds, accepts and
//! connects sockets, applies the low-delay option, and enforces the bounded
//! write rule (a write may wait for the OS buffer to drain, but never forever).

pub mod config;
pub mod error;
pub mod tcp;

pub use config::ConnectConfig;
pub use error::{Result, TransportError};
pub use tcp::{connect, write_bounded, TcpServerSocket};
