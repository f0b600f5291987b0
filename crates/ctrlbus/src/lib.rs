//! Protocol stack for distributed device control over local TCP.
//!
//! A central application drives a set of driver processes with a text
//! command protocol; each driver reaches its board through a bus bridge
//! using an 8-byte register protocol with a bootloader sub-protocol.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP sockets, reconnect settings, bounded writes
//! - [`frame`]: `<`/`>` delimited framing shared by every channel
//! - [`text`]: command/ack/event protocol, server and client roles
//! - [`bridge`]: bus bridge client with acceptance filter registration
//! - [`register`]: register and bootloader protocols (behind `register`)
//! - [`supervisor`]: driver process and revision gate (behind `supervisor`)

/// Re-export transport types.
pub mod transport {
    pub use ctrlbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ctrlbus_frame::*;
}

/// Re-export text protocol types.
pub mod text {
    pub use ctrlbus_text::*;
}

/// Re-export bus bridge types.
pub mod bridge {
    pub use ctrlbus_bridge::*;
}

/// Re-export register protocol types (requires `register` feature).
#[cfg(feature = "register")]
pub mod register {
    pub use ctrlbus_register::*;
}

/// Re-export supervisor types (requires `supervisor` feature).
#[cfg(feature = "supervisor")]
pub mod supervisor {
    pub use ctrlbus_supervisor::*;
}
