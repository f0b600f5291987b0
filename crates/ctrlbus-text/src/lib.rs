//! Sequence-correlated ASCII command protocol.
//!
//! Three frame shapes travel between an application and its driver
//! processes, each wrapped in `<`/`>`:
//! - `C seq name params...`: a command, sent by a client
//! - `A seq name OK|NOK code params...`: the acknowledge, sent only to the
//!   client that issued the command
//! - `E name params...`: an event, broadcast to every connected client
//!
//! [`CommandServer`] is the driver side; [`CommandClient`] is the
//! application side.

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use client::{ClientConfig, ClientEvent, ClientEvents, ClientStatus, CommandClient};
pub use error::{Result, TextError};
pub use message::{Ack, AckStatus, Command, Event, Message, ParseError, TRAILER};
pub use server::{
    CommandHandler, CommandReply, CommandServer, EndpointId, EventSender, ServerConfig,
    ServerHandle,
};
