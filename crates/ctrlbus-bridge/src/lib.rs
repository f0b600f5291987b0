//! Client for the bus bridge process.
//!
//! The bridge relays raw bus frames over a local TCP socket. A client first
//! registers an acceptance filter (`<F mask address>`) and repeats it until
//! the bridge echoes it back; from then on it exchanges data frames
//! (`<D address b0 ... b7>`) with the bus.

pub mod client;
pub mod error;
pub mod filter;
pub mod wire;

pub use client::{BridgeClient, BridgeConfig, BridgeEvent, BridgeEvents, BridgeHandle, BridgeStatus};
pub use error::{BridgeError, Result};
pub use filter::AcceptanceFilter;
pub use wire::{BridgeMessage, BusFrame, WireError, MAX_PAYLOAD};
