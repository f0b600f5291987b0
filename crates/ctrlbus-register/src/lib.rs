//! Binary register protocol for bus-attached boards.
//!
//! A board exposes fixed-size registers (status, data, parameters, a command
//! register, revision and error registers). Each access is one 8-byte frame
//! `[seq, type, idx, d0, d1, d2, d3, crc]` sent through the bus bridge and
//! answered by the board with the same layout.
//!
//! Only one transaction may be outstanding per device. [`DeviceEngine`] and
//! [`BootloaderEngine`] hold the transaction state and never touch a socket;
//! [`DeviceProtocol`] and [`BootloaderProtocol`] drive them over a bridge
//! connection.

pub mod bootloader;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod register;

pub use bootloader::{
    BootloaderCommand, BootloaderCompletion, BootloaderConfig, BootloaderEngine, BootloaderEvent,
    BootloaderInfo, BootloaderOutcome, BootloaderProtocol, BootloaderReply, BootloaderStatus,
};
pub use device::{DeviceConfig, DeviceEvent, DeviceProtocol, DEFAULT_RESPONSE_TIMEOUT};
pub use engine::{Completion, Discard, DeviceEngine, FrameOutcome, RegisterAccess, TransactionSlot};
pub use error::{FrameErrorCause, RegisterError, Result};
pub use frame::{crc, FrameType, RegisterFrame, FRAME_LEN};
pub use register::{
    CommandErrorCode, CommandRegister, CommandStatus, Register, RegisterBank, RegisterClass,
    RegisterLayout, Revision,
};

/// Bus address of device `id`'s application firmware.
pub const DEVICE_BASE_ADDRESS: u16 = 0x200;

/// Bus address of device `id`'s bootloader.
pub const BOOTLOADER_BASE_ADDRESS: u16 = 0x100;

/// Command code that aborts the running command.
pub const ABORT_COMMAND: u8 = 0;
