use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use ctrlbus_bridge::{AcceptanceFilter, BridgeClient, BridgeConfig, BridgeEvent, BridgeEvents, BridgeHandle};
use ctrlbus_transport::config::millis;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::engine::{Discard, TransactionSlot};
use crate::error::{FrameErrorCause, RegisterError, Result};
use crate::frame::FRAME_LEN;
use crate::register::Revision;
use crate::BOOTLOADER_BASE_ADDRESS;

/// Default bound on waiting for a bootloader response.
pub const DEFAULT_BOOTLOADER_TIMEOUT: Duration = Duration::from_secs(5);

/// First byte of a bootloader error response.
const ERROR_MARKER: u8 = 0xFF;

/// Bootloader configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
    /// How long a command may wait for its response. Default: 5 s.
    #[serde(with = "millis")]
    pub response_timeout: Duration,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_BOOTLOADER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BootloaderCommand {
    GetInfo = 1,
    Start = 2,
    Exit = 3,
}

impl BootloaderCommand {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for BootloaderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GetInfo => "GET_INFO",
            Self::Start => "START",
            Self::Exit => "EXIT",
        })
    }
}

/// Whether the board has a bootloader and whether it is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderStatus {
    NotPresent,
    NotRunning,
    Running,
}

impl BootloaderStatus {
    /// Decode the status byte. Unknown values are treated as not running.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::NotPresent,
            2 => Self::Running,
            _ => Self::NotRunning,
        }
    }

    pub fn is_present(self) -> bool {
        self != Self::NotPresent
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for BootloaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotPresent => "not present",
            Self::NotRunning => "not running",
            Self::Running => "running",
        })
    }
}

/// Content of a `GET_INFO` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderInfo {
    pub status: BootloaderStatus,
    /// Bootloader firmware revision.
    pub boot: Revision,
    /// Application firmware revision.
    pub app: Revision,
}

impl BootloaderInfo {
    fn from_response(bytes: &[u8; FRAME_LEN]) -> Self {
        Self {
            status: BootloaderStatus::from_byte(bytes[1]),
            boot: Revision::new(bytes[2], bytes[3], bytes[4]),
            app: Revision::new(bytes[5], bytes[6], bytes[7]),
        }
    }
}

/// A successfully received bootloader response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderReply {
    Info(BootloaderInfo),
    /// Positive answer to `START` or `EXIT`; the raw response bytes.
    Done([u8; FRAME_LEN]),
    /// The bootloader refused the command.
    Error { command: u8, code: u8 },
}

/// Final result of one bootloader command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderCompletion {
    pub command: BootloaderCommand,
    pub result: std::result::Result<BootloaderReply, FrameErrorCause>,
}

/// What became of an inbound bootloader frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderOutcome {
    Completed(BootloaderCompletion),
    Discarded(Discard),
}

/// Transaction state machine for one board's bootloader.
///
/// Requests are `[command, d0..d6]` with no sequence number or checksum,
/// so at most one command can be matched at a time.
#[derive(Debug)]
pub struct BootloaderEngine {
    address: u16,
    slot: TransactionSlot<BootloaderCommand>,
    info: Option<BootloaderInfo>,
}

impl BootloaderEngine {
    pub fn new(address: u16, timeout: Duration) -> Self {
        Self {
            address,
            slot: TransactionSlot::new(timeout),
            info: None,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.deadline()
    }

    /// Last successfully received `GET_INFO` content.
    pub fn info(&self) -> Option<BootloaderInfo> {
        self.info
    }

    /// Start a command and return the frame to send.
    pub fn begin(
        &mut self,
        command: BootloaderCommand,
        data: [u8; 7],
        now: Instant,
    ) -> Result<[u8; FRAME_LEN]> {
        self.slot.arm(command, now)?;
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = command.as_u8();
        frame[1..].copy_from_slice(&data);
        trace!(address = self.address, %command, "bootloader command started");
        Ok(frame)
    }

    pub fn cancel(&mut self) -> bool {
        self.slot.take().is_some()
    }

    pub fn on_timeout(&mut self, now: Instant) -> Option<BootloaderCompletion> {
        let command = self.slot.expire(now)?;
        debug!(address = self.address, %command, "bootloader response timed out");
        Some(BootloaderCompletion {
            command,
            result: Err(FrameErrorCause::Timeout),
        })
    }

    pub fn on_frame(&mut self, address: u16, payload: &[u8]) -> BootloaderOutcome {
        if address != self.address {
            return BootloaderOutcome::Discarded(Discard::AddressMismatch {
                expected: self.address,
                received: address,
            });
        }
        let Some(command) = self.slot.take() else {
            return BootloaderOutcome::Discarded(Discard::Idle);
        };

        let result = self.interpret(command, payload);
        if let Err(cause) = result {
            debug!(address = self.address, %command, %cause, "bootloader command failed");
        }
        BootloaderOutcome::Completed(BootloaderCompletion { command, result })
    }

    fn interpret(
        &mut self,
        command: BootloaderCommand,
        payload: &[u8],
    ) -> std::result::Result<BootloaderReply, FrameErrorCause> {
        let bytes: &[u8; FRAME_LEN] = payload
            .try_into()
            .map_err(|_| FrameErrorCause::Malformed)?;
        let expected = command.as_u8();

        if bytes[0] == ERROR_MARKER {
            if bytes[1] != expected {
                return Err(FrameErrorCause::CommandMismatch {
                    expected,
                    received: bytes[1],
                });
            }
            return Ok(BootloaderReply::Error {
                command: bytes[1],
                code: bytes[2],
            });
        }
        if bytes[0] != expected {
            return Err(FrameErrorCause::CommandMismatch {
                expected,
                received: bytes[0],
            });
        }

        match command {
            BootloaderCommand::GetInfo => {
                let info = BootloaderInfo::from_response(bytes);
                self.info = Some(info);
                Ok(BootloaderReply::Info(info))
            }
            BootloaderCommand::Start | BootloaderCommand::Exit => Ok(BootloaderReply::Done(*bytes)),
        }
    }
}

/// Notifications from a [`BootloaderProtocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderEvent {
    Completed(BootloaderCompletion),
    Connected(bool),
    FilterOpen,
}

/// Bootloader engine driven over its own bridge connection.
pub struct BootloaderProtocol {
    engine: BootloaderEngine,
    bridge: BridgeHandle,
    events: BridgeEvents,
}

impl BootloaderProtocol {
    /// Connect to the bridge at `addr` for board `device_id`.
    ///
    /// The bridge filter in `bridge` is replaced with an exact match on the
    /// bootloader address.
    pub fn connect(
        addr: SocketAddr,
        device_id: u8,
        config: &BootloaderConfig,
        bridge: BridgeConfig,
    ) -> Self {
        let address = BOOTLOADER_BASE_ADDRESS + u16::from(device_id);
        let (handle, events) =
            BridgeClient::spawn(addr, bridge.with_filter(AcceptanceFilter::exact(address)));
        info!(address, "bootloader protocol started");
        Self {
            engine: BootloaderEngine::new(address, config.response_timeout),
            bridge: handle,
            events,
        }
    }

    pub fn engine(&self) -> &BootloaderEngine {
        &self.engine
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn is_busy(&self) -> bool {
        self.engine.is_busy()
    }

    /// Send a command without waiting. The result arrives through
    /// [`next_event`](Self::next_event).
    pub fn request(&mut self, command: BootloaderCommand, data: [u8; 7]) -> Result<()> {
        let frame = self.engine.begin(command, data, Instant::now())?;
        if let Err(err) = self.bridge.send(self.engine.address(), &frame) {
            self.engine.cancel();
            return Err(err.into());
        }
        Ok(())
    }

    /// Wait for the next completion or connection change.
    ///
    /// Returns `None` once the bridge connection task has stopped.
    pub async fn next_event(&mut self) -> Option<BootloaderEvent> {
        loop {
            let deadline = self.engine.deadline();
            tokio::select! {
                event = self.events.recv() => match event? {
                    BridgeEvent::Frame(frame) => match self.engine.on_frame(frame.address, &frame.payload) {
                        BootloaderOutcome::Completed(done) => return Some(BootloaderEvent::Completed(done)),
                        BootloaderOutcome::Discarded(reason) => {
                            trace!(address = self.engine.address(), ?reason, "bootloader frame discarded");
                        }
                    },
                    BridgeEvent::Connected(up) => return Some(BootloaderEvent::Connected(up)),
                    BridgeEvent::FilterOpen => return Some(BootloaderEvent::FilterOpen),
                },
                _ = crate::device::sleep_until_opt(deadline) => {
                    if let Some(done) = self.engine.on_timeout(Instant::now()) {
                        return Some(BootloaderEvent::Completed(done));
                    }
                }
            }
        }
    }

    /// Send a command and wait for its completion.
    ///
    /// Connection notifications arriving meanwhile are consumed.
    pub async fn transact(
        &mut self,
        command: BootloaderCommand,
        data: [u8; 7],
    ) -> Result<BootloaderReply> {
        self.request(command, data)?;
        loop {
            match self.next_event().await {
                Some(BootloaderEvent::Completed(done)) => return Ok(done.result?),
                Some(_) => continue,
                None => return Err(RegisterError::Closed),
            }
        }
    }

    /// Query bootloader presence and firmware revisions.
    pub async fn get_info(&mut self) -> Result<BootloaderInfo> {
        match self.transact(BootloaderCommand::GetInfo, [0; 7]).await? {
            BootloaderReply::Info(info) => Ok(info),
            BootloaderReply::Error { command, code } => {
                Err(RegisterError::BootloaderRejected { command, code })
            }
            BootloaderReply::Done(bytes) => Err(RegisterError::Failed(
                FrameErrorCause::CommandMismatch {
                    expected: BootloaderCommand::GetInfo.as_u8(),
                    received: bytes[0],
                },
            )),
        }
    }

    pub async fn start(&mut self) -> Result<BootloaderReply> {
        self.transact(BootloaderCommand::Start, [0; 7]).await
    }

    pub async fn exit(&mut self) -> Result<BootloaderReply> {
        self.transact(BootloaderCommand::Exit, [0; 7]).await
    }

    pub fn info(&self) -> Option<BootloaderInfo> {
        self.engine.info()
    }

    pub fn shutdown(&self) {
        self.bridge.shutdown();
    }
}
