use std::net::SocketAddr;
use std::time::Duration;

use ctrlbus_bridge::{AcceptanceFilter, BridgeClient, BridgeConfig, BridgeEvent, BridgeEvents, BridgeHandle};
use ctrlbus_transport::config::millis;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, trace};

use crate::bootloader::{BootloaderConfig, BootloaderProtocol};
use crate::engine::{Completion, DeviceEngine, FrameOutcome, RegisterAccess};
use crate::error::{FrameErrorCause, RegisterError, Result};
use crate::register::{CommandRegister, Register, RegisterBank, RegisterClass, RegisterLayout};
use crate::DEVICE_BASE_ADDRESS;

/// Default bound on waiting for a register response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Device protocol configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Board identifier; bus addresses are derived from it.
    pub device_id: u8,
    pub layout: RegisterLayout,
    /// How long a register access may wait for its response. Default: 100 ms.
    #[serde(with = "millis")]
    pub response_timeout: Duration,
    /// Bridge connection settings shared by the device and bootloader
    /// connections. The acceptance filter is set per connection.
    pub bridge: BridgeConfig,
    pub bootloader: BootloaderConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            layout: RegisterLayout::default(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            bridge: BridgeConfig::default(),
            bootloader: BootloaderConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Bus address of the application firmware.
    pub fn device_address(&self) -> u16 {
        DEVICE_BASE_ADDRESS + u16::from(self.device_id)
    }
}

/// Notifications from a [`DeviceProtocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Completed(Completion),
    Connected(bool),
    FilterOpen,
}

/// Register protocol for one board, driven over the bus bridge.
///
/// The board's bootloader is reached through [`bootloader`](Self::bootloader),
/// which runs over its own bridge connection.
pub struct DeviceProtocol {
    engine: DeviceEngine,
    bridge: BridgeHandle,
    events: BridgeEvents,
    bootloader: BootloaderProtocol,
}

impl DeviceProtocol {
    /// Connect the device and bootloader to the bridge at `addr`.
    pub fn connect(addr: SocketAddr, config: &DeviceConfig) -> Self {
        let address = config.device_address();
        let (bridge, events) = BridgeClient::spawn(
            addr,
            config
                .bridge
                .clone()
                .with_filter(AcceptanceFilter::exact(address)),
        );
        let bootloader = BootloaderProtocol::connect(
            addr,
            config.device_id,
            &config.bootloader,
            config.bridge.clone(),
        );
        info!(address, "device protocol started");
        Self {
            engine: DeviceEngine::new(address, &config.layout, config.response_timeout),
            bridge,
            events,
            bootloader,
        }
    }

    pub fn engine(&self) -> &DeviceEngine {
        &self.engine
    }

    pub fn registers(&self) -> &RegisterBank {
        self.engine.registers()
    }

    pub fn registers_mut(&mut self) -> &mut RegisterBank {
        self.engine.registers_mut()
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn bootloader(&mut self) -> &mut BootloaderProtocol {
        &mut self.bootloader
    }

    pub fn is_busy(&self) -> bool {
        self.engine.is_busy()
    }

    /// Start a register access without waiting. The result arrives through
    /// [`next_event`](Self::next_event).
    pub fn request(&mut self, access: RegisterAccess) -> Result<()> {
        let frame = self.engine.begin(access, Instant::now())?;
        if let Err(err) = self.bridge.send(self.engine.address(), &frame.encode()) {
            self.engine.cancel();
            return Err(err.into());
        }
        Ok(())
    }

    /// Wait for the next completion or connection change.
    ///
    /// Returns `None` once the bridge connection task has stopped.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        loop {
            let deadline = self.engine.deadline();
            tokio::select! {
                event = self.events.recv() => match event? {
                    BridgeEvent::Frame(frame) => match self.engine.on_frame(frame.address, &frame.payload) {
                        FrameOutcome::Completed(done) => return Some(DeviceEvent::Completed(done)),
                        FrameOutcome::Discarded(reason) => {
                            trace!(address = self.engine.address(), ?reason, "register frame discarded");
                        }
                    },
                    BridgeEvent::Connected(up) => return Some(DeviceEvent::Connected(up)),
                    BridgeEvent::FilterOpen => return Some(DeviceEvent::FilterOpen),
                },
                _ = sleep_until_opt(deadline) => {
                    if let Some(done) = self.engine.on_timeout(Instant::now()) {
                        return Some(DeviceEvent::Completed(done));
                    }
                }
            }
        }
    }

    /// Run one access to completion.
    ///
    /// Connection notifications arriving meanwhile are consumed.
    pub async fn transact(&mut self, access: RegisterAccess) -> Result<Completion> {
        self.request(access)?;
        loop {
            match self.next_event().await {
                Some(DeviceEvent::Completed(done)) => {
                    done.result?;
                    return Ok(done);
                }
                Some(_) => continue,
                None => return Err(RegisterError::Closed),
            }
        }
    }

    pub async fn read_revision(&mut self) -> Result<Register> {
        self.transact(RegisterAccess::ReadRevision).await?;
        Ok(self.registers().revision)
    }

    pub async fn read_errors(&mut self) -> Result<Register> {
        self.transact(RegisterAccess::ReadErrors).await?;
        Ok(self.registers().errors)
    }

    pub async fn read_command(&mut self) -> Result<CommandRegister> {
        self.transact(RegisterAccess::ReadCommand).await?;
        Ok(self.registers().command)
    }

    pub async fn read_status(&mut self, idx: u8) -> Result<Register> {
        self.transact(RegisterAccess::ReadStatus(idx)).await?;
        self.indexed(RegisterClass::Status, idx)
    }

    pub async fn read_data(&mut self, idx: u8) -> Result<Register> {
        self.transact(RegisterAccess::ReadData(idx)).await?;
        self.indexed(RegisterClass::Data, idx)
    }

    pub async fn read_param(&mut self, idx: u8) -> Result<Register> {
        self.transact(RegisterAccess::ReadParam(idx)).await?;
        self.indexed(RegisterClass::Param, idx)
    }

    pub async fn write_data(&mut self, idx: u8, data: [u8; 4]) -> Result<Register> {
        self.transact(RegisterAccess::WriteData(idx, data)).await?;
        self.indexed(RegisterClass::Data, idx)
    }

    pub async fn write_param(&mut self, idx: u8, data: [u8; 4]) -> Result<Register> {
        self.transact(RegisterAccess::WriteParam(idx, data)).await?;
        self.indexed(RegisterClass::Param, idx)
    }

    /// Ask the board to persist its parameters.
    pub async fn store_params(&mut self) -> Result<()> {
        self.transact(RegisterAccess::StoreParams).await?;
        Ok(())
    }

    pub async fn exec_command(&mut self, code: u8, params: [u8; 4]) -> Result<CommandRegister> {
        self.transact(RegisterAccess::ExecCommand { code, params })
            .await?;
        Ok(self.registers().command)
    }

    pub async fn abort_command(&mut self) -> Result<CommandRegister> {
        self.transact(RegisterAccess::abort()).await?;
        Ok(self.registers().command)
    }

    /// Stop both bridge connections.
    pub fn shutdown(&self) {
        self.bridge.shutdown();
        self.bootloader.shutdown();
    }

    fn indexed(&self, class: RegisterClass, idx: u8) -> Result<Register> {
        let list = self.registers().list(class);
        list.get(usize::from(idx)).copied().ok_or(RegisterError::Failed(
            FrameErrorCause::IndexOutOfRange {
                class,
                idx,
                len: list.len(),
            },
        ))
    }
}

pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
