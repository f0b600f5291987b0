use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{FrameErrorCause, RegisterError, Result};
use crate::frame::{FrameType, RegisterFrame};
use crate::register::{RegisterBank, RegisterClass, RegisterLayout};
use crate::ABORT_COMMAND;

/// Single outstanding-transaction slot with a response deadline.
///
/// Holds whatever the owner needs to match the response. Taking the
/// transaction out (by response, timeout or cancel) is idempotent.
#[derive(Debug)]
pub struct TransactionSlot<T> {
    timeout: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> TransactionSlot<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Occupy the slot, arming the deadline from `now`.
    pub fn arm(&mut self, value: T, now: Instant) -> Result<()> {
        if self.pending.is_some() {
            return Err(RegisterError::Busy);
        }
        self.pending = Some((value, now + self.timeout));
        Ok(())
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref().map(|(value, _)| value)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    /// Release the slot, disarming the deadline.
    pub fn take(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    /// Release the slot only if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }
}

/// One register access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess {
    ReadRevision,
    ReadErrors,
    ReadCommand,
    ReadStatus(u8),
    ReadData(u8),
    ReadParam(u8),
    WriteData(u8, [u8; 4]),
    WriteParam(u8, [u8; 4]),
    StoreParams,
    ExecCommand { code: u8, params: [u8; 4] },
}

impl RegisterAccess {
    /// Command execution request for code 0, which aborts the running command.
    pub fn abort() -> Self {
        Self::ExecCommand {
            code: ABORT_COMMAND,
            params: [0; 4],
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::ReadRevision => FrameType::ReadRevision,
            Self::ReadErrors => FrameType::ReadErrors,
            Self::ReadCommand => FrameType::ReadCommand,
            Self::ReadStatus(_) => FrameType::ReadStatus,
            Self::ReadData(_) => FrameType::ReadData,
            Self::ReadParam(_) => FrameType::ReadParam,
            Self::WriteData(..) => FrameType::WriteData,
            Self::WriteParam(..) => FrameType::WriteParam,
            Self::StoreParams => FrameType::StoreParams,
            Self::ExecCommand { .. } => FrameType::CommandExec,
        }
    }

    fn idx_and_data(&self) -> (u8, [u8; 4]) {
        match *self {
            Self::ReadStatus(idx) | Self::ReadData(idx) | Self::ReadParam(idx) => (idx, [0; 4]),
            Self::WriteData(idx, data) | Self::WriteParam(idx, data) => (idx, data),
            Self::ExecCommand { code, params } => (code, params),
            Self::ReadRevision | Self::ReadErrors | Self::ReadCommand | Self::StoreParams => {
                (0, [0; 4])
            }
        }
    }
}

/// Final result of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub seq: u8,
    pub access: RegisterAccess,
    pub result: std::result::Result<(), FrameErrorCause>,
}

impl Completion {
    pub fn frame_type(&self) -> FrameType {
        self.access.frame_type()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Why an inbound frame did not touch the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The frame came from another bus address.
    AddressMismatch { expected: u16, received: u16 },
    /// No transaction was waiting.
    Idle,
}

/// What became of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Completed(Completion),
    Discarded(Discard),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u8,
    access: RegisterAccess,
}

/// Transaction state machine for one device.
///
/// `IDLE → begin → AWAITING_RESPONSE → (response | timeout) → IDLE`. Every
/// transaction started with [`begin`](Self::begin) ends with exactly one
/// [`Completion`].
#[derive(Debug)]
pub struct DeviceEngine {
    address: u16,
    seq: u8,
    slot: TransactionSlot<InFlight>,
    registers: RegisterBank,
}

impl DeviceEngine {
    pub fn new(address: u16, layout: &RegisterLayout, timeout: Duration) -> Self {
        Self {
            address,
            seq: 0,
            slot: TransactionSlot::new(timeout),
            registers: RegisterBank::new(layout),
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterBank {
        &mut self.registers
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.deadline()
    }

    /// Start a transaction and return the frame to send.
    pub fn begin(&mut self, access: RegisterAccess, now: Instant) -> Result<RegisterFrame> {
        if self.slot.is_busy() {
            return Err(RegisterError::Busy);
        }
        self.seq = (self.seq % 255) + 1;
        let (idx, data) = access.idx_and_data();
        let frame = RegisterFrame::new(self.seq, access.frame_type(), idx, data);
        self.slot.arm(
            InFlight {
                seq: self.seq,
                access,
            },
            now,
        )?;
        trace!(address = self.address, seq = self.seq, access = ?access, "transaction started");
        Ok(frame)
    }

    /// Drop the outstanding transaction without a completion. Returns whether
    /// one was outstanding.
    pub fn cancel(&mut self) -> bool {
        self.slot.take().is_some()
    }

    /// Complete the outstanding transaction with a timeout if its deadline
    /// has passed.
    pub fn on_timeout(&mut self, now: Instant) -> Option<Completion> {
        let in_flight = self.slot.expire(now)?;
        debug!(address = self.address, seq = in_flight.seq, "register response timed out");
        Some(Completion {
            seq: in_flight.seq,
            access: in_flight.access,
            result: Err(FrameErrorCause::Timeout),
        })
    }

    /// Handle a frame received from bus `address`.
    pub fn on_frame(&mut self, address: u16, payload: &[u8]) -> FrameOutcome {
        if address != self.address {
            return FrameOutcome::Discarded(Discard::AddressMismatch {
                expected: self.address,
                received: address,
            });
        }
        let Some(in_flight) = self.slot.take() else {
            return FrameOutcome::Discarded(Discard::Idle);
        };

        let frame = RegisterFrame::decode(payload);
        let result = if !frame.is_valid() {
            Err(FrameErrorCause::Malformed)
        } else if frame.seq != in_flight.seq {
            Err(FrameErrorCause::SequenceMismatch {
                expected: in_flight.seq,
                received: frame.seq,
            })
        } else {
            self.apply(&frame)
        };

        if let Err(cause) = result {
            debug!(address = self.address, seq = in_flight.seq, %cause, "register transaction failed");
        }
        FrameOutcome::Completed(Completion {
            seq: in_flight.seq,
            access: in_flight.access,
            result,
        })
    }

    fn apply(&mut self, frame: &RegisterFrame) -> std::result::Result<(), FrameErrorCause> {
        let frame_type = frame
            .frame_type()
            .map_err(FrameErrorCause::UnknownFrameType)?;
        let class = match frame_type {
            FrameType::ReadRevision => {
                self.registers.revision.set(frame.data);
                return Ok(());
            }
            FrameType::ReadErrors => {
                self.registers.errors.set(frame.data);
                return Ok(());
            }
            FrameType::ReadCommand | FrameType::CommandExec => {
                self.registers.command.set(frame.idx, frame.data);
                return Ok(());
            }
            FrameType::StoreParams => return Ok(()),
            FrameType::ReadStatus => RegisterClass::Status,
            FrameType::ReadData | FrameType::WriteData => RegisterClass::Data,
            FrameType::ReadParam | FrameType::WriteParam => RegisterClass::Param,
        };

        let list = self.registers.list_mut(class);
        let len = list.len();
        let register = list
            .get_mut(usize::from(frame.idx))
            .ok_or(FrameErrorCause::IndexOutOfRange {
                class,
                idx: frame.idx,
                len,
            })?;
        register.set(frame.data);
        Ok(())
    }
}
