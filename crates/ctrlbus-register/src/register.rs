use std::fmt;

use serde::Deserialize;

/// Register list a frame index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    Status,
    Data,
    Param,
}

impl fmt::Display for RegisterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Status => "status",
            Self::Data => "data",
            Self::Param => "param",
        })
    }
}

/// Four content bytes mirrored from the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Register {
    data: [u8; 4],
    valid: bool,
    changed: bool,
}

impl Register {
    /// Store content received from the device. Returns whether it differs
    /// from what was stored before.
    pub fn set(&mut self, data: [u8; 4]) -> bool {
        self.changed = self.data != data;
        self.data = data;
        self.valid = true;
        self.changed
    }

    /// Current content and whether it changed, clearing the change flag.
    pub fn take(&mut self) -> ([u8; 4], bool) {
        let changed = std::mem::take(&mut self.changed);
        (self.data, changed)
    }

    pub fn data(&self) -> [u8; 4] {
        self.data
    }

    /// True once any response has populated the register.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }
}

/// Execution state reported in the command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Executing = 1,
    Executed = 2,
    Error = 3,
    Unassigned = 4,
}

impl TryFrom<u8> for CommandStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Self::Executing),
            2 => Ok(Self::Executed),
            3 => Ok(Self::Error),
            4 => Ok(Self::Unassigned),
            other => Err(other),
        }
    }
}

/// Error code reported in the command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorCode {
    NoError,
    Busy,
    InvalidData,
    NotEnabled,
    NotAvailable,
    WrongStatusCode,
    Aborted,
    /// Codes from 7 upward are defined by each board's application.
    Application(u8),
}

impl From<u8> for CommandErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::NoError,
            1 => Self::Busy,
            2 => Self::InvalidData,
            3 => Self::NotEnabled,
            4 => Self::NotAvailable,
            5 => Self::WrongStatusCode,
            6 => Self::Aborted,
            other => Self::Application(other),
        }
    }
}

impl fmt::Display for CommandErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoError => "NO ERRORS",
            Self::Busy => "COMMAND BUSY",
            Self::InvalidData => "COMMAND INVALID DATA",
            Self::NotEnabled => "COMMAND NOT ENABLED",
            Self::NotAvailable => "COMMAND NOT AVAILABLE",
            Self::WrongStatusCode => "COMMAND WRONG STATUS CODE",
            Self::Aborted => "COMMAND ABORTED",
            Self::Application(_) => "APPLICATION ERROR CODE RANGE",
        })
    }
}

/// The device's command register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandRegister {
    pub command: u8,
    pub status: u8,
    pub b0: u8,
    pub b1: u8,
    pub error: u8,
    valid: bool,
}

impl CommandRegister {
    /// Fill from a response: `idx` is the command code, `d0..d3` are status,
    /// two result bytes and the error code.
    pub fn set(&mut self, command: u8, data: [u8; 4]) {
        self.command = command;
        self.status = data[0];
        self.b0 = data[1];
        self.b1 = data[2];
        self.error = data[3];
        self.valid = true;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Decoded status, or the raw byte if the device sent an unknown one.
    pub fn status(&self) -> Result<CommandStatus, u8> {
        CommandStatus::try_from(self.status)
    }

    pub fn error_code(&self) -> CommandErrorCode {
        CommandErrorCode::from(self.error)
    }
}

/// Major, minor and sub revision numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    pub major: u8,
    pub minor: u8,
    pub sub: u8,
}

impl Revision {
    pub fn new(major: u8, minor: u8, sub: u8) -> Self {
        Self { major, minor, sub }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.sub)
    }
}

/// Number of registers in each list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegisterLayout {
    pub status: usize,
    pub data: usize,
    pub params: usize,
}

impl RegisterLayout {
    pub fn new(status: usize, data: usize, params: usize) -> Self {
        Self {
            status,
            data,
            params,
        }
    }
}

/// Local mirror of every register on one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterBank {
    pub revision: Register,
    pub errors: Register,
    pub command: CommandRegister,
    status: Vec<Register>,
    data: Vec<Register>,
    params: Vec<Register>,
}

impl RegisterBank {
    pub fn new(layout: &RegisterLayout) -> Self {
        Self {
            revision: Register::default(),
            errors: Register::default(),
            command: CommandRegister::default(),
            status: vec![Register::default(); layout.status],
            data: vec![Register::default(); layout.data],
            params: vec![Register::default(); layout.params],
        }
    }

    pub fn list(&self, class: RegisterClass) -> &[Register] {
        match class {
            RegisterClass::Status => &self.status,
            RegisterClass::Data => &self.data,
            RegisterClass::Param => &self.params,
        }
    }

    pub fn list_mut(&mut self, class: RegisterClass) -> &mut [Register] {
        match class {
            RegisterClass::Status => &mut self.status,
            RegisterClass::Data => &mut self.data,
            RegisterClass::Param => &mut self.params,
        }
    }

    pub fn status(&self, idx: u8) -> Option<&Register> {
        self.status.get(usize::from(idx))
    }

    pub fn data(&self, idx: u8) -> Option<&Register> {
        self.data.get(usize::from(idx))
    }

    pub fn param(&self, idx: u8) -> Option<&Register> {
        self.params.get(usize::from(idx))
    }

    /// Device revision as stored in the first three revision bytes.
    pub fn device_revision(&self) -> Option<Revision> {
        self.revision.is_valid().then(|| {
            let d = self.revision.data();
            Revision::new(d[0], d[1], d[2])
        })
    }
}
