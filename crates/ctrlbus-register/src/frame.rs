use std::fmt;

/// Size of every register protocol frame.
pub const FRAME_LEN: usize = 8;

/// Register access kind, byte 1 of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    ReadRevision = 1,
    ReadErrors = 2,
    ReadCommand = 3,
    ReadStatus = 4,
    ReadData = 5,
    ReadParam = 6,
    WriteData = 7,
    WriteParam = 8,
    StoreParams = 9,
    CommandExec = 10,
}

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => Self::ReadRevision,
            2 => Self::ReadErrors,
            3 => Self::ReadCommand,
            4 => Self::ReadStatus,
            5 => Self::ReadData,
            6 => Self::ReadParam,
            7 => Self::WriteData,
            8 => Self::WriteParam,
            9 => Self::StoreParams,
            10 => Self::CommandExec,
            other => return Err(other),
        })
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadRevision => "READ_REVISION",
            Self::ReadErrors => "READ_ERRORS",
            Self::ReadCommand => "READ_COMMAND",
            Self::ReadStatus => "READ_STATUS",
            Self::ReadData => "READ_DATA",
            Self::ReadParam => "READ_PARAM",
            Self::WriteData => "WRITE_DATA",
            Self::WriteParam => "WRITE_PARAM",
            Self::StoreParams => "STORE_PARAMS",
            Self::CommandExec => "COMMAND_EXEC",
        };
        f.write_str(name)
    }
}

/// XOR of all bytes in `bytes`.
pub fn crc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// One register protocol frame.
///
/// `frame_type` is kept as a raw byte so that responses with unknown types
/// still decode and can be reported.
///
/// Wire format:
/// ```text
/// ┌─────┬──────┬─────┬────┬────┬────┬────┬─────┐
/// │ seq │ type │ idx │ d0 │ d1 │ d2 │ d3 │ crc │
/// └─────┴──────┴─────┴────┴────┴────┴────┴─────┘
///   crc = seq ^ type ^ idx ^ d0 ^ d1 ^ d2 ^ d3
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFrame {
    pub seq: u8,
    pub frame_type: u8,
    pub idx: u8,
    pub data: [u8; 4],
}

impl RegisterFrame {
    pub fn new(seq: u8, frame_type: FrameType, idx: u8, data: [u8; 4]) -> Self {
        Self {
            seq,
            frame_type: frame_type.as_u8(),
            idx,
            data,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [
            self.seq,
            self.frame_type,
            self.idx,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
            0,
        ];
        out[7] = crc(&out[..7]);
        out
    }

    /// Decode a frame. A wrong length or checksum yields a frame with
    /// `seq == 0`, which never matches a transaction.
    pub fn decode(bytes: &[u8]) -> Self {
        if bytes.len() != FRAME_LEN || crc(&bytes[..7]) != bytes[7] {
            return Self::default();
        }
        Self {
            seq: bytes[0],
            frame_type: bytes[1],
            idx: bytes[2],
            data: [bytes[3], bytes[4], bytes[5], bytes[6]],
        }
    }

    /// False for the decode failure sentinel.
    pub fn is_valid(&self) -> bool {
        self.seq != 0
    }

    pub fn frame_type(&self) -> Result<FrameType, u8> {
        FrameType::try_from(self.frame_type)
    }
}
