
use bytes::BytesMut;
use ctrlbus_frame::encode_frame;

use crate::error::{BridgeError, Result};
use crate::filter::AcceptanceFilter;

/// Maximum number of data bytes in one bus frame.
pub const MAX_PAYLOAD: usize = 8;

/// A data frame exchanged with the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    pub address: u16,
    pub payload: Vec<u8>,
}

impl BusFrame {
    /// Build a frame, rejecting payloads longer than [`MAX_PAYLOAD`].
    pub fn new(address: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(BridgeError::PayloadTooLong { len: payload.len() });
        }
        Ok(Self {
            address,
            payload: payload.to_vec(),
        })
    }
}

/// Why an inbound bridge frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown bridge frame tag")]
    UnknownTag,

    #[error("missing or invalid {0}")]
    InvalidField(&'static str),

    #[error("data frame without payload")]
    EmptyPayload,
}

/// A bridge protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    /// `F mask address`: filter registration, and its echo.
    Filter(AcceptanceFilter),
    /// `D address b0 ... b7`
    Data(BusFrame),
}

impl BridgeMessage {
    /// Parse frame content (delimiters already stripped).
    ///
    /// Numbers are decimal, or hexadecimal when the token contains an `x`.
    /// Data byte values are truncated to 8 bits; collection stops at the first
    /// token that is not a number or after [`MAX_PAYLOAD`] bytes.
    pub fn parse(frame: &[u8]) -> std::result::Result<Self, WireError> {
        let text = std::str::from_utf8(frame).map_err(|_| WireError::UnknownTag)?;
        let mut tokens = text.split_ascii_whitespace();

        match tokens.next() {
            Some("F") => {
                let mask = tokens
                    .next()
                    .and_then(parse_number)
                    .ok_or(WireError::InvalidField("mask"))?;
                let address = tokens
                    .next()
                    .and_then(parse_number)
                    .ok_or(WireError::InvalidField("address"))?;
                Ok(Self::Filter(AcceptanceFilter::new(mask, address)))
            }
            Some("D") => {
                let address = tokens
                    .next()
                    .and_then(parse_number)
                    .ok_or(WireError::InvalidField("address"))?;
                let payload: Vec<u8> = tokens
                    .map_while(parse_number)
                    .take(MAX_PAYLOAD)
                    .map(|value| (value & 0xFF) as u8)
                    .collect();
                if payload.is_empty() {
                    return Err(WireError::EmptyPayload);
                }
                Ok(Self::Data(BusFrame { address, payload }))
            }
            _ => Err(WireError::UnknownTag),
        }
    }

    /// Encode as a wire frame. Numbers are written in decimal.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let content = match self {
            Self::Filter(filter) => format!("F {} {}", filter.mask, filter.address),
            Self::Data(frame) => {
                if frame.payload.len() > MAX_PAYLOAD {
                    return Err(BridgeError::PayloadTooLong {
                        len: frame.payload.len(),
                    });
                }
                std::iter::once(format!("D {}", frame.address))
                    .chain(frame.payload.iter().map(u8::to_string))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };
        encode_frame(content.as_bytes(), &[], dst)?;
        Ok(())
    }
}

fn parse_number(token: &str) -> Option<u16> {
    if token.contains(['x', 'X']) {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        u16::from_str_radix(digits, 16).ok()
    } else {
        token.parse().ok()
    }
}
