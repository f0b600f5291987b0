use std::fmt;

use bytes::BytesMut;
use ctrlbus_frame::encode_frame;

use crate::error::{Result, TextError};

/// Readability trailer appended after every text frame.
pub const TRAILER: &[u8] = b"\n\r";

const COMMAND_TAG: &str = "C";
const ACK_TAG: &str = "A";
const EVENT_TAG: &str = "E";

/// Reasons a frame is not a valid text protocol message.
///
/// Receivers drop such frames; the variants exist for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("empty frame")]
    Empty,

    #[error("unknown message tag {0:?}")]
    UnknownTag(String),

    #[error("{tag} frame needs at least {needed} tokens, got {got}")]
    TooShort {
        tag: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("invalid sequence number {0:?}")]
    InvalidSeq(String),

    #[error("invalid acknowledge status {0:?}")]
    InvalidStatus(String),

    #[error("invalid result code {0:?}")]
    InvalidCode(String),
}

/// Outcome carried by an acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Nok,
}

impl AckStatus {
    /// `OK` for code 0, `NOK` for anything else.
    pub fn from_code(code: u32) -> Self {
        if code == 0 {
            Self::Ok
        } else {
            Self::Nok
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Nok => "NOK",
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `C seq name params...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: u16,
    pub name: String,
    pub params: Vec<String>,
}

/// `A seq name OK|NOK code params...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub seq: u16,
    pub name: String,
    pub status: AckStatus,
    pub code: u32,
    pub params: Vec<String>,
}

impl Ack {
    /// Build the acknowledge for `command` with the handler's result.
    pub fn reply_to(command: &Command, code: u32, params: Vec<String>) -> Self {
        Self {
            seq: command.seq,
            name: command.name.clone(),
            status: AckStatus::from_code(code),
            code,
            params,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

/// `E name params...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub params: Vec<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A parsed text protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Ack(Ack),
    Event(Event),
}

impl Message {
    /// Parse frame content (delimiters already stripped).
    pub fn parse(frame: &[u8]) -> std::result::Result<Self, ParseError> {
        let text = std::str::from_utf8(frame).map_err(|_| ParseError::NotUtf8)?;
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        let Some(&tag) = tokens.first() else {
            return Err(ParseError::Empty);
        };

        match tag {
            COMMAND_TAG => {
                require(COMMAND_TAG, &tokens, 3)?;
                Ok(Self::Command(Command {
                    seq: parse_seq(tokens[1])?,
                    name: tokens[2].to_string(),
                    params: owned(&tokens[3..]),
                }))
            }
            ACK_TAG => {
                require(ACK_TAG, &tokens, 5)?;
                let status = match tokens[3] {
                    "OK" => AckStatus::Ok,
                    "NOK" => AckStatus::Nok,
                    other => return Err(ParseError::InvalidStatus(other.to_string())),
                };
                let code = tokens[4]
                    .parse()
                    .map_err(|_| ParseError::InvalidCode(tokens[4].to_string()))?;
                Ok(Self::Ack(Ack {
                    seq: parse_seq(tokens[1])?,
                    name: tokens[2].to_string(),
                    status,
                    code,
                    params: owned(&tokens[5..]),
                }))
            }
            EVENT_TAG => {
                require(EVENT_TAG, &tokens, 2)?;
                Ok(Self::Event(Event {
                    name: tokens[1].to_string(),
                    params: owned(&tokens[2..]),
                }))
            }
            other => Err(ParseError::UnknownTag(other.to_string())),
        }
    }

    /// Encode as a complete wire frame with the readability trailer.
    ///
    /// Fails if a name or parameter is empty or contains whitespace, since it
    /// would not survive tokenisation on the receiving side.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        self.check_tokens()?;
        encode_frame(self.to_string().as_bytes(), TRAILER, dst)?;
        Ok(())
    }

    fn check_tokens(&self) -> Result<()> {
        let (name, params) = match self {
            Self::Command(c) => (&c.name, &c.params),
            Self::Ack(a) => (&a.name, &a.params),
            Self::Event(e) => (&e.name, &e.params),
        };
        for token in std::iter::once(name).chain(params.iter()) {
            if token.is_empty() || token.chars().any(char::is_whitespace) {
                return Err(TextError::InvalidToken(token.clone()));
            }
        }
        Ok(())
    }
}

/// Frame content without delimiters, e.g. `A 1 GetRevision OK 0 2 5 1`.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = match self {
            Self::Command(c) => {
                write!(f, "{COMMAND_TAG} {} {}", c.seq, c.name)?;
                &c.params
            }
            Self::Ack(a) => {
                write!(f, "{ACK_TAG} {} {} {} {}", a.seq, a.name, a.status, a.code)?;
                &a.params
            }
            Self::Event(e) => {
                write!(f, "{EVENT_TAG} {}", e.name)?;
                &e.params
            }
        };
        for param in params {
            write!(f, " {param}")?;
        }
        Ok(())
    }
}

fn require(tag: &'static str, tokens: &[&str], needed: usize) -> std::result::Result<(), ParseError> {
    if tokens.len() < needed {
        return Err(ParseError::TooShort {
            tag,
            needed,
            got: tokens.len(),
        });
    }
    Ok(())
}

fn parse_seq(token: &str) -> std::result::Result<u16, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidSeq(token.to_string()))
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}
