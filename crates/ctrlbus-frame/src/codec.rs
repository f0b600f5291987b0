use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::extractor::FrameExtractor;

/// Start delimiter: `<`.
pub const START: u8 = b'<';

/// End delimiter: `>`.
pub const END: u8 = b'>';

/// Default maximum frame content size: 4 KiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Maximum frame content size in bytes. Default: 4 KiB.
    pub max_frame_len: usize,
    /// Bytes appended after the end delimiter on encode.
    ///
    /// Readers never parse the trailer; it only makes the stream readable
    /// from a terminal.
    pub trailer: Vec<u8>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            trailer: Vec::new(),
        }
    }
}

impl FrameConfig {
    /// Configuration with a readability trailer.
    pub fn with_trailer(mut self, trailer: &[u8]) -> Self {
        self.trailer = trailer.to_vec();
        self
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────┬──────────────────────┬─────┬──────────────────┐
/// │ '<' │ content (no < or >)  │ '>' │ trailer (opt.)   │
/// └─────┴──────────────────────┴─────┴──────────────────┘
/// ```
pub fn encode_frame(content: &[u8], trailer: &[u8], dst: &mut BytesMut) -> Result<()> {
    if let Some(&byte) = content.iter().find(|&&b| b == START || b == END) {
        return Err(FrameError::DelimiterInPayload(byte));
    }
    dst.reserve(content.len() + 2 + trailer.len());
    dst.put_u8(START);
    dst.put_slice(content);
    dst.put_u8(END);
    dst.put_slice(trailer);
    Ok(())
}

/// `tokio_util` codec over [`FrameExtractor`].
///
/// Decoding yields frame content without delimiters. Encoding wraps content
/// with delimiters and the configured trailer.
#[derive(Debug)]
pub struct DelimitedCodec {
    extractor: FrameExtractor,
    config: FrameConfig,
}

impl Default for DelimitedCodec {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

impl DelimitedCodec {
    /// Create a codec with explicit configuration.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            extractor: FrameExtractor::with_config(&config),
            config,
        }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for DelimitedCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let mut consumed = src.len();
        let mut frame = None;
        for (i, &byte) in src.iter().enumerate() {
            if let Some(found) = self.extractor.push_byte(byte) {
                consumed = i + 1;
                frame = Some(found);
                break;
            }
        }
        // Everything up to `consumed` now lives in the extractor state.
        src.advance(consumed);
        Ok(frame)
    }
}

impl Encoder<Bytes> for DelimitedCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.config.max_frame_len {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.config.max_frame_len,
            });
        }
        encode_frame(&item, &self.config.trailer, dst)
    }
}
