use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::codec::{FrameConfig, END, START};

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Splits a byte stream into `<`/`>` bounded frames.
///
/// State carries over between chunks, so a frame may arrive split across any
/// number of reads. The extractor holds no protocol knowledge; frame content
/// is returned untouched.
#[derive(Debug)]
pub struct FrameExtractor {
    buf: BytesMut,
    in_frame: bool,
    max_frame_len: usize,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    /// Create an extractor with default configuration.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    /// Create an extractor with explicit configuration.
    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            in_frame: false,
            max_frame_len: config.max_frame_len,
        }
    }

    /// Lazily yield the frames completed by `chunk`.
    ///
    /// Bytes are consumed as the iterator advances. Bytes the iterator has not
    /// reached when it is dropped are never fed to the extractor.
    pub fn extract<'a>(&'a mut self, chunk: &'a [u8]) -> Frames<'a> {
        Frames {
            extractor: self,
            chunk,
            pos: 0,
        }
    }

    /// Feed one byte; returns a frame when `byte` closes a non-empty one.
    pub fn push_byte(&mut self, byte: u8) -> Option<Bytes> {
        if byte == START {
            if self.in_frame && !self.buf.is_empty() {
                trace!(discarded = self.buf.len(), "frame restarted by start delimiter");
            }
            self.buf.clear();
            self.in_frame = true;
            return None;
        }

        if !self.in_frame {
            return None;
        }

        if byte == END {
            self.in_frame = false;
            if self.buf.is_empty() {
                return None;
            }
            return Some(self.buf.split().freeze());
        }

        if self.buf.len() >= self.max_frame_len {
            debug!(
                max = self.max_frame_len,
                "frame exceeds maximum length; waiting for next start delimiter"
            );
            self.buf.clear();
            self.in_frame = false;
            return None;
        }

        self.buf.put_u8(byte);
        None
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
    }

    /// True while a start delimiter has been seen but no end delimiter yet.
    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    /// Number of bytes accumulated for the current partial frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Iterator returned by [`FrameExtractor::extract`].
pub struct Frames<'a> {
    extractor: &'a mut FrameExtractor,
    chunk: &'a [u8],
    pos: usize,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        while self.pos < self.chunk.len() {
            let byte = self.chunk[self.pos];
            self.pos += 1;
            if let Some(frame) = self.extractor.push_byte(byte) {
                return Some(frame);
            }
        }
        None
    }
}
