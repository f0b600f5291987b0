//! Delimiter-bounded framing for ctrlbus byte streams.
//!
//! Every ctrlbus wire format wraps its messages the same way:
//! - a start delimiter (`<`)
//! - the frame content
//! - an end delimiter (`>`)
//!
//! Bytes outside a frame are ignored, empty frames are dropped, and a start
//! delimiter inside a frame restarts it. The last rule lets a reader recover
//! from a truncated frame without any explicit resynchronization.

pub mod codec;
pub mod error;
pub mod extractor;

pub use codec::{encode_frame, DelimitedCodec, FrameConfig, DEFAULT_MAX_FRAME_LEN, END, START};
pub use error::{FrameError, Result};
pub use extractor::{FrameExtractor, Frames};
