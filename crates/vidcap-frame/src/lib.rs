//! Native-messaging framing for browser-extension hosts.
//!
//! Every message on the channel is framed as:
//! - A 4-byte payload length in the platform's native byte order
//! - Exactly that many bytes of UTF-8 encoded JSON
//!
//! Readers hand back complete payloads only; writers emit each frame in one
//! buffered write followed by a flush.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_INBOUND, DEFAULT_MAX_OUTBOUND,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
