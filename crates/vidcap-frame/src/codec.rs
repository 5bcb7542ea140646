use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: payload length as a native-endian `u32`.
pub const HEADER_SIZE: usize = 4;

/// Default maximum inbound payload: 64 MiB, the most a browser sends to a host.
pub const DEFAULT_MAX_INBOUND: usize = 64 * 1024 * 1024;

/// Default maximum outbound payload: 1 MiB, the most a browser accepts from a host.
pub const DEFAULT_MAX_OUTBOUND: usize = 1024 * 1024;

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────────────┬──────────────────────┐
/// │ Length (4B)     │ Payload              │
/// │ native-endian   │ (Length bytes, JSON) │
/// └─────────────────┴──────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&len.to_ne_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode one payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; HEADER_SIZE];
    prefix.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_ne_bytes(prefix) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(payload_len).freeze()))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted from the peer. Default: 64 MiB.
    pub max_inbound_payload: usize,
    /// Largest payload this side will emit. Default: 1 MiB.
    pub max_outbound_payload: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_inbound_payload: DEFAULT_MAX_INBOUND,
            max_outbound_payload: DEFAULT_MAX_OUTBOUND,
        }
    }
}
