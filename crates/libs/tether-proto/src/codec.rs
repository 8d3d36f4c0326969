//! MessagePack encoding for payloads and length-prefixed envelope frames.
//!
//! Payloads (call arguments and reply values) use the named-field encoding so
//! both sides only have to agree on field names. Frames carry exactly one
//! compact envelope behind a big-endian `u32` body length:
//!
//! ```text
//! +----------------+----------------------------+
//! | len: u32 (BE)  | envelope (compact msgpack) |
//! +----------------+----------------------------+
//! ```
//!
//! Both directions enforce a body limit. A declared length over the limit is
//! rejected from the header alone, before any body bytes are looked at.

use rmp_serde::from_slice;
use serde::{de::DeserializeOwned, Serialize};

/// Encoding of the unit value, used to decode `Empty` replies.
pub const NIL_PAYLOAD: &[u8] = &[0xc0];

pub const FRAME_HEADER_LEN: usize = 4;

/// Default body limit. Replies above the inline threshold normally travel as
/// blob references, so only inline fallbacks come near it.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("{0} trailing bytes after frame")]
    Trailing(usize),

    #[error("frame encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("frame decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(value)
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    from_slice(bytes)
}

pub fn encode_frame<T: Serialize>(envelope: &T, max_len: usize) -> Result<Vec<u8>, FrameError> {
    let body = rmp_serde::to_vec(envelope)?;
    let max = max_len.min(u32::MAX as usize);
    if body.len() > max {
        return Err(FrameError::TooLarge { len: body.len(), max });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a buffer holding exactly one frame.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8], max_len: usize) -> Result<T, FrameError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated { needed: FRAME_HEADER_LEN, have: frame.len() });
    }
    let (header, body) = frame.split_at(FRAME_HEADER_LEN);
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }
    if body.len() < len {
        return Err(FrameError::Truncated { needed: FRAME_HEADER_LEN + len, have: frame.len() });
    }
    if body.len() > len {
        return Err(FrameError::Trailing(body.len() - len));
    }
    Ok(from_slice(body)?)
}
