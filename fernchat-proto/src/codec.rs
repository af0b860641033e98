//! Serialization and deserialization for the `FernChat` wire protocol.
//!
//! Structured records (handshake requests, chat envelopes) are JSON
//! objects. Every unit written to the stream socket, handshake included,
//! is wrapped in a length-prefix frame so the reader never has to guess
//! where one record ends and the next begins.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Number of bytes in the frame length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single frame payload (64 KB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete, oversized, or otherwise not what the protocol allows.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Encodes a structured record as a JSON byte vector.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the record cannot be serialized.
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(record).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a structured record from a JSON byte slice.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not a valid record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Wraps a payload in a 4-byte little-endian length prefix.
///
/// Wire format: `[u32 length (LE)][payload bytes]`
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the payload exceeds `max_len`.
pub fn encode_framed(payload: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
    let len = checked_len(payload.len(), max_len)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reads the payload length announced by a frame prefix.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the announced length exceeds `max_len`.
pub fn payload_len(prefix: [u8; LENGTH_PREFIX_LEN], max_len: usize) -> Result<usize, CodecError> {
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame announces {len} bytes, limit is {max_len}"
        )));
    }
    Ok(len)
}

fn checked_len(len: usize, max_len: usize) -> Result<u32, CodecError> {
    if len > max_len {
        return Err(CodecError::InvalidFrame(format!(
            "payload too large for framing: {len} bytes (limit {max_len})"
        )));
    }
    u32::try_from(len)
        .map_err(|_| CodecError::InvalidFrame(format!("payload too large for framing: {len} bytes")))
}
