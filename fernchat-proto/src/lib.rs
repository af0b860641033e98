//! Shared protocol definitions for the `FernChat` wire format.

pub mod codec;
pub mod envelope;
pub mod framing;
pub mod handshake;
