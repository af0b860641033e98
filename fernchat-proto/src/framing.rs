//! Async frame reader and writer over any byte stream.
//!
//! Both halves apply the same length limit. A clean or abrupt end of the
//! stream in the middle of a frame is reported as [`FrameError::Closed`]
//! so callers can tell "peer went away" from other I/O failures.

use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, CodecError, LENGTH_PREFIX_LEN};

/// Errors produced while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed or reset the stream.
    #[error("connection closed")]
    Closed,

    /// Any other I/O failure on the stream.
    #[error("frame I/O error: {0}")]
    Io(io::Error),

    /// The bytes on the wire violate the framing or record format.
    #[error("protocol violation: {0}")]
    Codec(#[from] CodecError),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

/// Reads length-prefixed frames from the read half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `inner`, refusing frames longer than `max_len` bytes.
    pub const fn new(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Reads one complete frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Closed`] if the stream ends, [`FrameError::Codec`]
    /// if the announced length is over the limit, or [`FrameError::Io`].
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        self.inner.read_exact(&mut prefix).await?;
        let len = codec::payload_len(prefix, self.max_len)?;

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Reads one frame and decodes it as a JSON record.
    ///
    /// # Errors
    ///
    /// As [`read_frame`](Self::read_frame), plus [`FrameError::Codec`] when
    /// the payload is not a valid record.
    pub async fn read_record<T: DeserializeOwned>(&mut self) -> Result<T, FrameError> {
        let payload = self.read_frame().await?;
        Ok(codec::decode(&payload)?)
    }
}

/// Writes length-prefixed frames to the write half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_len: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps `inner`, refusing payloads longer than `max_len` bytes.
    pub const fn new(inner: W, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Writes one frame and flushes it.
    ///
    /// Returns only after the whole frame has been handed to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Codec`] if the payload is over the limit,
    /// [`FrameError::Closed`] if the peer is gone, or [`FrameError::Io`].
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = codec::encode_framed(payload, self.max_len)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encodes `record` as JSON and writes it as one frame.
    ///
    /// # Errors
    ///
    /// As [`write_frame`](Self::write_frame), plus serialization failures.
    pub async fn write_record<T: Serialize>(&mut self, record: &T) -> Result<(), FrameError> {
        let payload = codec::encode(record)?;
        self.write_frame(&payload).await
    }

    /// Shuts down the write direction of the stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, classified like other writes.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
