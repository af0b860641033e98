//! Transport layer for `FernChat`.
//!
//! A [`Connection`] is one framed, persistent stream to the chat server.
//! It is created by [`connect::ConnectionManager`], used exclusively by
//! the authentication handshake, and then split into its read and write
//! halves and handed to the message pump. It is never shared: at any time
//! exactly one component reads and at most one writes.
//!
//! - [`connect::ConnectionManager`]: connection establishment with retry.

pub mod connect;

use std::io;
use std::net::SocketAddr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use fernchat_proto::codec::CodecError;
use fernchat_proto::framing::{FrameError, FrameReader, FrameWriter};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server closed or reset the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server could not be reached for a reason other than refusal
    /// (bad address, DNS failure, unreachable network).
    #[error("cannot reach {addr}: {source}")]
    Unreachable {
        /// The address that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An underlying I/O error occurred on an established connection.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server sent bytes that violate the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Closed => Self::ConnectionClosed,
            FrameError::Io(e) => Self::Io(e),
            FrameError::Codec(e) => Self::Protocol(e),
        }
    }
}

/// A framed connection to the chat server.
///
/// Generic over the stream halves so the handshake and pump can be
/// exercised over in-memory streams; the default parameters are the
/// halves of a [`TcpStream`].
#[derive(Debug)]
pub struct Connection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    peer_addr: Option<SocketAddr>,
    attempts: u32,
}

impl Connection {
    /// Wrap an established TCP stream.
    ///
    /// `attempts` is the number of dial attempts it took to establish.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the socket cannot be configured.
    pub fn from_stream(
        stream: TcpStream,
        max_frame_len: usize,
        attempts: u32,
    ) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self::from_halves(read_half, write_half, max_frame_len);
        conn.peer_addr = Some(peer_addr);
        conn.attempts = attempts;
        Ok(conn)
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Build a connection from an arbitrary read half and write half.
    pub const fn from_halves(read_half: R, write_half: W, max_frame_len: usize) -> Self {
        Self {
            reader: FrameReader::new(read_half, max_frame_len),
            writer: FrameWriter::new(write_half, max_frame_len),
            peer_addr: None,
            attempts: 1,
        }
    }

    /// Address of the server, if this is a TCP connection.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// How many dial attempts it took to establish this connection.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Write one frame.
    ///
    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        Ok(self.writer.write_frame(payload).await?)
    }

    /// Write a JSON record as one frame.
    ///
    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn send_record<T: Serialize>(&mut self, record: &T) -> Result<(), TransportError> {
        Ok(self.writer.write_record(record).await?)
    }

    /// Read one frame.
    ///
    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.reader.read_frame().await?)
    }

    /// Read one frame and decode it as a JSON record.
    ///
    /// # Errors
    ///
    /// See [`TransportError`].
    pub async fn recv_record<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        Ok(self.reader.read_record().await?)
    }

    /// Hand the two halves over to independent owners.
    pub fn into_split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}
