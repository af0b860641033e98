//! Chat message pump for `FernChat`.
//!
//! Once the handshake has authenticated a [`Connection`], the
//! [`MessageChannel`] splits it and runs two independent loops:
//!
//! - the outbound loop ([`send`]) drains the outbound queue, encrypts each
//!   message, and writes one frame per message in queue order;
//! - the inbound loop ([`receive`]) reads envelopes, decrypts them, and
//!   pushes display lines onto the inbound queue.
//!
//! A transport failure on either side stops both loops. Messages that do
//! not decrypt under the session key are dropped without stopping
//! anything.

pub mod receive;
pub mod send;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::crypto::CryptoSession;
use crate::transport::{Connection, TransportError};

/// How the pump ended.
#[derive(Debug)]
pub enum ChannelExit {
    /// The UI dropped one of its queue ends.
    Shutdown,
    /// The connection failed or the server broke the protocol.
    Disconnected(TransportError),
}

impl ChannelExit {
    /// Whether the pump ended because of the connection.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Formats a decrypted message for the inbound queue.
#[must_use]
pub fn display_line(sender: &str, plaintext: &str) -> String {
    format!("{sender}: {plaintext}")
}

/// The duplex encrypted pump over one authenticated connection.
pub struct MessageChannel<C: CryptoSession> {
    crypto: Arc<C>,
}

impl<C: CryptoSession + 'static> MessageChannel<C> {
    /// Build a pump that encrypts and decrypts through `crypto`.
    pub fn new(crypto: C) -> Self {
        Self {
            crypto: Arc::new(crypto),
        }
    }

    /// Run both loops until either ends, then stop the other.
    ///
    /// Consumes the connection: after this call nothing else can read or
    /// write it.
    pub async fn run<R, W>(
        self,
        conn: Connection<R, W>,
        outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
    ) -> ChannelExit
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = conn.into_split();

        let mut send_task = tokio::spawn(send::outbound_loop(
            Arc::clone(&self.crypto),
            writer,
            outbound,
        ));
        let mut recv_task = tokio::spawn(receive::inbound_loop(
            Arc::clone(&self.crypto),
            reader,
            inbound,
        ));

        tracing::debug!("message pump started");

        let exit = tokio::select! {
            res = &mut send_task => {
                recv_task.abort();
                joined(res, "outbound")
            }
            res = &mut recv_task => {
                send_task.abort();
                joined(res, "inbound")
            }
        };

        match &exit {
            ChannelExit::Shutdown => tracing::info!("message pump shut down"),
            ChannelExit::Disconnected(e) => tracing::warn!(err = %e, "message pump disconnected"),
        }
        exit
    }
}

impl<C: CryptoSession> std::fmt::Debug for MessageChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel").finish_non_exhaustive()
    }
}

fn joined(res: Result<ChannelExit, tokio::task::JoinError>, side: &'static str) -> ChannelExit {
    res.unwrap_or_else(|e| {
        tracing::error!(side, err = %e, "pump task failed");
        ChannelExit::Disconnected(TransportError::Io(std::io::Error::other(e.to_string())))
    })
}
