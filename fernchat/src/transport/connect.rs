//! Connection establishment with fixed-delay retry.
//!
//! Connecting is a precondition for the whole session, so a refused
//! connection (server not up yet) is retried forever with a fixed delay.
//! Every other dial failure is returned immediately as
//! [`TransportError::Unreachable`].

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use fernchat_proto::codec::DEFAULT_MAX_FRAME_LEN;

use super::{Connection, TransportError};

/// Delay between attempts when the server refuses the connection.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Dials the chat server and produces a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    addr: String,
    retry_delay: Duration,
    max_frame_len: usize,
}

impl ConnectionManager {
    /// Manager for `host:port`. IPv6 literals are bracketed automatically.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_addr(join_host_port(host, port))
    }

    /// Manager for an address string in `host:port` form.
    pub fn from_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Override the delay between refused attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Override the frame size limit of the produced connection.
    #[must_use]
    pub const fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The address being dialed.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The delay between refused attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Connect, retrying indefinitely while the server refuses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] for any dial failure other
    /// than refusal.
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        self.connect_with_notice(|_| {}).await
    }

    /// Like [`connect`](Self::connect), calling `on_retry` with the number
    /// of the failed attempt each time a refusal is about to be retried.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] for any dial failure other
    /// than refusal.
    pub async fn connect_with_notice<F>(&self, mut on_retry: F) -> Result<Connection, TransportError>
    where
        F: FnMut(u32),
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match TcpStream::connect(self.addr.as_str()).await {
                Ok(stream) => {
                    tracing::info!(addr = %self.addr, attempt, "connected to chat server");
                    return Connection::from_stream(stream, self.max_frame_len, attempt);
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    tracing::warn!(
                        addr = %self.addr,
                        attempt,
                        delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "connection refused, retrying"
                    );
                    on_retry(attempt);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(addr = %self.addr, err = %e, "cannot reach chat server");
                    return Err(TransportError::Unreachable {
                        addr: self.addr.clone(),
                        source: e,
                    });
                }
            }
        }
    }
}

/// Join `host` and `port`, bracketing bare IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
