//! Session coordinator: connect, authenticate, then pump messages.
//!
//! [`spawn_session`] starts one background driver task and returns a
//! [`SessionHandle`] for the UI. The two sides share nothing but queues and
//! watch cells:
//!
//! ```text
//! UI ── submit_credentials ──▶ requests (mpsc, cap 1) ──▶ driver
//! UI ── enqueue_outbound ────▶ outbound (mpsc) ─────────▶ outbound pump
//! UI ◀─ next_inbound ──────── inbound (mpsc) ◀────────── inbound pump
//! UI ◀─ wait_for_auth ─────── auth state (watch)
//! UI ◀─ subscribe_link ────── link state (watch)
//! ```
//!
//! The driver owns the connection during the handshake and then moves its
//! halves into the pump. Messages enqueued before authentication wait in
//! the outbound queue until the pump starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::{
    AuthError, AuthOutcome, AuthSession, AuthState, CredentialError, Credentials, Intent,
    RejectReason,
};
use crate::chat::{ChannelExit, MessageChannel};
use crate::crypto::CryptoError;
use crate::crypto::fernet::{FernetSession, token_len};
use crate::transport::TransportError;
use crate::transport::connect::{ConnectionManager, DEFAULT_RETRY_DELAY};

/// Default capacity of the outbound and inbound queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default maximum length of one chat message, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 100;

/// Settings the core needs to run a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server address in `host:port` form.
    pub server_addr: String,
    /// Delay between refused connection attempts.
    pub retry_delay: Duration,
    /// Capacity of the outbound and inbound queues.
    pub channel_capacity: usize,
    /// Largest frame accepted or sent, in bytes.
    pub max_frame_len: usize,
    /// Longest accepted outbound message, in characters.
    pub max_message_len: usize,
}

impl SessionConfig {
    /// Defaults for everything but the address.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_len: fernchat_proto::codec::DEFAULT_MAX_FRAME_LEN,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

/// Connection status as published to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// First connection attempt in progress.
    Connecting,
    /// The server refused; another attempt follows after the retry delay.
    Retrying {
        /// Number of the attempt that was refused.
        attempt: u32,
    },
    /// Connected, handshake not yet complete.
    Connected,
    /// Authenticated; the message pump is running.
    Chatting,
    /// The session ended. Terminal.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// The user cancelled before authentication. Terminal.
    Cancelled,
}

impl LinkState {
    /// Whether the session has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Cancelled)
    }
}

/// Authentication result as seen by a polling UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// No completed attempt yet, or one is in progress.
    Pending,
    /// The session is authenticated.
    Authenticated,
    /// The last attempt was refused.
    Rejected(RejectReason),
}

impl From<AuthState> for AuthResult {
    fn from(state: AuthState) -> Self {
        match state.outcome() {
            Some(AuthOutcome::Authenticated) => Self::Authenticated,
            Some(AuthOutcome::Rejected(reason)) => Self::Rejected(reason),
            None => Self::Pending,
        }
    }
}

/// Errors surfaced by the [`SessionHandle`] and the driver.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credentials failed validation.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] CredentialError),

    /// Credentials were submitted after authentication succeeded.
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// Credentials were submitted while another attempt was pending.
    #[error("an authentication attempt is already in progress")]
    AuthInFlight,

    /// The outbound queue is full.
    #[error("outbound queue is full")]
    QueueFull,

    /// The message exceeds the configured maximum length.
    #[error("message is {len} characters, limit is {max}")]
    MessageTooLong {
        /// Length of the rejected message.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// The encrypted message would not fit in one frame.
    #[error("encrypted message would be {token_len} bytes, frame limit is {max_frame_len}")]
    MessageTooLarge {
        /// Size of the token the message encrypts to.
        token_len: usize,
        /// Configured frame limit.
        max_frame_len: usize,
    },

    /// Connecting, the handshake, or the pump failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session key could not be turned into a cipher.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The user cancelled before authentication.
    #[error("session cancelled")]
    Cancelled,

    /// The session has ended and no longer accepts input.
    #[error("session closed")]
    Closed,

    /// The session ended while waiting; `reason` is what the driver reported.
    #[error("disconnected: {reason}")]
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

impl From<AuthError> for SessionError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Cancelled => Self::Cancelled,
            AuthError::Transport(e) => Self::Transport(e),
            AuthError::InvalidTransition {
                state: AuthState::Authenticated,
                ..
            } => Self::AlreadyAuthenticated,
            AuthError::InvalidTransition { .. } => Self::AuthInFlight,
        }
    }
}

#[derive(Debug)]
struct AuthRequest {
    credentials: Credentials,
}

/// The UI's side of a running session.
///
/// Dropping the handle cancels a session that has not authenticated yet
/// and shuts down the pump of one that has.
#[derive(Debug)]
pub struct SessionHandle {
    auth: Arc<AuthSession>,
    requests: mpsc::Sender<AuthRequest>,
    auth_rx: watch::Receiver<AuthState>,
    link_rx: watch::Receiver<LinkState>,
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
    driver: Option<JoinHandle<Result<(), SessionError>>>,
    max_message_len: usize,
    max_frame_len: usize,
}

/// Start a session against `config.server_addr`.
///
/// Returns immediately; connecting begins in the background. Credentials
/// may be submitted before the connection is up.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
#[must_use]
pub fn spawn_session(config: SessionConfig) -> SessionHandle {
    let auth = Arc::new(AuthSession::new());
    let (requests_tx, requests_rx) = mpsc::channel(1);
    let capacity = config.channel_capacity.max(1);
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (link_tx, link_rx) = watch::channel(LinkState::Connecting);

    let max_message_len = config.max_message_len;
    let max_frame_len = config.max_frame_len;
    let driver = Driver {
        config,
        auth: Arc::clone(&auth),
        requests: requests_rx,
        link: link_tx,
    };
    let task = tokio::spawn(driver.run(outbound_rx, inbound_tx));

    SessionHandle {
        auth_rx: auth.subscribe(),
        auth,
        requests: requests_tx,
        link_rx,
        outbound: outbound_tx,
        inbound: inbound_rx,
        driver: Some(task),
        max_message_len,
        max_frame_len,
    }
}

impl SessionHandle {
    /// Queue a login or registration attempt.
    ///
    /// Returns once the attempt is queued; the outcome arrives through
    /// [`wait_for_auth`](Self::wait_for_auth) or
    /// [`auth_result`](Self::auth_result).
    ///
    /// # Errors
    ///
    /// - [`SessionError::AuthInFlight`] while another attempt is pending.
    /// - [`SessionError::AlreadyAuthenticated`] after success.
    /// - [`SessionError::Cancelled`] after cancellation.
    /// - [`SessionError::Closed`] if the session has ended.
    pub fn submit_credentials(
        &self,
        credentials: Credentials,
        intent: Intent,
    ) -> Result<(), SessionError> {
        self.auth.request(intent)?;
        if self.requests.try_send(AuthRequest { credentials }).is_err() {
            self.auth.abandon();
            return Err(SessionError::Closed);
        }
        tracing::debug!(?intent, "credentials submitted");
        Ok(())
    }

    /// Outcome of the latest attempt, without waiting.
    #[must_use]
    pub fn auth_result(&self) -> AuthResult {
        self.auth.state().into()
    }

    /// Wait until the pending attempt completes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cancelled`] or
    /// [`SessionError::Disconnected`] if the session ends first.
    pub async fn wait_for_auth(&mut self) -> Result<AuthOutcome, SessionError> {
        loop {
            if let Some(outcome) = self.auth_rx.borrow_and_update().outcome() {
                return Ok(outcome);
            }
            if let Some(err) = terminal_error(&self.link_rx.borrow_and_update()) {
                return Err(err);
            }

            let link_closed = tokio::select! {
                // The sender lives in `self.auth`, so this cannot close.
                _ = self.auth_rx.changed() => false,
                changed = self.link_rx.changed() => changed.is_err(),
            };
            if link_closed {
                return Err(terminal_error(&self.link_rx.borrow()).unwrap_or(SessionError::Closed));
            }
        }
    }

    /// Queue `text` for sending.
    ///
    /// Before authentication the message waits until the pump starts.
    ///
    /// # Errors
    ///
    /// - [`SessionError::MessageTooLong`] over the configured limit.
    /// - [`SessionError::MessageTooLarge`] if its ciphertext cannot fit in
    ///   one frame.
    /// - [`SessionError::QueueFull`] if the outbound queue is full.
    /// - [`SessionError::Closed`] if the session has ended.
    pub fn enqueue_outbound(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let len = text.chars().count();
        if len > self.max_message_len {
            return Err(SessionError::MessageTooLong {
                len,
                max: self.max_message_len,
            });
        }
        let token_len = token_len(text.len());
        if token_len > self.max_frame_len {
            return Err(SessionError::MessageTooLarge {
                token_len,
                max_frame_len: self.max_frame_len,
            });
        }
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Take every line that has arrived so far, oldest first.
    pub fn drain_inbound(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.inbound.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Wait for the next inbound line; `None` once the session has ended
    /// and everything has been drained.
    pub async fn next_inbound(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Current link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link_rx.borrow().clone()
    }

    /// Receiver observing every link state change.
    #[must_use]
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link_rx.clone()
    }

    /// Stop connecting or authenticating without ever starting the pump.
    ///
    /// Returns `false` if the session is already authenticated, in which
    /// case nothing changes.
    pub fn cancel_before_auth(&self) -> bool {
        self.auth.cancel()
    }

    /// Wait for the driver to finish and return its result.
    ///
    /// Only returns once the session has ended: after cancellation, a
    /// fatal error, or the pump shutting down.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session.
    pub async fn join(mut self) -> Result<(), SessionError> {
        let Some(task) = self.driver.take() else {
            return Err(SessionError::Closed);
        };
        task.await.unwrap_or_else(|e| {
            tracing::error!(err = %e, "session driver failed");
            Err(SessionError::Closed)
        })
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.link_rx.borrow().is_terminal() {
            self.auth.cancel();
        }
    }
}

fn terminal_error(state: &LinkState) -> Option<SessionError> {
    match state {
        LinkState::Cancelled => Some(SessionError::Cancelled),
        LinkState::Disconnected { reason } => Some(SessionError::Disconnected {
            reason: reason.clone(),
        }),
        _ => None,
    }
}

/// Background task sequencing connect, handshake, and pump.
struct Driver {
    config: SessionConfig,
    auth: Arc<AuthSession>,
    requests: mpsc::Receiver<AuthRequest>,
    link: watch::Sender<LinkState>,
}

impl Driver {
    async fn run(
        mut self,
        outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
    ) -> Result<(), SessionError> {
        let result = self.drive(outbound, inbound).await;

        let final_state = match &result {
            Ok(()) => LinkState::Disconnected {
                reason: "session closed".to_string(),
            },
            Err(SessionError::Cancelled) => LinkState::Cancelled,
            Err(e) => LinkState::Disconnected {
                reason: e.to_string(),
            },
        };
        match &result {
            Ok(()) => tracing::info!("session ended"),
            Err(SessionError::Cancelled) => tracing::info!("session cancelled before authentication"),
            Err(e) => tracing::warn!(err = %e, "session ended with error"),
        }
        self.link.send_replace(final_state);
        result
    }

    async fn drive(
        &mut self,
        outbound: mpsc::Receiver<String>,
        inbound: mpsc::Sender<String>,
    ) -> Result<(), SessionError> {
        let manager = ConnectionManager::from_addr(self.config.server_addr.clone())
            .with_retry_delay(self.config.retry_delay)
            .with_max_frame_len(self.config.max_frame_len);

        self.link.send_replace(LinkState::Connecting);
        let link = &self.link;
        let mut conn = tokio::select! {
            biased;
            () = self.auth.cancelled() => return Err(SessionError::Cancelled),
            res = manager.connect_with_notice(|attempt| {
                link.send_replace(LinkState::Retrying { attempt });
            }) => res?,
        };
        self.link.send_replace(LinkState::Connected);

        let credentials = loop {
            let request = tokio::select! {
                biased;
                () = self.auth.cancelled() => return Err(SessionError::Cancelled),
                req = self.requests.recv() => req.ok_or(SessionError::Cancelled)?,
            };

            let outcome = tokio::select! {
                biased;
                () = self.auth.cancelled() => return Err(SessionError::Cancelled),
                res = self.auth.perform(&mut conn, &request.credentials) => res?,
            };

            match outcome {
                AuthOutcome::Authenticated => break request.credentials,
                AuthOutcome::Rejected(reason) => {
                    tracing::info!(username = request.credentials.username(), %reason, "authentication rejected");
                }
            }
        };

        tracing::info!(username = credentials.username(), "authenticated");
        let crypto = FernetSession::new(credentials.encryption_key())?;
        drop(credentials);

        self.link.send_replace(LinkState::Chatting);
        match MessageChannel::new(crypto).run(conn, outbound, inbound).await {
            ChannelExit::Shutdown => Ok(()),
            ChannelExit::Disconnected(e) => Err(e.into()),
        }
    }
}
