//! Login/registration handshake and its state machine.
//!
//! ```text
//! Idle ──request──▶ Requested ──perform──▶ InFlight ──"OK"──▶ Authenticated
//!   ▲                                         │
//!   └──────────(transport error)──────────────┤
//!                                             └──other──▶ Rejected ──request──▶ Requested
//! ```
//!
//! The state lives in a [`watch`] cell so the UI can observe every
//! transition without polling. Cancellation before authentication is part
//! of the same cell: [`AuthSession::cancel`] and the final
//! `InFlight → Authenticated` step are serialized, so either the cancel
//! wins and the session never authenticates, or authentication wins and
//! the cancel reports that it came too late.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use zeroize::Zeroize;

use fernchat_proto::handshake::{HandshakeRequest, HandshakeResponse, Operation};

use crate::crypto::fernet::{EncryptionKey, derive_key};
use crate::crypto::password::{PasswordHash, hash_password};
use crate::transport::{Connection, TransportError};

/// Maximum username length in characters.
pub const MAX_USERNAME_LEN: usize = 12;

/// Maximum password length in characters.
pub const MAX_PASSWORD_LEN: usize = 128;

/// Maximum passphrase length in characters.
pub const MAX_PASSPHRASE_LEN: usize = 128;

/// Why a set of credentials was refused before any network traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// A required field was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A field exceeded its length limit.
    #[error("{field} must be at most {max} characters")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Limit in characters.
        max: usize,
    },
}

/// Validated login material.
///
/// Construction hashes the password and derives the encryption key, then
/// wipes both plaintext inputs. Only the username, the hash, and the key
/// are retained.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    pw_hash: PasswordHash,
    key: EncryptionKey,
}

impl Credentials {
    /// Validate and absorb user input.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if any field is empty or too long.
    pub fn new(
        username: impl Into<String>,
        mut password: String,
        mut passphrase: String,
    ) -> Result<Self, CredentialError> {
        let username = username.into();
        let result = validate(&username, &password, &passphrase).map(|()| Self {
            pw_hash: hash_password(&password),
            key: derive_key(&passphrase),
            username,
        });
        password.zeroize();
        passphrase.zeroize();
        result
    }

    /// Account and display name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Digest sent to the server.
    #[must_use]
    pub const fn password_hash(&self) -> &PasswordHash {
        &self.pw_hash
    }

    /// Key for message encryption. Never sent anywhere.
    #[must_use]
    pub const fn encryption_key(&self) -> &EncryptionKey {
        &self.key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn validate(username: &str, password: &str, passphrase: &str) -> Result<(), CredentialError> {
    for (field, value, max) in [
        ("username", username, MAX_USERNAME_LEN),
        ("password", password, MAX_PASSWORD_LEN),
        ("passphrase", passphrase, MAX_PASSPHRASE_LEN),
    ] {
        if value.is_empty() {
            return Err(CredentialError::Empty(field));
        }
        if value.chars().count() > max {
            return Err(CredentialError::TooLong { field, max });
        }
    }
    Ok(())
}

/// Whether the user is logging in or creating an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Log into an existing account.
    Login,
    /// Register a new account.
    Register,
}

impl Intent {
    /// The wire operation for this intent.
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::Login => Operation::Login,
            Self::Register => Operation::Register,
        }
    }

    /// What a rejection means for this intent.
    #[must_use]
    pub const fn rejection(self) -> RejectReason {
        match self {
            Self::Login => RejectReason::WrongCredentials,
            Self::Register => RejectReason::AccountExists,
        }
    }
}

/// Human-facing explanation of a rejected handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Login refused: unknown user or wrong password.
    WrongCredentials,
    /// Registration refused: the username is taken.
    AccountExists,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongCredentials => f.write_str("Wrong credentials. Try again."),
            Self::AccountExists => f.write_str("Account already exists."),
        }
    }
}

/// Result of one completed handshake exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The server answered exactly `OK`.
    Authenticated,
    /// The server answered anything else.
    Rejected(RejectReason),
}

/// Authentication state as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No attempt yet.
    Idle,
    /// Credentials submitted, handshake not yet sent.
    Requested(Intent),
    /// Handshake sent, waiting for the server's answer.
    InFlight(Intent),
    /// The connection may carry chat traffic. Terminal.
    Authenticated,
    /// The last attempt was refused; a new one may be requested.
    Rejected(RejectReason),
}

impl AuthState {
    /// The completed outcome, or `None` while idle or pending.
    #[must_use]
    pub const fn outcome(&self) -> Option<AuthOutcome> {
        match self {
            Self::Authenticated => Some(AuthOutcome::Authenticated),
            Self::Rejected(reason) => Some(AuthOutcome::Rejected(*reason)),
            Self::Idle | Self::Requested(_) | Self::InFlight(_) => None,
        }
    }

    /// Whether a new attempt may be requested from this state.
    #[must_use]
    pub const fn accepts_request(&self) -> bool {
        matches!(self, Self::Idle | Self::Rejected(_))
    }
}

impl From<AuthOutcome> for AuthState {
    fn from(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Authenticated => Self::Authenticated,
            AuthOutcome::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

/// Errors from driving the handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The requested step is not allowed from the current state.
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        /// State at the time of the call.
        state: AuthState,
        /// What was attempted.
        action: &'static str,
    },

    /// Authentication was cancelled by the user.
    #[error("authentication cancelled")]
    Cancelled,

    /// The connection failed during the exchange.
    #[error("handshake transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// The handshake state machine for one connection.
#[derive(Debug)]
pub struct AuthSession {
    state: watch::Sender<AuthState>,
    cancel: watch::Sender<bool>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    /// A fresh machine in [`AuthState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(AuthState::Idle),
            cancel: watch::Sender::new(false),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Whether [`cancel`](Self::cancel) has taken effect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// `Idle | Rejected → Requested`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidTransition`] from any other state and
    /// [`AuthError::Cancelled`] after cancellation.
    pub fn request(&self, intent: Intent) -> Result<(), AuthError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if self.is_cancelled() {
                result = Err(AuthError::Cancelled);
                false
            } else if state.accepts_request() {
                *state = AuthState::Requested(intent);
                true
            } else {
                result = Err(AuthError::InvalidTransition {
                    state: *state,
                    action: "request authentication",
                });
                false
            }
        });
        result
    }

    /// Run one handshake exchange: `Requested → InFlight → outcome`.
    ///
    /// Sends the login or registration record and waits for the status
    /// frame. Only the exact token `OK` authenticates.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTransition`] if not in `Requested`.
    /// - [`AuthError::Transport`] if the exchange fails or the server's
    ///   answer is malformed; the state returns to `Idle`.
    /// - [`AuthError::Cancelled`] if the user cancelled while in flight;
    ///   the state returns to `Idle`.
    pub async fn perform<R, W>(
        &self,
        conn: &mut Connection<R, W>,
        credentials: &Credentials,
    ) -> Result<AuthOutcome, AuthError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let intent = self.begin_flight()?;
        let request = HandshakeRequest {
            operation: intent.operation(),
            username: credentials.username().to_string(),
            pw_hash: credentials.password_hash().as_str().to_string(),
        };

        tracing::debug!(
            username = %request.username,
            operation = request.operation.as_str(),
            "sending handshake"
        );

        let response = match exchange(conn, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(err = %e, "handshake failed");
                self.state.send_replace(AuthState::Idle);
                return Err(e.into());
            }
        };

        let outcome = if response.is_ok() {
            AuthOutcome::Authenticated
        } else {
            tracing::info!(
                username = %request.username,
                status = response.token(),
                "handshake rejected"
            );
            AuthOutcome::Rejected(intent.rejection())
        };
        self.finish(outcome)
    }

    /// Request and perform in one call.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) and [`perform`](Self::perform).
    pub async fn attempt<R, W>(
        &self,
        conn: &mut Connection<R, W>,
        credentials: &Credentials,
        intent: Intent,
    ) -> Result<AuthOutcome, AuthError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.request(intent)?;
        self.perform(conn, credentials).await
    }

    /// Withdraw a pending request without touching the network.
    ///
    /// Only `Requested` and `InFlight` go back to `Idle`; completed
    /// states are left alone.
    pub fn abandon(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, AuthState::Requested(_) | AuthState::InFlight(_)) {
                *state = AuthState::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Cancel authentication.
    ///
    /// Returns `true` if the cancel took effect (the session will never
    /// authenticate) and `false` if the session is already authenticated.
    /// Any other state, including a previous rejection, goes back to `Idle`.
    pub fn cancel(&self) -> bool {
        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if *state == AuthState::Authenticated {
                return false;
            }
            accepted = true;
            self.cancel.send_replace(true);
            // A cached rejection must not outlive the cancel.
            if *state == AuthState::Idle {
                false
            } else {
                *state = AuthState::Idle;
                true
            }
        });
        if accepted {
            tracing::info!("authentication cancelled");
        }
        accepted
    }

    /// Resolves once [`cancel`](Self::cancel) has taken effect.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives in `self`, so this only returns on a real cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn begin_flight(&self) -> Result<Intent, AuthError> {
        let mut result = Err(AuthError::Cancelled);
        self.state.send_if_modified(|state| match *state {
            AuthState::Requested(intent) if !self.is_cancelled() => {
                *state = AuthState::InFlight(intent);
                result = Ok(intent);
                true
            }
            _ if self.is_cancelled() => false,
            other => {
                result = Err(AuthError::InvalidTransition {
                    state: other,
                    action: "send handshake",
                });
                false
            }
        });
        result
    }

    fn finish(&self, outcome: AuthOutcome) -> Result<AuthOutcome, AuthError> {
        let mut result = Ok(outcome);
        self.state.send_if_modified(|state| {
            if self.is_cancelled() {
                result = Err(AuthError::Cancelled);
                *state = AuthState::Idle;
            } else {
                *state = outcome.into();
            }
            true
        });
        result
    }
}

async fn exchange<R, W>(
    conn: &mut Connection<R, W>,
    request: &HandshakeRequest,
) -> Result<HandshakeResponse, TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    conn.send_record(request).await?;
    let payload = conn.recv_frame().await?;
    Ok(HandshakeResponse::from_payload(&payload)?)
}
