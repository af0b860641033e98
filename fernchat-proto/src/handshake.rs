//! Handshake records exchanged once per authentication attempt.
//!
//! The client sends a [`HandshakeRequest`] as a JSON record; the server
//! answers with a bare status token. Only the exact token `"OK"` admits
//! the connection to chat traffic.

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Status token the server sends when the attempt succeeded.
pub const STATUS_OK: &str = "OK";

/// Status token the reference server sends on rejection.
///
/// Clients must treat any token other than [`STATUS_OK`] as a rejection,
/// not just this one.
pub const STATUS_REJECTED: &str = "NOT OK";

/// Which account operation a handshake performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Authenticate against an existing account.
    Login,
    /// Create a new account and authenticate as it.
    Register,
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
        }
    }
}

/// A login or registration attempt.
///
/// Carries only the password hash. The passphrase used for message
/// encryption never appears in any handshake record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Requested operation.
    pub operation: Operation,
    /// Account name, also used as the display name on chat envelopes.
    pub username: String,
    /// Hex-encoded password digest.
    pub pw_hash: String,
}

/// The server's verdict on a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// The server answered with exactly [`STATUS_OK`].
    Ok,
    /// The server answered with any other token (kept for logging).
    Rejected(String),
}

impl HandshakeResponse {
    /// Interprets a status frame payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidFrame` if the payload is empty or not
    /// UTF-8. Those are protocol violations, not rejections.
    pub fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::InvalidFrame("empty handshake status".into()));
        }
        let token = std::str::from_utf8(payload).map_err(|e| {
            CodecError::InvalidFrame(format!("handshake status is not UTF-8: {e}"))
        })?;
        if token == STATUS_OK {
            Ok(Self::Ok)
        } else {
            Ok(Self::Rejected(token.to_string()))
        }
    }

    /// The status token to put on the wire for this response.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Ok => STATUS_OK,
            Self::Rejected(token) => token,
        }
    }

    /// Whether this response admits the connection.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}
