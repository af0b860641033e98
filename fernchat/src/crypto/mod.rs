//! Cryptographic layer for `FernChat`.
//!
//! Defines the [`CryptoSession`] trait the message pump encrypts and
//! decrypts through, plus the error types on both sides of it. The trait
//! is the **only** boundary where chat plaintext exists: everything the
//! outbound pump writes has passed through [`CryptoSession::encrypt`] and
//! everything the inbound pump shows has passed through
//! [`CryptoSession::decrypt`].
//!
//! - [`fernet`]: passphrase key derivation and the Fernet session.
//! - [`password`]: one-way password hashing for the handshake.

pub mod fernet;
pub mod password;

/// Errors on the encryption side.
///
/// Both variants indicate a programming error once a session has been
/// built from a derived key; they are not expected at runtime.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The key is not in the format the cipher accepts.
    #[error("invalid encryption key")]
    InvalidKey,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Why a ciphertext could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionFailureKind {
    /// MAC mismatch, bad token structure, or a different passphrase.
    InvalidToken,
    /// The token verified but its content is not UTF-8 text.
    NotText,
}

/// A ciphertext that this session cannot open.
///
/// This is the routine outcome for messages from peers using another
/// passphrase. The inbound pump drops these; they never reach the UI and
/// never end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message could not be decrypted ({kind:?})")]
pub struct DecryptionFailure {
    /// What went wrong.
    pub kind: DecryptionFailureKind,
}

impl DecryptionFailure {
    pub(crate) const fn new(kind: DecryptionFailureKind) -> Self {
        Self { kind }
    }
}

/// Trait for encrypting and decrypting chat payloads.
///
/// # Invariant
///
/// `encrypt` must be randomized: the same plaintext encrypted twice gives
/// two different tokens. `decrypt` must never panic on hostile input; it
/// returns [`DecryptionFailure`] instead.
///
/// # Implementors
///
/// - [`fernet::FernetSession`]
pub trait CryptoSession: Send + Sync {
    /// Encrypt a plaintext message into a self-describing token.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] only if the session's key is unusable.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a token back into the original text.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionFailure`] if the token was produced under a
    /// different key, was tampered with, or is not a token at all.
    fn decrypt(&self, token: &str) -> Result<String, DecryptionFailure>;
}
