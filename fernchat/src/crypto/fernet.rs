//! Passphrase-keyed Fernet encryption.
//!
//! The key is the user's passphrase, space-padded or truncated to a
//! 32-byte block and base64-encoded into Fernet's key format. Peers that
//! typed the same passphrase derive the same key and can read each
//! other's messages; everyone else sees tokens that fail verification.
//! Tokens are interchangeable with any other Fernet implementation given
//! the same derivation.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CryptoError, CryptoSession, DecryptionFailure, DecryptionFailureKind};

/// Width of the passphrase block the key is built from.
pub const KEY_BLOCK_LEN: usize = 32;

/// Byte used to pad passphrases shorter than [`KEY_BLOCK_LEN`].
const PAD_BYTE: u8 = b' ';

/// A Fernet key derived from a passphrase.
///
/// Zeroized on drop. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(String);

impl EncryptionKey {
    /// The key in Fernet's URL-safe base64 text form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Derive the encryption key for `passphrase`.
///
/// Pads the passphrase bytes on the right with spaces to 32 bytes, or
/// truncates them to 32 bytes, then base64-encodes the block. Pure and
/// deterministic. Passphrases that agree on their first 32 bytes derive
/// the same key, so callers should cap passphrase length before this.
#[must_use]
pub fn derive_key(passphrase: &str) -> EncryptionKey {
    let mut block = [PAD_BYTE; KEY_BLOCK_LEN];
    let bytes = passphrase.as_bytes();
    let take = bytes.len().min(KEY_BLOCK_LEN);
    block[..take].copy_from_slice(&bytes[..take]);

    let encoded = URL_SAFE.encode(block);
    block.zeroize();
    EncryptionKey(encoded)
}

/// Encrypt `plaintext` under `key`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKey`] if `key` did not come from
/// [`derive_key`] and is not a valid Fernet key.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<String, CryptoError> {
    FernetSession::new(key)?.encrypt(plaintext)
}

/// Decrypt `token` under `key`.
///
/// # Errors
///
/// Returns [`DecryptionFailure`] if the token cannot be opened with `key`.
pub fn decrypt(token: &str, key: &EncryptionKey) -> Result<String, DecryptionFailure> {
    FernetSession::new(key)
        .map_err(|_| DecryptionFailure::new(DecryptionFailureKind::InvalidToken))?
        .decrypt(token)
}

/// Version, timestamp, IV and HMAC bytes around the ciphertext.
const TOKEN_OVERHEAD: usize = 1 + 8 + 16 + 32;

/// AES block size; the ciphertext is always padded to a whole number.
const CIPHER_BLOCK_LEN: usize = 16;

/// Length of the token text that `plaintext_len` bytes encrypt to.
///
/// Fernet's output size depends only on the input size, so this is exact.
#[must_use]
pub const fn token_len(plaintext_len: usize) -> usize {
    let blocks = plaintext_len / CIPHER_BLOCK_LEN + 1;
    let raw = TOKEN_OVERHEAD.saturating_add(blocks.saturating_mul(CIPHER_BLOCK_LEN));
    raw.div_ceil(3).saturating_mul(4)
}

/// A [`CryptoSession`] backed by a Fernet cipher.
pub struct FernetSession {
    cipher: ::fernet::Fernet,
}

impl FernetSession {
    /// Build a session for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key text is not a valid
    /// Fernet key. Keys from [`derive_key`] always are.
    pub fn new(key: &EncryptionKey) -> Result<Self, CryptoError> {
        ::fernet::Fernet::new(key.as_str())
            .map(|cipher| Self { cipher })
            .ok_or(CryptoError::InvalidKey)
    }
}

impl fmt::Debug for FernetSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FernetSession").finish_non_exhaustive()
    }
}

impl CryptoSession for FernetSession {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(self.cipher.encrypt(plaintext.as_bytes()))
    }

    fn decrypt(&self, token: &str) -> Result<String, DecryptionFailure> {
        let bytes = self
            .cipher
            .decrypt(token)
            .map_err(|_| DecryptionFailure::new(DecryptionFailureKind::InvalidToken))?;
        String::from_utf8(bytes).map_err(|_| DecryptionFailure::new(DecryptionFailureKind::NotText))
    }
}
