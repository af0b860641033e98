//! Password hashing for the authentication handshake.

use std::fmt;

use sha3::{Digest, Sha3_512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a [`PasswordHash`] in hex characters.
pub const PASSWORD_HASH_LEN: usize = 128;

/// Lowercase hex SHA3-512 digest of a password.
///
/// This is what the server stores and compares; the plaintext password
/// never leaves [`hash_password`]. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell hashes apart in logs.
        write!(f, "PasswordHash({}…)", self.0.get(..8).unwrap_or_default())
    }
}

/// Hash `password` with SHA3-512.
#[must_use]
pub fn hash_password(password: &str) -> PasswordHash {
    let digest = Sha3_512::digest(password.as_bytes());
    PasswordHash(hex::encode(digest))
}
