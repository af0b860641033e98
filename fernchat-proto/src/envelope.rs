//! Chat envelopes delivered from the server to clients.

use serde::{Deserialize, Serialize};

/// One chat message as relayed by the server.
///
/// The server stamps the sender's name from the authenticated connection;
/// the ciphertext is an opaque Fernet token that only peers sharing the
/// passphrase can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Display name of the sender.
    #[serde(rename = "username")]
    pub sender: String,
    /// Fernet token text.
    #[serde(rename = "message")]
    pub ciphertext: String,
}

impl Envelope {
    /// Creates an envelope for `ciphertext` sent by `sender`.
    pub fn new(sender: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            ciphertext: ciphertext.into(),
        }
    }
}
