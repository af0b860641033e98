//! `FernChat` client session for a passphrase-encrypted text chat.
//!
//! The session connects to a chat server, authenticates with a login or
//! registration handshake, and then pumps encrypted messages between two
//! queues and the socket. See [`session::spawn_session`] for the entry point.

pub mod auth;
pub mod chat;
pub mod config;
pub mod crypto;
pub mod session;
pub mod transport;
