//! `FernChat` reference server library.
//!
//! Exposes the server for use in tests and embedding. The server accepts
//! TCP connections, authenticates them against an in-memory account table,
//! and relays every ciphertext it receives to all other authenticated
//! connections. It never sees plaintext.

pub mod config;
pub mod server;
