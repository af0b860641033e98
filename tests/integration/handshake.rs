// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the login/registration handshake.
//!
//! Runs [`spawn_session`] against the in-process reference server and
//! against scripted servers that answer with unusual status tokens.
//!
//! These tests validate:
//! - Registering a new account authenticates; registering it again is
//!   rejected with "Account already exists."
//! - A rejected login can be retried on the same connection.
//! - Only the exact status `OK` authenticates.
//! - A malformed status ends the session.
//! - Cancelling before authentication never starts the pump.
//! - Cancelling after a rejection reports the cancel, not the rejection.

use std::net::SocketAddr;
use std::time::Duration;

use fernchat::auth::{AuthOutcome, Credentials, Intent, RejectReason};
use fernchat::session::{AuthResult, LinkState, SessionConfig, SessionError, spawn_session};
use fernchat::transport::TransportError;
use fernchat_proto::codec::DEFAULT_MAX_FRAME_LEN;
use fernchat_proto::framing::{FrameError, FrameReader, FrameWriter};
use fernchat_proto::handshake::{HandshakeRequest, Operation};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

// =============================================================================
// Helpers
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn config(addr: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(addr.to_string());
    config.retry_delay = Duration::from_millis(100);
    config
}

fn creds(user: &str, password: &str) -> Credentials {
    Credentials::new(user, password.to_string(), "secret".to_string()).unwrap()
}

async fn start_reference_server() -> SocketAddr {
    let (addr, _handle) = fernchat_server::server::start_server("127.0.0.1:0")
        .await
        .unwrap();
    addr
}

/// A server whose behaviour the test scripts frame by frame.
struct ScriptedServer {
    listener: TcpListener,
}

type ServerSide = (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>);

impl ScriptedServer {
    async fn bind() -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (Self { listener }, addr)
    }

    async fn accept(&self) -> ServerSide {
        let (stream, _) = self.listener.accept().await.unwrap();
        let (r, w) = stream.into_split();
        (
            FrameReader::new(r, DEFAULT_MAX_FRAME_LEN),
            FrameWriter::new(w, DEFAULT_MAX_FRAME_LEN),
        )
    }
}

// =============================================================================
// Tests against the reference server
// =============================================================================

#[tokio::test]
async fn register_then_duplicate_register_is_rejected() {
    let addr = start_reference_server().await;

    let mut first = spawn_session(config(addr));
    first
        .submit_credentials(creds("alice", "pw1"), Intent::Register)
        .unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, first.wait_for_auth())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated);
    assert_eq!(first.auth_result(), AuthResult::Authenticated);

    let mut second = spawn_session(config(addr));
    second
        .submit_credentials(creds("alice", "pw1"), Intent::Register)
        .unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, second.wait_for_auth())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Rejected(RejectReason::AccountExists));
    assert_eq!(
        RejectReason::AccountExists.to_string(),
        "Account already exists."
    );
    assert_ne!(second.link_state(), LinkState::Chatting);
}

#[tokio::test]
async fn wrong_password_then_retry_on_same_connection() {
    let addr = start_reference_server().await;

    let mut owner = spawn_session(config(addr));
    owner
        .submit_credentials(creds("bob", "right"), Intent::Register)
        .unwrap();
    assert_eq!(
        owner.wait_for_auth().await.unwrap(),
        AuthOutcome::Authenticated
    );

    let mut session = spawn_session(config(addr));
    session
        .submit_credentials(creds("bob", "wrong"), Intent::Login)
        .unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, session.wait_for_auth())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Rejected(RejectReason::WrongCredentials));
    assert_eq!(session.link_state(), LinkState::Connected);

    session
        .submit_credentials(creds("bob", "right"), Intent::Login)
        .unwrap();
    let outcome = tokio::time::timeout(TIMEOUT, session.wait_for_auth())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated);

    let mut link = session.subscribe_link();
    link.wait_for(|s| *s == LinkState::Chatting).await.unwrap();

    assert!(matches!(
        session.submit_credentials(creds("bob", "right"), Intent::Login),
        Err(SessionError::AlreadyAuthenticated)
    ));
    assert!(!session.cancel_before_auth());
}

// =============================================================================
// Tests against scripted servers
// =============================================================================

#[tokio::test]
async fn near_miss_status_tokens_are_rejections() {
    let (server, addr) = ScriptedServer::bind().await;
    let mut session = spawn_session(config(addr));

    let script = tokio::spawn(async move {
        let (mut reader, mut writer) = server.accept().await;
        let mut seen = Vec::new();
        for status in ["ok", "OK ", "Ok", "OK"] {
            let request: HandshakeRequest = reader.read_record().await.unwrap();
            seen.push(request);
            writer.write_frame(status.as_bytes()).await.unwrap();
        }
        seen
    });

    for _ in 0..3 {
        session
            .submit_credentials(creds("carol", "pw"), Intent::Login)
            .unwrap();
        assert_eq!(
            session.wait_for_auth().await.unwrap(),
            AuthOutcome::Rejected(RejectReason::WrongCredentials)
        );
    }
    session
        .submit_credentials(creds("carol", "pw"), Intent::Login)
        .unwrap();
    assert_eq!(
        session.wait_for_auth().await.unwrap(),
        AuthOutcome::Authenticated
    );

    let seen = script.await.unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|r| r.operation == Operation::Login));
    assert!(seen.iter().all(|r| r.username == "carol"));
    assert!(seen.iter().all(|r| r.pw_hash.len() == 128));
}

#[tokio::test]
async fn non_utf8_status_ends_session() {
    let (server, addr) = ScriptedServer::bind().await;
    let mut session = spawn_session(config(addr));

    let script = tokio::spawn(async move {
        let (mut reader, mut writer) = server.accept().await;
        let _: HandshakeRequest = reader.read_record().await.unwrap();
        writer.write_frame(&[0xc3, 0x28]).await.unwrap();
        // Keep the connection open; the client must give up on its own.
        let _ = reader.read_frame().await;
    });

    session
        .submit_credentials(creds("dave", "pw"), Intent::Login)
        .unwrap();
    let err = tokio::time::timeout(TIMEOUT, session.wait_for_auth())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::Disconnected { .. }));
    assert!(session.link_state().is_terminal());
    assert_eq!(session.auth_result(), AuthResult::Pending);

    let result = session.join().await;
    assert!(matches!(
        result,
        Err(SessionError::Transport(TransportError::Protocol(_)))
    ));
    script.await.unwrap();
}

#[tokio::test]
async fn cancel_before_auth_never_starts_pump() {
    let (server, addr) = ScriptedServer::bind().await;
    let mut session = spawn_session(config(addr));
    let (request_seen_tx, request_seen_rx) = tokio::sync::oneshot::channel();

    let script = tokio::spawn(async move {
        let (mut reader, _writer) = server.accept().await;
        let _: HandshakeRequest = reader.read_record().await.unwrap();
        request_seen_tx.send(()).unwrap();
        // Never answer. Whatever comes next must be the hangup, not chat.
        reader.read_frame().await
    });

    session.enqueue_outbound("queued before auth").unwrap();
    session
        .submit_credentials(creds("erin", "pw"), Intent::Login)
        .unwrap();
    request_seen_rx.await.unwrap();

    assert!(session.cancel_before_auth());
    let err = session.wait_for_auth().await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(session.link_state(), LinkState::Cancelled);
    assert!(matches!(
        session.submit_credentials(creds("erin", "pw"), Intent::Login),
        Err(SessionError::Cancelled)
    ));

    let after_cancel = tokio::time::timeout(TIMEOUT, script).await.unwrap().unwrap();
    assert!(matches!(after_cancel, Err(FrameError::Closed)));
    assert!(matches!(session.join().await, Err(SessionError::Cancelled)));
}

#[tokio::test]
async fn cancel_after_rejection_is_not_reported_as_rejection() {
    let (server, addr) = ScriptedServer::bind().await;
    let mut session = spawn_session(config(addr));

    let script = tokio::spawn(async move {
        let (mut reader, mut writer) = server.accept().await;
        let _: HandshakeRequest = reader.read_record().await.unwrap();
        writer.write_frame(b"NOT OK").await.unwrap();
        reader.read_frame().await
    });

    session
        .submit_credentials(creds("frank", "pw"), Intent::Login)
        .unwrap();
    assert_eq!(
        tokio::time::timeout(TIMEOUT, session.wait_for_auth())
            .await
            .unwrap()
            .unwrap(),
        AuthOutcome::Rejected(RejectReason::WrongCredentials)
    );

    assert!(session.cancel_before_auth());
    assert_eq!(session.auth_result(), AuthResult::Pending);
    let err = tokio::time::timeout(TIMEOUT, session.wait_for_auth())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));

    let after_cancel = tokio::time::timeout(TIMEOUT, script).await.unwrap().unwrap();
    assert!(matches!(after_cancel, Err(FrameError::Closed)));
}
