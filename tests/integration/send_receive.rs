// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the message pump after authentication.
//!
//! A scripted server accepts the handshake and then plays the relay's
//! part frame by frame, so the tests can check exactly what the client
//! put on the wire and what it shows for each inbound envelope.
//!
//! These tests validate:
//! - Messages queued before authentication go out once, in order, each
//!   as its own frame of ciphertext.
//! - Envelopes that do not decrypt under the session key are skipped
//!   without ending the session.
//! - The server hanging up ends the session with a disconnect.
//! - A message too large for one frame is refused at the queue and the
//!   session keeps chatting.

use std::net::SocketAddr;
use std::time::Duration;

use fernchat::auth::{AuthOutcome, Credentials, Intent};
use fernchat::crypto::fernet::{decrypt, derive_key, encrypt};
use fernchat::session::{LinkState, SessionConfig, SessionError, spawn_session};
use fernchat_proto::codec::DEFAULT_MAX_FRAME_LEN;
use fernchat_proto::envelope::Envelope;
use fernchat_proto::framing::{FrameReader, FrameWriter};
use fernchat_proto::handshake::{HandshakeRequest, STATUS_OK};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const TIMEOUT: Duration = Duration::from_secs(10);

type ServerSide = (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>);

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accept one client and answer its first handshake with `OK`.
async fn accept_and_authenticate(listener: &TcpListener) -> ServerSide {
    let (stream, _) = listener.accept().await.unwrap();
    let (r, w) = stream.into_split();
    let mut reader = FrameReader::new(r, DEFAULT_MAX_FRAME_LEN);
    let mut writer = FrameWriter::new(w, DEFAULT_MAX_FRAME_LEN);
    let _: HandshakeRequest = reader.read_record().await.unwrap();
    writer.write_frame(STATUS_OK.as_bytes()).await.unwrap();
    (reader, writer)
}

fn config(addr: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(addr.to_string());
    config.retry_delay = Duration::from_millis(100);
    config
}

fn creds(passphrase: &str) -> Credentials {
    Credentials::new("alice", "pw".to_string(), passphrase.to_string()).unwrap()
}

#[tokio::test]
async fn queued_messages_go_out_in_order_as_separate_frames() {
    let (listener, addr) = bind().await;
    let mut session = spawn_session(config(addr));

    for text in ["m1", "m2", "m3"] {
        session.enqueue_outbound(text).unwrap();
    }
    session
        .submit_credentials(creds("secret"), Intent::Login)
        .unwrap();

    let (mut reader, _writer) = accept_and_authenticate(&listener).await;
    assert_eq!(
        session.wait_for_auth().await.unwrap(),
        AuthOutcome::Authenticated
    );

    let key = derive_key("secret");
    let mut received = Vec::new();
    for _ in 0..3 {
        let frame = tokio::time::timeout(TIMEOUT, reader.read_frame())
            .await
            .unwrap()
            .unwrap();
        let token = String::from_utf8(frame).unwrap();
        assert!(token.starts_with("gAAAAA"), "frame must carry a Fernet token");
        received.push(decrypt(&token, &key).unwrap());
    }
    assert_eq!(received, ["m1", "m2", "m3"]);

    // Nothing else was sent.
    let extra = tokio::time::timeout(Duration::from_millis(200), reader.read_frame()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn undecryptable_envelope_is_skipped() {
    let (listener, addr) = bind().await;
    let mut session = spawn_session(config(addr));
    session
        .submit_credentials(creds("secret"), Intent::Login)
        .unwrap();

    let (_reader, mut writer) = accept_and_authenticate(&listener).await;
    session.wait_for_auth().await.unwrap();

    let foreign = encrypt("not for you", &derive_key("other")).unwrap();
    let ours = encrypt("hello", &derive_key("secret")).unwrap();
    writer
        .write_record(&Envelope::new("mallory", foreign))
        .await
        .unwrap();
    writer
        .write_record(&Envelope::new("bob", "definitely not a token"))
        .await
        .unwrap();
    writer.write_record(&Envelope::new("bob", ours)).await.unwrap();

    let line = tokio::time::timeout(TIMEOUT, session.next_inbound())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, "bob: hello");
    assert!(session.drain_inbound().is_empty());
    assert_eq!(session.link_state(), LinkState::Chatting);
}

#[tokio::test]
async fn server_hangup_ends_session() {
    let (listener, addr) = bind().await;
    let mut session = spawn_session(config(addr));
    session
        .submit_credentials(creds("secret"), Intent::Login)
        .unwrap();

    let (reader, writer) = accept_and_authenticate(&listener).await;
    session.wait_for_auth().await.unwrap();
    drop((reader, writer));

    let mut link = session.subscribe_link();
    let state = tokio::time::timeout(TIMEOUT, link.wait_for(LinkState::is_terminal))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(state, LinkState::Disconnected { .. }));

    // The inbound queue closes once the pump is gone.
    assert!(session.next_inbound().await.is_none());
    assert!(matches!(session.join().await, Err(SessionError::Transport(_))));
}

#[tokio::test]
async fn message_too_large_for_a_frame_leaves_session_usable() {
    let (listener, addr) = bind().await;
    let mut config = config(addr);
    config.max_frame_len = 400;
    config.max_message_len = 1000;
    let mut session = spawn_session(config);
    session
        .submit_credentials(creds("secret"), Intent::Login)
        .unwrap();

    let (mut reader, _writer) = accept_and_authenticate(&listener).await;
    session.wait_for_auth().await.unwrap();

    assert!(matches!(
        session.enqueue_outbound("x".repeat(500)),
        Err(SessionError::MessageTooLarge { .. })
    ));
    session.enqueue_outbound("hi").unwrap();

    let frame = tokio::time::timeout(TIMEOUT, reader.read_frame())
        .await
        .unwrap()
        .unwrap();
    let token = String::from_utf8(frame).unwrap();
    assert_eq!(decrypt(&token, &derive_key("secret")).unwrap(), "hi");
    assert_eq!(session.link_state(), LinkState::Chatting);
}
