// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for connecting to a server that is not up yet.
//!
//! These tests validate:
//! - A refused connection is retried, publishing one `Retrying` notice
//!   per refused attempt, until the server appears.
//! - The default retry delay is honoured between attempts.
//! - Credentials submitted while retrying are used once connected.

use std::time::{Duration, Instant};

use fernchat::auth::{AuthOutcome, Credentials, Intent};
use fernchat::session::{LinkState, SessionConfig, spawn_session};
use fernchat::transport::connect::DEFAULT_RETRY_DELAY;
use tokio::sync::watch;

/// An address nothing listens on right now.
fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Record every distinct link state until `Connected` (or later) shows up.
async fn collect_until_connected(mut link: watch::Receiver<LinkState>) -> Vec<LinkState> {
    let mut seen = vec![link.borrow_and_update().clone()];
    while link.changed().await.is_ok() {
        let state = link.borrow_and_update().clone();
        let done = matches!(state, LinkState::Connected | LinkState::Chatting);
        seen.push(state);
        if done {
            break;
        }
    }
    seen
}

fn retry_attempts(states: &[LinkState]) -> Vec<u32> {
    states
        .iter()
        .filter_map(|s| match s {
            LinkState::Retrying { attempt } => Some(*attempt),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn retries_with_default_delay_until_server_appears() {
    let addr = free_addr();
    let session = spawn_session(SessionConfig::new(addr.clone()));
    let started = Instant::now();
    let watcher = tokio::spawn(collect_until_connected(session.subscribe_link()));

    // Come up between the second and third attempt.
    tokio::time::sleep(DEFAULT_RETRY_DELAY + Duration::from_millis(1500)).await;
    let (bound, _server) = fernchat_server::server::start_server(&addr).await.unwrap();
    assert_eq!(bound.to_string(), addr);

    let states = tokio::time::timeout(Duration::from_secs(15), watcher)
        .await
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();

    let attempts = retry_attempts(&states);
    assert!(attempts.len() >= 2, "expected two refusals, saw {states:?}");
    assert_eq!(attempts[..2], [1, 2]);
    assert_eq!(states.last(), Some(&LinkState::Connected));
    assert!(
        elapsed >= DEFAULT_RETRY_DELAY * 2,
        "connected after {elapsed:?}, before the second delay elapsed"
    );
}

#[tokio::test]
async fn credentials_submitted_while_retrying_are_used() {
    let addr = free_addr();
    let mut config = SessionConfig::new(addr.clone());
    config.retry_delay = Duration::from_millis(50);
    let mut session = spawn_session(config);

    let credentials = Credentials::new("alice", "pw".to_string(), "secret".to_string()).unwrap();
    session
        .submit_credentials(credentials, Intent::Register)
        .unwrap();

    let mut link = session.subscribe_link();
    link.wait_for(|s| matches!(s, LinkState::Retrying { attempt } if *attempt >= 3))
        .await
        .unwrap();

    let (_bound, _server) = fernchat_server::server::start_server(&addr).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), session.wait_for_auth())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated);
}
