//! `FernChat`: line-oriented chat client with passphrase-encrypted messages.
//!
//! Connects to a chat server, asks for credentials on stdin, and then
//! prints received lines while forwarding typed ones. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/fernchat/config.toml`).
//!
//! ```bash
//! # Default server (localhost:55555)
//! cargo run --bin fernchat
//!
//! # Another server
//! cargo run --bin fernchat -- --host chat.example.com --port 4000
//! FERNCHAT_HOST=chat.example.com FERNCHAT_PORT=4000 cargo run --bin fernchat
//! ```

use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_appender::non_blocking::WorkerGuard;

use fernchat::auth::{AuthOutcome, Credentials, Intent};
use fernchat::config::{CliArgs, ClientConfig};
use fernchat::session::{LinkState, SessionError, SessionHandle, spawn_session};

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they never interleave with the chat on stdout.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(server = %config.server_addr(), "fernchat starting");

    let mut session = spawn_session(config.to_session_config());
    let notices = tokio::spawn(print_link_notices(session.subscribe_link()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let code = match authenticate(&mut session, &mut lines).await {
        Ok(true) => {
            chat(&mut session, &mut lines).await;
            ExitCode::SUCCESS
        }
        Ok(false) => {
            session.cancel_before_auth();
            ExitCode::FAILURE
        }
        Err(e) => {
            println!("{e}");
            ExitCode::FAILURE
        }
    };

    drop(session);
    notices.abort();
    tracing::info!("fernchat exiting");
    code
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("fernchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Print connection notices until the session ends.
async fn print_link_notices(mut link: tokio::sync::watch::Receiver<LinkState>) {
    while link.changed().await.is_ok() {
        let state = link.borrow_and_update().clone();
        match state {
            LinkState::Retrying { .. } => println!("Connection refused, retrying..."),
            LinkState::Disconnected { reason } => {
                println!("Disconnected: {reason}");
                return;
            }
            LinkState::Cancelled => return,
            LinkState::Connecting | LinkState::Connected | LinkState::Chatting => {}
        }
    }
}

/// Run the login form until the server accepts the credentials.
///
/// Returns `Ok(false)` if stdin closed first.
async fn authenticate(
    session: &mut SessionHandle,
    lines: &mut StdinLines,
) -> Result<bool, SessionError> {
    loop {
        let Some(choice) = prompt(lines, "Login or register? [l/r]: ").await else {
            return Ok(false);
        };
        let intent = match choice.trim().to_ascii_lowercase().as_str() {
            "l" | "login" | "" => Intent::Login,
            "r" | "register" => Intent::Register,
            other => {
                println!("Unknown choice {other:?}.");
                continue;
            }
        };

        let Some(username) = prompt(lines, "Username: ").await else {
            return Ok(false);
        };
        let Some(password) = prompt(lines, "Password: ").await else {
            return Ok(false);
        };
        let Some(passphrase) = prompt(lines, "Encryption passphrase: ").await else {
            return Ok(false);
        };

        let credentials = match Credentials::new(username.trim(), password, passphrase) {
            Ok(c) => c,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let username = credentials.username().to_string();

        session.submit_credentials(credentials, intent)?;
        match session.wait_for_auth().await? {
            AuthOutcome::Authenticated => {
                println!("Logged in as {username}. Type to chat, Ctrl-D to quit.");
                return Ok(true);
            }
            AuthOutcome::Rejected(reason) => println!("{reason}"),
        }
    }
}

/// Forward typed lines and print received ones until either side ends.
async fn chat(session: &mut SessionHandle, lines: &mut StdinLines) {
    enum Event {
        Typed(Option<String>),
        Received(Option<String>),
    }

    loop {
        let event = tokio::select! {
            line = lines.next_line() => Event::Typed(line.ok().flatten()),
            received = session.next_inbound() => Event::Received(received),
        };

        match event {
            Event::Typed(None) | Event::Received(None) => return,
            Event::Typed(Some(text)) if text.is_empty() => {}
            Event::Typed(Some(text)) => match session.enqueue_outbound(text.as_str()) {
                Ok(()) => println!("you: {text}"),
                Err(SessionError::Closed) => return,
                Err(e) => println!("{e}"),
            },
            Event::Received(Some(line)) => println!("{line}"),
        }
    }
}

async fn prompt(lines: &mut StdinLines, label: &str) -> Option<String> {
    print!("{label}");
    let _ = std::io::stdout().flush();
    lines.next_line().await.ok().flatten()
}
