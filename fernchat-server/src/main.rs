//! `FernChat` reference server.
//!
//! Accepts chat clients over TCP, keeps accounts in memory, and relays
//! every ciphertext to all other authenticated clients. The server never
//! holds a passphrase and cannot read messages.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:55555
//! cargo run --bin fernchat-server
//!
//! # Run on custom address
//! cargo run --bin fernchat-server -- --bind 127.0.0.1:4000
//! FERNCHAT_SERVER_ADDR=127.0.0.1:4000 cargo run --bin fernchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use fernchat_server::config::{ServerCliArgs, ServerConfig};
use fernchat_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(addr = %config.bind_addr, "starting fernchat server");

    let state = Arc::new(ServerState::with_config(config.max_frame_len));
    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
