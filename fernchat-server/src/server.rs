//! Server core: account table, connection registry, handshake, and
//! broadcast.
//!
//! Each connection goes through the same lifecycle:
//! 1. Answer handshake requests until one succeeds (or the peer leaves).
//! 2. Join the broadcast registry under the authenticated username.
//! 3. Wrap every ciphertext frame from the peer in an [`Envelope`] stamped
//!    with that username and forward it to every other joined connection.
//! 4. On disconnect, leave the registry.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use fernchat_proto::codec::{self, DEFAULT_MAX_FRAME_LEN};
use fernchat_proto::envelope::Envelope;
use fernchat_proto::framing::{FrameError, FrameReader, FrameWriter};
use fernchat_proto::handshake::{HandshakeRequest, Operation, STATUS_OK, STATUS_REJECTED};

/// Identifies one accepted connection.
pub type ConnectionId = u64;

struct Peer {
    username: String,
    sender: mpsc::UnboundedSender<Arc<[u8]>>,
}

/// Shared server state holding accounts and joined connections.
pub struct ServerState {
    /// Username to password hash. Lives only as long as the process.
    accounts: parking_lot::Mutex<HashMap<String, String>>,
    /// Authenticated connections that receive broadcasts.
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    next_id: AtomicU64,
    max_frame_len: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Empty state with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_LEN)
    }

    /// Empty state with a custom frame limit.
    #[must_use]
    pub fn with_config(max_frame_len: usize) -> Self {
        Self {
            accounts: parking_lot::Mutex::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_frame_len,
        }
    }

    /// Create an account if the name is free.
    pub fn register(&self, username: &str, pw_hash: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(username) {
            return false;
        }
        accounts.insert(username.to_string(), pw_hash.to_string());
        true
    }

    /// Check a password hash against an existing account.
    pub fn login(&self, username: &str, pw_hash: &str) -> bool {
        self.accounts
            .lock()
            .get(username)
            .is_some_and(|stored| stored == pw_hash)
    }

    /// Apply a handshake request to the account table.
    pub fn authenticate(&self, request: &HandshakeRequest) -> bool {
        match request.operation {
            Operation::Register => self.register(&request.username, &request.pw_hash),
            Operation::Login => self.login(&request.username, &request.pw_hash),
        }
    }

    /// Number of registered accounts.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.lock().len()
    }

    /// Add an authenticated connection to the broadcast set.
    pub async fn join(
        &self,
        username: &str,
        sender: mpsc::UnboundedSender<Arc<[u8]>>,
    ) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.write().await.insert(
            id,
            Peer {
                username: username.to_string(),
                sender,
            },
        );
        id
    }

    /// Remove a connection from the broadcast set.
    pub async fn leave(&self, id: ConnectionId) {
        self.peers.write().await.remove(&id);
    }

    /// Number of joined connections.
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Queue `frame` for every joined connection except `from`.
    ///
    /// Returns how many connections it was queued for.
    pub async fn broadcast(&self, from: ConnectionId, frame: &[u8]) -> usize {
        let frame: Arc<[u8]> = Arc::from(frame);
        let peers = self.peers.read().await;
        let mut delivered = 0;
        for (id, peer) in peers.iter() {
            if *id == from {
                continue;
            }
            if peer.sender.send(Arc::clone(&frame)).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(conn = id, username = %peer.username, "peer writer gone");
            }
        }
        delivered
    }
}

/// Serve one accepted connection until it closes.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) {
    let peer_addr = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, state.max_frame_len);
    let mut writer = FrameWriter::new(write_half, state.max_frame_len);

    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<[u8]>>();
    let Some((id, username)) = run_handshake(&mut reader, &mut writer, &state, tx).await else {
        tracing::info!(peer = ?peer_addr, "connection closed before authentication");
        return;
    };
    tracing::info!(conn = id, username = %username, peer = ?peer_addr, "client joined");

    // Writer task: forwards broadcast frames to this client.
    let writer_name = username.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!(username = %writer_name, error = %e, "client write failed");
                break;
            }
        }
    });

    // Reader loop: wrap each ciphertext from this client and broadcast it.
    let reader_name = username.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        relay_frames(id, &reader_name, &mut reader, &reader_state).await;
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.leave(id).await;
    tracing::info!(conn = id, username = %username, "client left");
}

/// Answer handshake requests until one succeeds.
///
/// On success the connection joins the broadcast set before `OK` is sent,
/// so the client never misses a message sent after it saw `OK`. Returns
/// `None` if the peer left or sent something that is not a handshake
/// request.
async fn run_handshake<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    state: &ServerState,
    sender: mpsc::UnboundedSender<Arc<[u8]>>,
) -> Option<(ConnectionId, String)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let request: HandshakeRequest = match reader.read_record().await {
            Ok(request) => request,
            Err(FrameError::Closed) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "malformed handshake, closing");
                return None;
            }
        };

        let accepted = state.authenticate(&request);
        tracing::info!(
            username = %request.username,
            operation = request.operation.as_str(),
            accepted,
            "handshake"
        );

        if !accepted {
            if let Err(e) = writer.write_frame(STATUS_REJECTED.as_bytes()).await {
                tracing::warn!(error = %e, "failed to answer handshake");
                return None;
            }
            continue;
        }

        let id = state.join(&request.username, sender).await;
        if let Err(e) = writer.write_frame(STATUS_OK.as_bytes()).await {
            tracing::warn!(error = %e, "failed to answer handshake");
            state.leave(id).await;
            return None;
        }
        return Some((id, request.username));
    }
}

async fn relay_frames<R>(
    id: ConnectionId,
    username: &str,
    reader: &mut FrameReader<R>,
    state: &ServerState,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(FrameError::Closed) => return,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "client read failed");
                return;
            }
        };

        let Ok(token) = String::from_utf8(frame) else {
            tracing::warn!(conn = id, "dropping non-text ciphertext");
            continue;
        };
        match codec::encode(&Envelope::new(username, token)) {
            Ok(bytes) => {
                let delivered = state.broadcast(id, &bytes).await;
                tracing::trace!(conn = id, delivered, "message relayed");
            }
            Err(e) => tracing::error!(conn = id, error = %e, "failed to encode envelope"),
        }
    }
}

/// Bind `addr` and serve connections in the background with fresh state.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(addr: &str) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Bind `addr` and serve connections in the background with `state`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&state)));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    });

    Ok((bound_addr, handle))
}
