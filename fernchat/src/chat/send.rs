//! Outbound half of the message pump.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use fernchat_proto::framing::{FrameError, FrameWriter};

use crate::crypto::CryptoSession;
use crate::transport::TransportError;

use super::ChannelExit;

/// Upper bound on messages taken from the queue per wakeup.
const BATCH_LIMIT: usize = 64;

/// Drain `outbound` into `writer` until the queue closes or a write fails.
///
/// Each wakeup takes every queued message (up to [`BATCH_LIMIT`]) and
/// writes them one frame each, in order, waiting for each write to be
/// flushed before encrypting the next. A message whose token is too large
/// for one frame is dropped and the loop carries on.
pub async fn outbound_loop<C, W>(
    crypto: Arc<C>,
    mut writer: FrameWriter<W>,
    mut outbound: mpsc::Receiver<String>,
) -> ChannelExit
where
    C: CryptoSession + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(BATCH_LIMIT);
    let mut sent: u64 = 0;

    loop {
        if outbound.recv_many(&mut batch, BATCH_LIMIT).await == 0 {
            tracing::debug!(sent, "outbound queue closed");
            let _ = writer.shutdown().await;
            return ChannelExit::Shutdown;
        }

        for plaintext in batch.drain(..) {
            let token = match crypto.encrypt(&plaintext) {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(err = %e, "failed to encrypt outbound message, dropping");
                    continue;
                }
            };

            match writer.write_frame(token.as_bytes()).await {
                Ok(()) => {}
                Err(FrameError::Codec(e)) => {
                    tracing::warn!(len = token.len(), err = %e, "outbound message does not fit in a frame, dropping");
                    continue;
                }
                Err(e) => {
                    let err = TransportError::from(e);
                    tracing::warn!(sent, err = %err, "outbound write failed");
                    return ChannelExit::Disconnected(err);
                }
            }
            sent += 1;
            tracing::trace!(sent, len = token.len(), "message sent");
        }
    }
}
