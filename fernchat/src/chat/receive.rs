//! Inbound half of the message pump.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use fernchat_proto::codec;
use fernchat_proto::envelope::Envelope;
use fernchat_proto::framing::FrameReader;

use crate::crypto::CryptoSession;
use crate::transport::TransportError;

use super::{ChannelExit, display_line};

/// Read envelopes from `reader` and push decrypted lines onto `inbound`.
///
/// Envelopes that do not decrypt under the session key are dropped and
/// the loop keeps reading. A read failure or a frame that is not an
/// envelope ends the loop with [`ChannelExit::Disconnected`]; a dropped
/// `inbound` receiver ends it with [`ChannelExit::Shutdown`].
pub async fn inbound_loop<C, R>(
    crypto: Arc<C>,
    mut reader: FrameReader<R>,
    inbound: mpsc::Sender<String>,
) -> ChannelExit
where
    C: CryptoSession + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut delivered: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        let envelope = match read_envelope(&mut reader).await {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(delivered, dropped, err = %err, "inbound read failed");
                return ChannelExit::Disconnected(err);
            }
        };

        let plaintext = match crypto.decrypt(&envelope.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(failure) => {
                dropped += 1;
                tracing::trace!(sender = %envelope.sender, kind = ?failure.kind, "dropping undecryptable message");
                continue;
            }
        };

        if inbound.send(display_line(&envelope.sender, &plaintext)).await.is_err() {
            tracing::debug!(delivered, dropped, "inbound queue closed");
            return ChannelExit::Shutdown;
        }
        delivered += 1;
    }
}

async fn read_envelope<R>(reader: &mut FrameReader<R>) -> Result<Envelope, TransportError>
where
    R: AsyncRead + Unpin,
{
    let frame = reader.read_frame().await?;
    Ok(codec::decode(&frame)?)
}
