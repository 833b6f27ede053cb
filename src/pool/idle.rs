//! Idle-socket keeper tasks
//!
//! Every parked client socket is owned by a keeper task until a consumer
//! claims it. The keeper watches the socket for a client-side close so a
//! dead socket leaves the pool immediately instead of being handed to a
//! request.

use super::socket_pool::PoolShared;
use crate::helper::graceful_end;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::trace;

/// Entry in the available FIFO.
///
/// Sending a reply channel through `claim_tx` asks the keeper to hand over
/// the socket; dropping the slot asks it to tear the socket down.
pub(crate) struct IdleSlot {
    pub(crate) seq: u64,
    pub(crate) claim_tx: oneshot::Sender<oneshot::Sender<TcpStream>>,
}

/// Own a parked socket until it is claimed, evicted, or closed by the peer
pub(crate) async fn keep(
    shared: Arc<PoolShared>,
    seq: u64,
    mut stream: TcpStream,
    mut claim_rx: oneshot::Receiver<oneshot::Sender<TcpStream>>,
) {
    enum Outcome {
        Claim(Result<oneshot::Sender<TcpStream>, oneshot::error::RecvError>),
        PeerClosed,
    }

    let outcome = tokio::select! {
        reply = &mut claim_rx => Outcome::Claim(reply),
        _ = watch_peer(&mut stream) => Outcome::PeerClosed,
    };

    match outcome {
        Outcome::Claim(Ok(reply_tx)) => {
            // Checked out; the acquirer's wrapper now owns the count
            if let Err(stream) = reply_tx.send(stream) {
                // The acquirer vanished between claim and delivery
                shared.release_one();
                graceful_end(stream).await;
            }
        }
        Outcome::Claim(Err(_)) => {
            // Slot dropped: soft-cap eviction or pool close
            trace!(seq, "idle pool socket torn down");
            shared.release_one();
            graceful_end(stream).await;
        }
        Outcome::PeerClosed => {
            trace!(seq, "idle pool socket closed by peer");
            shared.remove_idle(seq);
            shared.release_one();
            // Dropping the stream mirrors the close back to a half-closed
            // peer
        }
    }
}

/// Resolve when the peer closes or errors the socket; pend forever if the
/// peer sends data early (it stays queued for the eventual consumer)
async fn watch_peer(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match stream.peek(&mut buf).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}
