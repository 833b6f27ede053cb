//! Tunnel sessions
//!
//! A tunnel binds a subdomain identity to a [`SocketPool`] and exposes the
//! two relay operations the public dispatcher needs: forwarding an HTTP
//! request over a pool socket, and splicing an upgrade stream. A watchdog
//! task drives the lifecycle state machine, closing tunnels whose remote
//! client never connected or dropped away past the grace period.

mod state;

pub use state::TunnelState;

use crate::error::TunnelError;
use crate::helper::{graceful_end, relay_streams};
use crate::http::RequestHead;
use crate::pool::{PoolEvent, PoolStats, SocketPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info};

/// Grace periods governing a tunnel's lifecycle
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// How long a fresh tunnel may wait for the client's first socket
    pub first_connect_grace: Duration,
    /// How long a tunnel may sit with zero sockets before it is closed
    pub offline_grace: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        TunnelOptions {
            first_connect_grace: Duration::from_secs(5),
            offline_grace: Duration::from_secs(1),
        }
    }
}

/// A named session bound to a socket pool
pub struct Tunnel {
    id: String,
    generation: u64,
    pool: SocketPool,
    state_rx: watch::Receiver<TunnelState>,
    close_notify: Arc<Notify>,
    closing: AtomicBool,
}

impl Tunnel {
    /// Create a tunnel over `pool` and spawn its lifecycle watchdog.
    ///
    /// `events` is the pool's online/offline stream. Once the tunnel
    /// reaches its terminal state, `(id, generation)` is sent on
    /// `closed_tx`; the generation distinguishes this tunnel from any
    /// earlier or later holder of the same id.
    pub fn new(
        id: String,
        generation: u64,
        pool: SocketPool,
        events: mpsc::UnboundedReceiver<PoolEvent>,
        opts: TunnelOptions,
        closed_tx: mpsc::UnboundedSender<(String, u64)>,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(TunnelState::PendingFirstConnect);
        let close_notify = Arc::new(Notify::new());

        let tunnel = Arc::new(Tunnel {
            id: id.clone(),
            generation,
            pool: pool.clone(),
            state_rx,
            close_notify: Arc::clone(&close_notify),
            closing: AtomicBool::new(false),
        });

        tokio::spawn(watchdog(
            id,
            generation,
            pool,
            events,
            opts,
            state_tx,
            close_notify,
            closed_tx,
        ));

        tunnel
    }

    /// The tunnel's id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The tunnel's generation, unique among tunnels that ever held its id
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current lifecycle state
    pub fn state(&self) -> TunnelState {
        *self.state_rx.borrow()
    }

    /// Current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Tear the tunnel down. Idempotent.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close();
        self.close_notify.notify_one();
    }

    /// Forward a public HTTP request through a pool socket.
    ///
    /// The request head is written to the socket exactly as received, along
    /// with any body bytes already buffered, then both directions are
    /// spliced until either side finishes. If no socket can be acquired the
    /// public connection is dropped without a response.
    pub async fn handle_request(
        &self,
        head: &RequestHead,
        mut public: TcpStream,
    ) -> Result<(), TunnelError> {
        let mut upstream = match self.pool.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(id = %self.id, "dropping request, no pool socket: {}", e);
                return Ok(());
            }
        };

        upstream.write_all(&head.raw).await?;
        if !head.buffered.is_empty() {
            upstream.write_all(&head.buffered).await?;
        }
        upstream.flush().await?;

        let (up, down) = relay_streams(&mut public, &mut upstream).await?;
        debug!(id = %self.id, up, down, "request relay finished");
        Ok(())
    }

    /// Service an HTTP upgrade (WebSocket) on a pool socket.
    ///
    /// The request head is reconstructed from its parsed parts and written
    /// to the socket, then bytes are spliced in both directions until
    /// either side closes. If no socket can be acquired the public socket
    /// is gracefully ended.
    pub async fn handle_upgrade(
        &self,
        head: &RequestHead,
        mut public: TcpStream,
    ) -> Result<(), TunnelError> {
        let mut upstream = match self.pool.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(id = %self.id, "ending upgrade, no pool socket: {}", e);
                graceful_end(public).await;
                return Ok(());
            }
        };

        upstream.write_all(&head.to_wire()).await?;
        if !head.buffered.is_empty() {
            upstream.write_all(&head.buffered).await?;
        }
        upstream.flush().await?;

        let (up, down) = relay_streams(&mut public, &mut upstream).await?;
        debug!(id = %self.id, up, down, "upgrade relay finished");
        Ok(())
    }
}

enum Step {
    Event(Option<PoolEvent>),
    Expired,
    Close,
}

/// Drive the lifecycle state machine until the tunnel closes.
///
/// Each state arms at most one grace timer; re-entering a state re-arms a
/// fresh one, so timers are single-shot by construction.
async fn watchdog(
    id: String,
    generation: u64,
    pool: SocketPool,
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
    opts: TunnelOptions,
    state_tx: watch::Sender<TunnelState>,
    close_notify: Arc<Notify>,
    closed_tx: mpsc::UnboundedSender<(String, u64)>,
) {
    let mut state = TunnelState::PendingFirstConnect;

    loop {
        let step = match state {
            TunnelState::PendingFirstConnect => tokio::select! {
                _ = close_notify.notified() => Step::Close,
                ev = events.recv() => Step::Event(ev),
                _ = tokio::time::sleep(opts.first_connect_grace) => Step::Expired,
            },
            TunnelState::Offline => tokio::select! {
                _ = close_notify.notified() => Step::Close,
                ev = events.recv() => Step::Event(ev),
                _ = tokio::time::sleep(opts.offline_grace) => Step::Expired,
            },
            TunnelState::Online => tokio::select! {
                _ = close_notify.notified() => Step::Close,
                ev = events.recv() => Step::Event(ev),
            },
            TunnelState::Closed => break,
        };

        state = match step {
            Step::Event(Some(PoolEvent::Online)) => {
                debug!(id = %id, "tunnel online");
                TunnelState::Online
            }
            Step::Event(Some(PoolEvent::Offline)) => {
                debug!(id = %id, "tunnel offline");
                TunnelState::Offline
            }
            Step::Event(None) => TunnelState::Closed,
            Step::Expired => {
                info!(id = %id, "tunnel grace period expired");
                TunnelState::Closed
            }
            Step::Close => TunnelState::Closed,
        };
        let _ = state_tx.send(state);
    }

    pool.close();
    let _ = closed_tx.send((id.clone(), generation));
    debug!(id = %id, "tunnel closed");
}
