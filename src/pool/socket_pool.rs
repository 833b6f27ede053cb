//! Socket pool implementation
//!
//! Tracks every socket the remote tunnel client has opened, matches them to
//! public-request consumers, and emits online/offline edges as the count
//! crosses zero.

use super::idle::{self, IdleSlot};
use super::stream::PoolStream;
use super::PoolEvent;
use crate::error::TunnelError;
use crate::helper::graceful_end;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace, warn};

/// Socket pool limits and bind address
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of sockets the remote client is expected to keep open; also
    /// the cap on parked idle sockets
    pub max_client_sockets: usize,
    /// Hard cap on concurrently accepted sockets
    pub max_tcp_sockets: usize,
    /// Address the pool listener binds on
    pub bind_address: IpAddr,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_client_sockets: 10,
            max_tcp_sockets: 20,
            bind_address: IpAddr::from([0, 0, 0, 0]),
        }
    }
}

impl PoolOptions {
    /// Build options from the configured per-client socket budget; the hard
    /// cap is twice the budget
    pub fn with_limit(max_client_sockets: usize, bind_address: IpAddr) -> Self {
        PoolOptions {
            max_client_sockets,
            max_tcp_sockets: max_client_sockets * 2,
            bind_address,
        }
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sockets currently accepted and not yet closed, idle or checked out
    pub connected_sockets: usize,
}

/// State shared between the pool handle, its accept loop, the idle-socket
/// keepers, and checked-out [`PoolStream`]s
pub(crate) struct PoolShared {
    opts: PoolOptions,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    inner: Mutex<PoolInner>,
    started: AtomicBool,
    shutdown: Notify,
}

struct PoolInner {
    connected: usize,
    available: VecDeque<IdleSlot>,
    pending: VecDeque<oneshot::Sender<Result<PoolStream, TunnelError>>>,
    closed: bool,
    next_seq: u64,
}

/// Per-tunnel pool of inbound client sockets.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct SocketPool {
    shared: Arc<PoolShared>,
}

impl SocketPool {
    /// Create a pool and the receiver for its online/offline events
    pub fn new(opts: PoolOptions) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            opts,
            event_tx,
            inner: Mutex::new(PoolInner {
                connected: 0,
                available: VecDeque::new(),
                pending: VecDeque::new(),
                closed: false,
                next_seq: 0,
            }),
            started: AtomicBool::new(false),
            shutdown: Notify::new(),
        });
        (SocketPool { shared }, event_rx)
    }

    /// Begin listening for client sockets on an OS-assigned port.
    ///
    /// Returns the bound port. A second call fails with
    /// [`TunnelError::AlreadyStarted`].
    pub async fn start(&self) -> Result<u16, TunnelError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(TunnelError::AlreadyStarted);
        }

        let listener = TcpListener::bind((self.shared.opts.bind_address, 0))
            .await
            .map_err(TunnelError::Listen)?;
        let port = listener.local_addr().map_err(TunnelError::Listen)?.port();

        let shared = Arc::clone(&self.shared);
        tokio::spawn(accept_loop(shared, listener));

        debug!(port, "socket pool listening");
        Ok(port)
    }

    /// Hand the caller a client socket.
    ///
    /// Pops the available FIFO if a socket is idle; otherwise parks until
    /// one arrives or the pool closes. Consumers are served strictly in
    /// arrival order.
    pub async fn acquire(&self) -> Result<PoolStream, TunnelError> {
        loop {
            enum Next {
                Claim(IdleSlot),
                Park(oneshot::Receiver<Result<PoolStream, TunnelError>>),
            }

            let next = {
                let mut inner = self.shared.inner.lock().unwrap();
                if inner.closed {
                    return Err(TunnelError::PoolClosed);
                }
                if let Some(slot) = inner.available.pop_front() {
                    Next::Claim(slot)
                } else {
                    let (tx, rx) = oneshot::channel();
                    inner.pending.push_back(tx);
                    Next::Park(rx)
                }
            };

            match next {
                Next::Claim(slot) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if slot.claim_tx.send(reply_tx).is_err() {
                        // The keeper saw the peer close first; try the next one
                        continue;
                    }
                    match reply_rx.await {
                        Ok(stream) => {
                            return Ok(PoolStream::new(stream, Arc::clone(&self.shared)))
                        }
                        Err(_) => continue,
                    }
                }
                Next::Park(rx) => {
                    return match rx.await {
                        Ok(res) => res,
                        Err(_) => Err(TunnelError::PoolClosed),
                    };
                }
            }
        }
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock().unwrap();
        PoolStats {
            connected_sockets: inner.connected,
        }
    }

    /// Stop the listener, gracefully end every idle socket, and fail every
    /// parked consumer with [`TunnelError::PoolClosed`]. Idempotent.
    ///
    /// Checked-out sockets keep serving their in-flight requests; their
    /// counts drain as the handlers finish.
    pub fn close(&self) {
        let (waiters, slots) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            (
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.available),
            )
        };

        self.shared.shutdown.notify_one();

        for waiter in waiters {
            let _ = waiter.send(Err(TunnelError::PoolClosed));
        }
        // Dropping the slots unparks each keeper, which gracefully ends its
        // socket and releases its count
        drop(slots);

        debug!("socket pool closed");
    }
}

impl PoolShared {
    /// Register a freshly accepted client socket
    fn admit(self: &Arc<Self>, stream: TcpStream) {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed || inner.connected >= self.opts.max_tcp_sockets {
            drop(inner);
            trace!("rejecting inbound pool socket");
            tokio::spawn(graceful_end(stream));
            return;
        }

        inner.connected += 1;
        if inner.connected == 1 {
            let _ = self.event_tx.send(PoolEvent::Online);
        }

        if let Some(waiter) = inner.pending.pop_front() {
            drop(inner);
            let delivered = PoolStream::new(stream, Arc::clone(self));
            // A failed send means the consumer gave up while parked; the
            // dropped stream releases its count
            let _ = waiter.send(Ok(delivered));
            return;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let (claim_tx, claim_rx) = oneshot::channel();
        inner.available.push_back(IdleSlot { seq, claim_tx });

        // The client is not expected to exceed its socket budget; a surplus
        // idle socket means a close was lost somewhere, and the oldest one
        // is the most suspect
        let evicted = if inner.available.len() > self.opts.max_client_sockets {
            inner.available.pop_front()
        } else {
            None
        };
        drop(inner);

        if let Some(slot) = evicted {
            debug!(seq = slot.seq, "evicting oldest idle pool socket");
            drop(slot);
        }

        tokio::spawn(idle::keep(Arc::clone(self), seq, stream, claim_rx));
    }

    /// Drop one socket from the connected count, emitting `Offline` on the
    /// transition to zero
    pub(crate) fn release_one(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.connected == 0 {
            return;
        }
        inner.connected -= 1;
        if inner.connected == 0 && !inner.closed {
            let _ = self.event_tx.send(PoolEvent::Offline);
        }
    }

    /// Remove an idle slot by sequence number, if it is still parked
    pub(crate) fn remove_idle(&self, seq: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.available.retain(|slot| slot.seq != seq);
    }
}

async fn accept_loop(shared: Arc<PoolShared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => break,
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    trace!(%peer, "pool socket accepted");
                    let _ = stream.set_nodelay(true);
                    shared.admit(stream);
                }
                Err(e) if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::TimedOut
                ) => {
                    trace!("transient accept error: {}", e);
                }
                Err(e) => {
                    warn!("pool listener error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
    trace!("pool accept loop stopped");
}
