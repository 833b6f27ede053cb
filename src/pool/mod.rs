//! Per-tunnel socket pool
//!
//! Each tunnel owns a pool of inbound TCP sockets opened by its remote
//! client. The pool listens on an OS-assigned port, parks idle sockets in a
//! FIFO, parks consumers in a FIFO when no socket is idle, and enforces a
//! soft cap (oldest idle socket evicted) and a hard cap (surplus accepts
//! closed immediately).

mod idle;
mod socket_pool;
mod stream;

pub use socket_pool::{PoolOptions, PoolStats, SocketPool};
pub use stream::PoolStream;

/// Edge events emitted as the pool's connected-socket count crosses zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// The count went from zero to one
    Online,
    /// The count returned to zero
    Offline,
}
