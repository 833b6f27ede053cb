//! Error types for tunnelrat
//!
//! This module defines the typed errors surfaced by the tunnel core.

use std::io;
use thiserror::Error;

/// Main error type for tunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The socket pool has been closed; no sockets will ever be delivered
    #[error("socket pool is closed")]
    PoolClosed,

    /// The socket pool listener was started twice
    #[error("socket pool already started")]
    AlreadyStarted,

    /// Binding the pool listener failed
    #[error("failed to bind pool listener: {0}")]
    Listen(#[source] io::Error),

    /// The request head could not be parsed as HTTP/1.x
    #[error("malformed request head")]
    MalformedHead,

    /// The request head did not fit in the read buffer
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The peer closed the connection before a full head arrived
    #[error("connection closed before request head completed")]
    TruncatedHead,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Whether this error represents ordinary client churn that callers
    /// swallow rather than log
    pub fn is_churn(&self) -> bool {
        match self {
            TunnelError::Io(e) | TunnelError::Listen(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::TimedOut
            ),
            TunnelError::TruncatedHead => true,
            _ => false,
        }
    }
}
