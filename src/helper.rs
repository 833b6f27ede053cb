//! Helper utilities for tunnelrat
//!
//! Common primitives shared by the pool, the tunnel relay paths, and the
//! control plane.

use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How long a graceful close waits for the peer's FIN before forcing the
/// socket down
pub const GRACEFUL_END_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of hex characters in a server-generated tunnel id
pub const GENERATED_ID_LEN: usize = 10;

/// Gracefully close a socket: send FIN, then drain the read side until the
/// peer closes or [`GRACEFUL_END_TIMEOUT`] elapses, then drop.
///
/// Every pool-owned close path funnels through this so a well-behaved client
/// sees an orderly shutdown while a stuck one cannot pin the socket open.
pub async fn graceful_end<S>(mut stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = stream.shutdown().await;

    let drain = async {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    let _ = tokio::time::timeout(GRACEFUL_END_TIMEOUT, drain).await;
}

/// Relay bytes in both directions until either side reaches EOF or errors.
///
/// Both streams are dropped on return, so a failure on one side tears down
/// the other.
pub async fn relay_streams<A, B>(a: &mut A, b: &mut B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(a, b).await
}

/// Generate a random lowercase-hex tunnel id
pub fn random_id() -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..GENERATED_ID_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

/// Read the process resident set size in bytes, or zero where unavailable
pub fn process_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss_pages) = statm.split_whitespace().nth(1) {
                if let Ok(pages) = rss_pages.parse::<u64>() {
                    return pages * 4096;
                }
            }
        }
    }
    0
}
