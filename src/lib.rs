//! # Tunnelrat - Reverse HTTP Tunneling Server
//!
//! Tunnelrat is a reverse tunneling server. Remote clients connect inbound
//! to claim a publicly addressable subdomain; public HTTP and WebSocket
//! traffic arriving on that subdomain is relayed back through the client's
//! own TCP connections.
//!
//! ## Features
//!
//! - **Per-tunnel socket pools**: idle return-path sockets are parked in a
//!   FIFO and matched to public requests in arrival order
//! - **Backpressure and eviction**: a soft cap bounds idle sockets (oldest
//!   evicted) and a hard cap bounds everything accepted
//! - **Raw relaying**: request heads are forwarded byte-exact; upgrade
//!   streams are spliced opaquely in both directions
//! - **Grace-period watchdog**: tunnels whose client never connects, or
//!   drops away, are closed and reaped automatically
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tunnelrat::config::ServerConfig;
//! use tunnelrat::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Browser -> tunnelrat (public port) -> pool socket -> tunnel client -> local app
//! ```
//!
//! The [`registry::Registry`] maps subdomains to [`tunnel::Tunnel`]s, each
//! of which owns a [`pool::SocketPool`] listening on its own OS-assigned
//! port for the remote client's inbound sockets.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod helper;
pub mod http;
pub mod pool;
pub mod registry;
pub mod server;
pub mod tunnel;

// Re-export commonly used items
pub use config::{load_config, ServerConfig};
pub use error::TunnelError;
pub use registry::{Registry, RegistryOptions};
pub use server::{run_server, TunnelServer};

/// Version of the tunnelrat library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
