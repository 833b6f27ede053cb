//! Public-facing server
//!
//! Owns the main HTTP listener and routes every inbound connection: tunnel
//! subdomains go to the matching tunnel's relay handlers, everything else to
//! the control-plane routes.

mod api;
mod host;

pub use host::{DomainResolver, HostnameExtractor};

use crate::config::ServerConfig;
use crate::http::{build_response, read_request_head};
use crate::registry::{Registry, RegistryOptions};
use crate::tunnel::TunnelOptions;
use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A bound public server, ready to serve
pub struct TunnelServer {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    extractor: Arc<dyn HostnameExtractor>,
    listener: TcpListener,
}

impl TunnelServer {
    /// Bind the main HTTP listener and build the registry and default
    /// hostname extractor from `config`
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let bind_address: IpAddr = config
            .address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", config.address))?;

        let registry = Registry::new(RegistryOptions {
            max_sockets: config.max_sockets,
            bind_address,
            tunnel: TunnelOptions::default(),
        });
        let extractor: Arc<dyn HostnameExtractor> =
            Arc::new(DomainResolver::new(config.domain.clone()));

        let listener = TcpListener::bind((bind_address, config.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", config.address, config.port))?;

        Ok(TunnelServer {
            config: Arc::new(config),
            registry,
            extractor,
            listener,
        })
    }

    /// Address the public listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// The server's tunnel registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept and dispatch connections until the shutdown signal fires
    pub async fn serve(self, mut shutdown: broadcast::Receiver<bool>) -> Result<()> {
        info!("server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown signal received");
                    break;
                }
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => {
                        debug!(%peer, "public connection accepted");
                        let registry = Arc::clone(&self.registry);
                        let config = Arc::clone(&self.config);
                        let extractor = Arc::clone(&self.extractor);
                        tokio::spawn(async move {
                            handle_connection(registry, config, extractor, stream).await;
                        });
                    }
                    Err(e) => {
                        warn!("public listener error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Bind and run the public server until the shutdown signal fires
pub async fn run_server(config: ServerConfig, shutdown: broadcast::Receiver<bool>) -> Result<()> {
    TunnelServer::bind(config).await?.serve(shutdown).await
}

/// Route one public connection
async fn handle_connection(
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
    extractor: Arc<dyn HostnameExtractor>,
    mut stream: TcpStream,
) {
    let head = match read_request_head(&mut stream).await {
        Ok(head) => head,
        Err(e) => {
            if !e.is_churn() {
                debug!("unreadable request head: {}", e);
                let response = build_response(400, "Bad Request", &[], b"Bad Request");
                let _ = stream.write_all(&response).await;
            }
            return;
        }
    };

    let upgrade = head.is_upgrade();

    let host = match head.host() {
        Some(host) => host.to_string(),
        None => {
            if !upgrade {
                let response =
                    build_response(400, "Bad Request", &[], b"Host header is required");
                let _ = stream.write_all(&response).await;
            }
            return;
        }
    };

    let client_id = match extractor.extract(&host) {
        Some(id) => id,
        None => {
            if upgrade {
                return;
            }
            api::handle(&registry, &config, &head, stream).await;
            return;
        }
    };

    let tunnel = match registry.get(&client_id).await {
        Some(tunnel) => tunnel,
        None => {
            debug!(client_id = %client_id, "no tunnel for host {}", host);
            if !upgrade {
                let response = build_response(405, "Method Not Allowed", &[], b"405");
                let _ = stream.write_all(&response).await;
            }
            return;
        }
    };

    let result = if upgrade {
        tunnel.handle_upgrade(&head, stream).await
    } else {
        tunnel.handle_request(&head, stream).await
    };

    if let Err(e) = result {
        if !e.is_churn() {
            debug!(client_id = %client_id, "relay ended with error: {}", e);
        }
    }
}
