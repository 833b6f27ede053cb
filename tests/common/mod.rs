//! Test utilities for tunnelrat integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tunnelrat::config::ServerConfig;
use tunnelrat::server::TunnelServer;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Configuration builder for test servers
pub struct TestConfigBuilder {
    max_sockets: usize,
    domain: Option<String>,
    secure: bool,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            max_sockets: 10,
            domain: None,
            secure: false,
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-client socket budget
    pub fn max_sockets(mut self, n: usize) -> Self {
        self.max_sockets = n;
        self
    }

    /// Set the registrable domain
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    /// Return https tunnel URLs
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Build the configuration, bound to loopback on an ephemeral port
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            port: 0,
            address: "127.0.0.1".to_string(),
            domain: self.domain,
            secure: self.secure,
            max_sockets: self.max_sockets,
            ..Default::default()
        }
    }
}

/// A running server plus the handle that stops it
pub struct TestServer {
    /// Public listener address
    pub addr: SocketAddr,
    shutdown_tx: broadcast::Sender<bool>,
}

impl TestServer {
    /// Bind and serve the given configuration on a background task
    pub async fn spawn(config: ServerConfig) -> Self {
        let server = TunnelServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });

        TestServer { addr, shutdown_tx }
    }

    /// Send one raw HTTP request and collect the whole response
    pub async fn request(&self, raw: &str) -> String {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    /// Convenience wrapper for control-plane GETs
    pub async fn get(&self, path: &str) -> String {
        self.request(&format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        ))
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Extract the JSON body of a raw HTTP response
pub fn json_body(response: &str) -> serde_json::Value {
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .unwrap_or_else(|| panic!("no body in response: {:?}", response));
    serde_json::from_str(body)
        .unwrap_or_else(|e| panic!("bad JSON body {:?}: {}", body, e))
}

/// The status code of a raw HTTP response
pub fn status_code(response: &str) -> u16 {
    response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no status in response: {:?}", response))
}
