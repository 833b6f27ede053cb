//! Server configuration types
//!
//! Defines the main configuration structure for the tunnel server.

use serde::{Deserialize, Serialize};

/// Default public listen port
fn default_port() -> u16 {
    80
}

/// Default bind address
fn default_address() -> String {
    "0.0.0.0".to_string()
}

/// Default per-tunnel client socket budget
fn default_max_sockets() -> usize {
    10
}

/// Default landing page for bare requests to the root domain
fn default_landing() -> String {
    "https://localtunnel.github.io/www/".to_string()
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Port for the public HTTP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind listeners on
    #[serde(default = "default_address")]
    pub address: String,

    /// Registrable domain tunnels are exposed under (e.g. "tunnel.example.com").
    /// When unset, subdomains are derived from the Host header alone.
    #[serde(default)]
    pub domain: Option<String>,

    /// Whether tunnel URLs returned by the control plane use https
    #[serde(default)]
    pub secure: bool,

    /// Number of sockets each tunnel client is expected to keep open; the
    /// hard per-tunnel connection cap is twice this
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,

    /// Redirect target for plain requests to the root domain
    #[serde(default = "default_landing")]
    pub landing: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            address: default_address(),
            domain: None,
            secure: false,
            max_sockets: default_max_sockets(),
            landing: default_landing(),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sockets == 0 {
            return Err("max_sockets must be greater than 0".to_string());
        }
        if self.address.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("invalid bind address: {}", self.address));
        }
        if let Some(domain) = &self.domain {
            if domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
                return Err(format!("invalid domain: {}", domain));
            }
        }
        Ok(())
    }

    /// The hard cap on concurrently accepted sockets per tunnel
    pub fn max_tcp_sockets(&self) -> usize {
        self.max_sockets * 2
    }

    /// Scheme for tunnel URLs returned by the control plane
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}
