//! Process-wide tunnel registry
//!
//! Maps tunnel ids to live [`Tunnel`]s, serializes create/remove, and
//! auto-removes tunnels that close themselves (grace expiry). The map is the
//! only cross-tunnel shared state in the server.

use crate::error::TunnelError;
use crate::helper::random_id;
use crate::pool::{PoolOptions, SocketPool};
use crate::tunnel::{Tunnel, TunnelOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9][a-z0-9-]{4,63}[a-z0-9]|[a-z0-9]{4,63})$").unwrap()
});

/// Whether `id` is acceptable as a tunnel id: lowercase alphanumerics and
/// inner hyphens, 4 to 63 characters
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Registry construction options
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Per-tunnel client socket budget; the pool's hard cap is twice this
    pub max_sockets: usize,
    /// Address pool listeners bind on
    pub bind_address: IpAddr,
    /// Grace periods for tunnels created through this registry
    pub tunnel: TunnelOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions {
            max_sockets: 10,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            tunnel: TunnelOptions::default(),
        }
    }
}

/// Result of a successful tunnel creation
#[derive(Debug, Clone)]
pub struct TunnelCreated {
    /// The tunnel id, proposed or generated
    pub id: String,
    /// Port the tunnel's socket pool is listening on
    pub port: u16,
    /// Number of sockets the client may keep open
    pub max_conn_count: usize,
}

/// Registry statistics snapshot
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    /// Number of live tunnels
    pub tunnels: usize,
}

/// Map of live tunnels keyed by id
pub struct Registry {
    opts: RegistryOptions,
    tunnels: RwLock<HashMap<String, Arc<Tunnel>>>,
    create_lock: Mutex<()>,
    closed_tx: mpsc::UnboundedSender<(String, u64)>,
    next_generation: AtomicU64,
}

impl Registry {
    /// Create a registry and spawn its reaper task
    pub fn new(opts: RegistryOptions) -> Arc<Self> {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry {
            opts,
            tunnels: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            closed_tx,
            next_generation: AtomicU64::new(0),
        });

        tokio::spawn(reaper(Arc::downgrade(&registry), closed_rx));
        registry
    }

    /// Create a tunnel under `id`, or under a generated id when `None`.
    ///
    /// An existing tunnel with the same id is removed first (new wins). The
    /// map entry is inserted before the pool starts so a concurrent create
    /// observes the reservation; a failed start removes it again and
    /// propagates the error.
    pub async fn create(&self, id: Option<String>) -> Result<TunnelCreated, TunnelError> {
        let _guard = self.create_lock.lock().await;
        let id = id.unwrap_or_else(random_id);

        if let Some(old) = self.tunnels.write().await.remove(&id) {
            debug!(id = %id, "replacing existing tunnel");
            old.close();
        }

        let (pool, events) = SocketPool::new(PoolOptions::with_limit(
            self.opts.max_sockets,
            self.opts.bind_address,
        ));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let tunnel = Tunnel::new(
            id.clone(),
            generation,
            pool.clone(),
            events,
            self.opts.tunnel.clone(),
            self.closed_tx.clone(),
        );

        self.tunnels
            .write()
            .await
            .insert(id.clone(), Arc::clone(&tunnel));

        match pool.start().await {
            Ok(port) => {
                info!(id = %id, port, "tunnel created");
                Ok(TunnelCreated {
                    id,
                    port,
                    max_conn_count: self.opts.max_sockets,
                })
            }
            Err(e) => {
                self.tunnels.write().await.remove(&id);
                tunnel.close();
                Err(e)
            }
        }
    }

    /// Remove and close the tunnel under `id`, if present. Idempotent.
    ///
    /// Returns the id when a tunnel was actually removed.
    pub async fn remove(&self, id: &str) -> Option<String> {
        let _guard = self.create_lock.lock().await;
        let removed = self.tunnels.write().await.remove(id);
        match removed {
            Some(tunnel) => {
                info!(id = %id, "tunnel removed");
                tunnel.close();
                Some(id.to_string())
            }
            None => None,
        }
    }

    /// Look up a tunnel by id
    pub async fn get(&self, id: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.read().await.get(id).cloned()
    }

    /// Whether a tunnel exists under `id`
    pub async fn has(&self, id: &str) -> bool {
        self.tunnels.read().await.contains_key(id)
    }

    /// Current statistics
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            tunnels: self.tunnels.read().await.len(),
        }
    }

    /// Remove the map entry for `id` only if it still holds the generation
    /// that announced the close; a replaced tunnel's close must not reap
    /// its successor
    async fn remove_closed(&self, id: &str, generation: u64) {
        let _guard = self.create_lock.lock().await;
        let mut tunnels = self.tunnels.write().await;
        match tunnels.get(id) {
            Some(tunnel) if tunnel.generation() == generation => {
                tunnels.remove(id);
                info!(id = %id, "tunnel reaped");
            }
            _ => {
                debug!(id = %id, generation, "stale close notification");
            }
        }
    }
}

/// Remove tunnels from the map as they announce their own close
async fn reaper(
    registry: std::sync::Weak<Registry>,
    mut closed_rx: mpsc::UnboundedReceiver<(String, u64)>,
) {
    while let Some((id, generation)) = closed_rx.recv().await {
        match registry.upgrade() {
            Some(registry) => {
                registry.remove_closed(&id, generation).await;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelState;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_registry(tunnel: TunnelOptions) -> Arc<Registry> {
        Registry::new(RegistryOptions {
            max_sockets: 2,
            bind_address: IpAddr::from([127, 0, 0, 1]),
            tunnel,
        })
    }

    fn patient_opts() -> TunnelOptions {
        TunnelOptions {
            first_connect_grace: Duration::from_secs(5),
            offline_grace: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_id_pattern_accepts() {
        for id in ["abcd", "abcd1", "a1-b2-c3", "0000"] {
            assert!(is_valid_id(id), "{} should be valid", id);
        }
        let long = "a".repeat(63);
        assert!(is_valid_id(&long));
    }

    #[test]
    fn test_id_pattern_rejects() {
        for id in [
            "abc",   // too short
            "ABCD",  // uppercase
            "-abcd", // leading hyphen
            "abcd-", // trailing hyphen
            "ab cd", // whitespace
            "ab.cd", // dot
            "",      // empty
        ] {
            assert!(!is_valid_id(id), "{:?} should be invalid", id);
        }
        let too_long = "a".repeat(66);
        assert!(!is_valid_id(&too_long));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = test_registry(patient_opts());

        let created = registry.create(Some("abcd".to_string())).await.unwrap();
        assert_eq!(created.id, "abcd");
        assert!(created.port > 0);
        assert_eq!(created.max_conn_count, 2);

        assert!(registry.has("abcd").await);
        let tunnel = registry.get("abcd").await.unwrap();
        assert_eq!(tunnel.id(), "abcd");
        assert_eq!(registry.stats().await.tunnels, 1);
    }

    #[tokio::test]
    async fn test_create_generates_valid_id() {
        let registry = test_registry(patient_opts());

        let created = registry.create(None).await.unwrap();
        assert!(is_valid_id(&created.id), "{} should be valid", created.id);
        assert!(registry.has(&created.id).await);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = test_registry(patient_opts());
        registry.create(Some("abcd".to_string())).await.unwrap();

        assert_eq!(registry.remove("abcd").await.as_deref(), Some("abcd"));
        assert_eq!(registry.remove("abcd").await, None);
        assert_eq!(registry.stats().await.tunnels, 0);
    }

    #[tokio::test]
    async fn test_collision_new_wins() {
        let registry = test_registry(patient_opts());

        let first = registry.create(Some("abcd".to_string())).await.unwrap();
        let old = registry.get("abcd").await.unwrap();

        let second = registry.create(Some("abcd".to_string())).await.unwrap();
        let new = registry.get("abcd").await.unwrap();

        assert_ne!(first.port, second.port);
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(registry.stats().await.tunnels, 1);

        // The replaced tunnel is closed: its pool no longer accepts
        timeout(Duration::from_secs(2), async {
            loop {
                if old.state() == TunnelState::Closed {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        if let Ok(mut conn) = TcpStream::connect(("127.0.0.1", first.port)).await {
            let mut buf = [0u8; 1];
            let n = timeout(Duration::from_secs(2), conn.read(&mut buf))
                .await
                .unwrap()
                .unwrap_or(0);
            assert_eq!(n, 0);
        }

        // The replaced tunnel's close notification must not reap the
        // replacement once it flows through the reaper
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.has("abcd").await);
        assert_eq!(registry.stats().await.tunnels, 1);
        let survivor = registry.get("abcd").await.unwrap();
        assert!(Arc::ptr_eq(&survivor, &new));
        assert!(!survivor.state().is_closed());
    }

    #[tokio::test]
    async fn test_grace_expiry_reaps_tunnel() {
        let registry = test_registry(TunnelOptions {
            first_connect_grace: Duration::from_millis(100),
            offline_grace: Duration::from_millis(100),
        });

        registry.create(Some("abcd".to_string())).await.unwrap();
        assert!(registry.has("abcd").await);

        timeout(Duration::from_secs(2), async {
            loop {
                if !registry.has("abcd").await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(registry.stats().await.tunnels, 0);
    }

    #[tokio::test]
    async fn test_remove_closes_tunnel() {
        let registry = test_registry(patient_opts());
        let created = registry.create(Some("abcd".to_string())).await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", created.port))
            .await
            .unwrap();

        registry.remove("abcd").await;

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
