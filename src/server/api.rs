//! Control-plane HTTP routes
//!
//! Served for requests whose host has no subdomain: tunnel creation, status
//! inspection, deletion, and the landing-page redirect.

use crate::config::ServerConfig;
use crate::helper::process_rss_bytes;
use crate::http::{build_json_response, build_response, RequestHead};
use crate::registry::{is_valid_id, Registry};
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error};

const INVALID_ID_MESSAGE: &str =
    "Invalid subdomain. Subdomains must be lowercase and between 4 and 63 alphanumeric characters.";

/// Serve one control-plane request and close the connection
pub(crate) async fn handle(
    registry: &Arc<Registry>,
    config: &ServerConfig,
    head: &RequestHead,
    mut stream: TcpStream,
) {
    let response = route(registry, config, head).await;
    if let Err(e) = stream.write_all(&response).await {
        debug!("failed to write control-plane response: {}", e);
        return;
    }
    let _ = stream.shutdown().await;
}

/// Resolve a control-plane request to its raw response bytes
pub(crate) async fn route(
    registry: &Arc<Registry>,
    config: &ServerConfig,
    head: &RequestHead,
) -> Vec<u8> {
    let (path, query) = match head.path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (head.path.as_str(), None),
    };

    match (head.method.as_str(), path) {
        ("GET", "/api/status") => {
            let stats = registry.stats().await;
            build_json_response(
                200,
                "OK",
                &json!({
                    "tunnels": stats.tunnels,
                    "mem": { "rss": process_rss_bytes() },
                }),
            )
        }
        ("GET", p) if p.starts_with("/api/tunnels/") && p.ends_with("/status") => {
            let id = &p["/api/tunnels/".len()..p.len() - "/status".len()];
            match registry.get(id).await {
                Some(tunnel) => build_json_response(
                    200,
                    "OK",
                    &json!({ "connected_sockets": tunnel.stats().connected_sockets }),
                ),
                None => build_response(405, "Method Not Allowed", &[], b"405"),
            }
        }
        ("DELETE", p) if p.starts_with("/api/tunnels/") => {
            let id = &p["/api/tunnels/".len()..];
            match registry.remove(id).await {
                Some(deleted) => {
                    build_json_response(200, "OK", &json!({ "deletedClientId": deleted }))
                }
                None => build_response(405, "Method Not Allowed", &[], b"405"),
            }
        }
        ("GET", "/") if wants_new(query) => create_tunnel(registry, config, head, None).await,
        ("GET", "/") => build_response(
            302,
            "Found",
            &[("Location", config.landing.as_str())],
            b"",
        ),
        ("GET", p) if is_single_segment(p) => {
            let id = &p[1..];
            if !is_valid_id(id) {
                build_json_response(403, "Forbidden", &json!({ "message": INVALID_ID_MESSAGE }))
            } else {
                create_tunnel(registry, config, head, Some(id.to_string())).await
            }
        }
        _ => build_response(404, "Not Found", &[], b"Not Found"),
    }
}

async fn create_tunnel(
    registry: &Arc<Registry>,
    config: &ServerConfig,
    head: &RequestHead,
    id: Option<String>,
) -> Vec<u8> {
    match registry.create(id).await {
        Ok(info) => {
            let host = head.host().unwrap_or_default();
            let url = format!("{}://{}.{}", config.scheme(), info.id, host);
            build_json_response(
                200,
                "OK",
                &json!({
                    "id": info.id,
                    "port": info.port,
                    "max_conn_count": info.max_conn_count,
                    "url": url,
                }),
            )
        }
        Err(e) => {
            error!("tunnel creation failed: {}", e);
            build_response(500, "Internal Server Error", &[], b"tunnel creation failed")
        }
    }
}

/// Whether the query string asks for a generated-id tunnel (`?new`)
fn wants_new(query: Option<&str>) -> bool {
    match query {
        Some(q) => q
            .split('&')
            .any(|kv| kv == "new" || kv.starts_with("new=")),
        None => false,
    }
}

/// Whether `path` is `/<segment>` with no further slashes
fn is_single_segment(path: &str) -> bool {
    path.len() > 1 && path.starts_with('/') && !path[1..].contains('/')
}
