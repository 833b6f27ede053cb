//! Hostname to tunnel-id extraction
//!
//! The dispatcher routes by the subdomain of the `Host` header. Extraction
//! sits behind a trait so deployments with richer public-suffix handling can
//! plug their own in.

/// Maps a `Host` header value to a tunnel id, or `None` when the host has no
/// subdomain and the request belongs to the control plane
pub trait HostnameExtractor: Send + Sync {
    /// Extract the tunnel id from `host` (which may carry a port)
    fn extract(&self, host: &str) -> Option<String>;
}

/// Default extractor.
///
/// `*.localhost` always resolves to its leftmost label so local development
/// works without configuration. With a configured domain, the id is whatever
/// precedes `.{domain}`. Otherwise the last two labels are treated as the
/// registrable domain and everything before them is the id.
#[derive(Debug, Clone)]
pub struct DomainResolver {
    domain: Option<String>,
}

impl DomainResolver {
    /// Create a resolver, optionally pinned to a registrable domain
    pub fn new(domain: Option<String>) -> Self {
        DomainResolver {
            domain: domain.map(|d| d.to_ascii_lowercase()),
        }
    }
}

impl HostnameExtractor for DomainResolver {
    fn extract(&self, host: &str) -> Option<String> {
        let host = host.split(':').next()?.trim().to_ascii_lowercase();
        if host.is_empty() || host.starts_with('[') {
            return None;
        }
        if host.parse::<std::net::IpAddr>().is_ok() {
            return None;
        }

        if let Some(prefix) = host.strip_suffix(".localhost") {
            return prefix.split('.').next().map(str::to_string);
        }
        if host == "localhost" {
            return None;
        }

        if let Some(domain) = &self.domain {
            if host == *domain {
                return None;
            }
            return match host.strip_suffix(&format!(".{}", domain)) {
                Some(sub) if !sub.is_empty() => Some(sub.to_string()),
                _ => None,
            };
        }

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() >= 3 && labels.iter().all(|l| !l.is_empty()) {
            Some(labels[..labels.len() - 2].join("."))
        } else {
            None
        }
    }
}
