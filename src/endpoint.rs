//! Endpoint resolver (component C, spec §4.C).

use url::Url;

use crate::config::{Config, Tls};
use crate::host::canonical_host;
use tracing::warn;

/// A concrete, already-normalized registry endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub url: Url,
    pub tls: Option<Tls>,
    /// The canonical host of the registry this endpoint serves (`R.registry`),
    /// not this endpoint's own host — a mirror endpoint with no `configs`
    /// entry of its own falls back to credentials keyed by this field (spec
    /// §3, §4.C step 2).
    pub registry_host: String,
}

/// `https://<canonical-host>/v2`, the endpoint every reference's list ends
/// with, exactly once (spec §3 invariants).
pub fn default_endpoint(registry: &str, registry_config: Option<&crate::config::RegistryConfig>) -> Endpoint {
    let host = canonical_host(registry);
    let url = Url::parse(&format!("https://{host}/v2")).expect("default endpoint is always a valid URL");
    Endpoint {
        url,
        tls: registry_config.and_then(|c| c.tls.clone()),
        registry_host: host,
    }
}

/// Resolves the ordered endpoint list for `registry` (`R.registry`, prior to
/// any rewrite), per spec §4.C.
pub fn resolve_endpoints(registry: &str, port: Option<u16>, config: &Config) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    let registry_host = canonical_host(registry);

    if let Some(mirror) = config.mirror_for(registry, port) {
        for raw in &mirror.endpoints {
            match parse_endpoint_url(raw) {
                Some(url) => endpoints.push(build_endpoint(url, &registry_host, config)),
                None => warn!(endpoint = raw, "skipping unparseable or relative mirror endpoint"),
            }
        }
    }

    let registry_config = config.registry_config_for(registry, port);
    endpoints.push(default_endpoint(registry, registry_config));

    endpoints
}

fn build_endpoint(mut url: Url, registry_host: &str, config: &Config) -> Endpoint {
    normalize_path(&mut url);
    let own_host = url.host_str().unwrap_or_default().to_string();
    let port = url.port();

    let tls = config.registry_config_for(&own_host, port).and_then(|c| c.tls.clone());

    Endpoint {
        url,
        tls,
        registry_host: registry_host.to_string(),
    }
}

/// Parses an endpoint URL, applying the edge cases from spec §4.C:
/// - `host:port/v2` with no scheme is treated as `https://host:port/v2`.
/// - loopback addresses infer `http://` unless the port is 443.
/// Returns `None` (caller logs and skips) for anything that parses as
/// relative or carries an unparseable host.
fn parse_endpoint_url(raw: &str) -> Option<Url> {
    // A bare "host:port/path" parses as a URL whose "scheme" is the host
    // (e.g. "registry.example.com:443/v2" -> scheme "registry.example.com",
    // opaque path "443/v2"); `host_str()` is then None. Only trust a parse
    // result when it produced a real http(s) authority.
    if raw.contains("://") {
        let url = Url::parse(raw).ok()?;
        return match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Some(url),
            _ => None,
        };
    }

    let scheme = infer_scheme(raw);
    let with_scheme = format!("{scheme}://{raw}");
    let url = Url::parse(&with_scheme).ok()?;
    url.host_str()?;
    Some(url)
}

fn infer_scheme(raw: &str) -> &'static str {
    let host_part = raw.split('/').next().unwrap_or(raw);
    let (host, port) = match host_part.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().ok()),
        None => (host_part, None),
    };

    if is_loopback(host) {
        return match port {
            Some(443) => "https",
            _ => "http",
        };
    }
    "https"
}

fn is_loopback(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return ip.is_loopback();
    }
    false
}

/// Strips the trailing `/` and ensures a `/v2` API root is present.
fn normalize_path(url: &mut Url) {
    let mut path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/v2") {
        path.push_str("/v2");
    }
    url.set_path(&path);
}
