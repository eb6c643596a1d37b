//! Routing registry lookups of prefixes originated by an ASN.
//!
//! The registry is queried with an inverse whois lookup
//! (`-i origin AS<n>`), which returns RPSL `route:` objects. Objects whose
//! description marks them as proxy-registered are dropped: those are
//! created by a third party on the origin's behalf and are not
//! authoritative.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::address::AddressEntry;
use crate::config::RegistryConfig;
use crate::extractor::extract_addresses;
use crate::feeds::Asn;

/// Upper bound on a registry response; large transit ASNs stay well below.
const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;

/// Marker of non-authoritative route objects
const PROXY_MARKER: &str = "proxy-registered";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("registry {server} unreachable: {reason}")]
    Unreachable { server: String, reason: String },

    #[error("{0} is unknown to the routing registry")]
    UnknownAsn(Asn),

    #[error("malformed registry response for {asn}: {reason}")]
    Malformed { asn: Asn, reason: String },
}

/// A route object as returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteObject {
    pub prefix: String,
    pub description: String,
}

impl RouteObject {
    pub fn new(prefix: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            description: description.into(),
        }
    }

    /// True when the description marks the object as proxy-registered.
    pub fn is_proxy_registered(&self) -> bool {
        self.description.to_ascii_lowercase().contains(PROXY_MARKER)
    }
}

/// Registry answering "which routes does this ASN originate".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OriginRegistry: Send + Sync {
    /// All route objects with the given origin. An ASN the registry
    /// knows nothing about is an error, never an empty list.
    async fn origin_routes(&self, asn: Asn) -> Result<Vec<RouteObject>, LookupError>;
}

/// Resolve the validated prefixes originated by `asn`.
///
/// Proxy-registered objects are dropped, as are prefixes failing the same
/// pattern and routability checks applied to URL feeds. Lookup errors
/// are propagated untouched.
pub async fn resolve_origin_prefixes(
    registry: &dyn OriginRegistry,
    asn: Asn,
) -> Result<Vec<AddressEntry>, LookupError> {
    let routes = registry.origin_routes(asn).await?;
    let total = routes.len();

    let prefixes: Vec<AddressEntry> = routes
        .iter()
        .filter(|route| {
            let proxy = route.is_proxy_registered();
            if proxy {
                debug!("Skipping proxy-registered {} for {}", route.prefix, asn);
            }
            !proxy
        })
        .flat_map(|route| extract_addresses(&route.prefix))
        .collect();

    info!(
        "Resolved {} - {} prefixes ({} route objects)",
        asn,
        prefixes.len(),
        total
    );
    Ok(prefixes)
}

/// Whois client for an RPSL registry such as RADb.
pub struct WhoisRegistry {
    server: String,
    port: u16,
    timeout: Duration,
    max_response_bytes: u64,
}

impl WhoisRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            timeout: Duration::from_secs(config.timeout_secs),
            max_response_bytes: MAX_RESPONSE_BYTES,
        }
    }

    /// Override the response size limit
    pub fn with_max_response_bytes(mut self, limit: u64) -> Self {
        self.max_response_bytes = limit;
        self
    }

    fn unreachable(&self, reason: impl ToString) -> LookupError {
        LookupError::Unreachable {
            server: format!("{}:{}", self.server, self.port),
            reason: reason.to_string(),
        }
    }

    async fn query(&self, query: &str) -> Result<Vec<u8>, LookupError> {
        let mut stream = TcpStream::connect((self.server.as_str(), self.port))
            .await
            .map_err(|e| self.unreachable(e))?;

        stream
            .write_all(format!("{}\r\n", query).as_bytes())
            .await
            .map_err(|e| self.unreachable(e))?;

        // One byte past the limit tells a full response from a cut one
        let mut response = Vec::new();
        (&mut stream)
            .take(self.max_response_bytes.saturating_add(1))
            .read_to_end(&mut response)
            .await
            .map_err(|e| self.unreachable(e))?;

        Ok(response)
    }
}

#[async_trait]
impl OriginRegistry for WhoisRegistry {
    async fn origin_routes(&self, asn: Asn) -> Result<Vec<RouteObject>, LookupError> {
        let query = format!("-i origin {}", asn);
        debug!("Querying {}:{} with '{}'", self.server, self.port, query);

        let response = tokio::time::timeout(self.timeout, self.query(&query))
            .await
            .map_err(|_| self.unreachable(format!("timed out after {:?}", self.timeout)))??;

        if response.len() as u64 > self.max_response_bytes {
            return Err(LookupError::Malformed {
                asn,
                reason: format!("response exceeds {} bytes", self.max_response_bytes),
            });
        }

        let text = String::from_utf8_lossy(&response);
        if text.trim().is_empty() {
            return Err(LookupError::Malformed {
                asn,
                reason: "empty response".to_string(),
            });
        }

        let routes = parse_route_objects(&text);
        if routes.is_empty() {
            if !has_route_objects(&text) {
                return Err(LookupError::UnknownAsn(asn));
            }
            info!("{} originates no IPv4 routes", asn);
        }

        Ok(routes)
    }
}

/// True when the response holds any route object, IPv4 or IPv6.
///
/// Registries answer an unknown origin with comment lines only.
pub fn has_route_objects(text: &str) -> bool {
    text.lines()
        .filter(|line| !line.starts_with('%') && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .any(|(key, _)| matches!(key.trim().to_ascii_lowercase().as_str(), "route" | "route6"))
}

/// Parse IPv4 `route:` objects out of an RPSL response.
///
/// Objects are separated by blank lines; `%` lines are server comments.
/// Multiple `descr:` lines are joined with a space. Continuation lines
/// (leading whitespace or `+`) extend the previous attribute.
pub fn parse_route_objects(text: &str) -> Vec<RouteObject> {
    let mut routes = Vec::new();
    let mut prefix: Option<String> = None;
    let mut descriptions: Vec<String> = Vec::new();
    let mut last_key = String::new();

    let mut flush = |prefix: &mut Option<String>, descriptions: &mut Vec<String>| {
        if let Some(p) = prefix.take() {
            routes.push(RouteObject::new(p, descriptions.join(" ")));
        }
        descriptions.clear();
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut prefix, &mut descriptions);
            last_key.clear();
            continue;
        }
        if line.starts_with('%') || line.starts_with('#') {
            continue;
        }

        if line.starts_with(char::is_whitespace) || line.starts_with('+') {
            let value = line.trim_start_matches('+').trim();
            if last_key == "descr" && !value.is_empty() {
                descriptions.push(value.to_string());
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "route" => prefix = Some(value.to_string()),
            "descr" => descriptions.push(value.to_string()),
            _ => {}
        }
        last_key = key;
    }
    flush(&mut prefix, &mut descriptions);

    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const RADB_SAMPLE: &str = "\
route:          1.1.1.0/24
descr:          APNIC Research and Development
                6 Cordelia St
origin:         AS13335
mnt-by:         MAINT-AS13335
source:         RADB

route:          104.16.0.0/13
descr:          Proxy-registered route object
origin:         AS13335
source:         RADB

route6:         2606:4700::/32
descr:          Cloudflare
origin:         AS13335

route:          192.168.0.0/16
descr:          bogus
origin:         AS13335
";

    #[test]
    fn test_parse_route_objects() {
        let routes = parse_route_objects(RADB_SAMPLE);
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].prefix, "1.1.1.0/24");
        assert_eq!(
            routes[0].description,
            "APNIC Research and Development 6 Cordelia St"
        );
        assert!(routes[1].is_proxy_registered());
        assert_eq!(routes[2].prefix, "192.168.0.0/16");
    }

    #[test]
    fn test_parse_skips_comments_and_route6() {
        let text = "% This is the RADb whois server.\n\nroute6: 2001:db8::/32\ndescr: x\n";
        assert!(parse_route_objects(text).is_empty());
    }

    #[test]
    fn test_parse_no_entries() {
        let text = "%  No entries found for the selected source(s).\n";
        assert!(parse_route_objects(text).is_empty());
    }

    #[test]
    fn test_proxy_marker_case_insensitive() {
        assert!(RouteObject::new("1.1.1.0/24", "PROXY-REGISTERED by X").is_proxy_registered());
        assert!(!RouteObject::new("1.1.1.0/24", "proxy registered").is_proxy_registered());
    }

    #[tokio::test]
    async fn test_resolve_drops_proxy_registered() {
        let mut registry = MockOriginRegistry::new();
        registry.expect_origin_routes().times(1).returning(|_| {
            Ok(vec![
                RouteObject::new("1.1.1.0/24", "Proxy-registered by X"),
                RouteObject::new("8.8.8.0/24", "ok"),
            ])
        });

        let prefixes = resolve_origin_prefixes(&registry, Asn::new(64500))
            .await
            .unwrap();
        let strings: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        assert_eq!(strings, vec!["8.8.8.0/24"]);
    }

    #[tokio::test]
    async fn test_resolve_drops_non_global_and_malformed() {
        let mut registry = MockOriginRegistry::new();
        registry.expect_origin_routes().returning(|_| {
            Ok(vec![
                RouteObject::new("10.0.0.0/8", "private"),
                RouteObject::new("not-a-prefix", "junk"),
                RouteObject::new("9.9.9.0/24", "quad9"),
            ])
        });

        let prefixes = resolve_origin_prefixes(&registry, Asn::new(19281))
            .await
            .unwrap();
        assert_eq!(prefixes.len(), 1);
        assert_eq!(prefixes[0].to_string(), "9.9.9.0/24");
    }

    #[tokio::test]
    async fn test_resolve_propagates_lookup_error() {
        let mut registry = MockOriginRegistry::new();
        registry
            .expect_origin_routes()
            .returning(|asn| Err(LookupError::UnknownAsn(asn)));

        let result = resolve_origin_prefixes(&registry, Asn::new(4_200_000_000)).await;
        assert!(matches!(result, Err(LookupError::UnknownAsn(_))));
    }

    /// Serve one canned whois response on a local port
    async fn serve_once(response: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (port, handle)
    }

    fn local_registry(port: u16) -> WhoisRegistry {
        WhoisRegistry::new(&RegistryConfig {
            server: "127.0.0.1".to_string(),
            port,
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_whois_registry_query() {
        let (port, handle) = serve_once(RADB_SAMPLE).await;
        let routes = local_registry(port)
            .origin_routes(Asn::new(13335))
            .await
            .unwrap();
        assert_eq!(routes.len(), 3);

        let query = handle.await.unwrap();
        assert_eq!(query, "-i origin AS13335\r\n");
    }

    #[tokio::test]
    async fn test_whois_registry_unknown_asn() {
        let (port, _handle) =
            serve_once("%  No entries found for the selected source(s).\n").await;
        let result = local_registry(port).origin_routes(Asn::new(64512)).await;
        assert!(matches!(result, Err(LookupError::UnknownAsn(_))));
    }

    #[test]
    fn test_has_route_objects() {
        assert!(has_route_objects(RADB_SAMPLE));
        assert!(has_route_objects("route6: 2606:4700::/32\norigin: AS64501\n"));
        assert!(!has_route_objects("%  No entries found for the selected source(s).\n"));
        assert!(!has_route_objects("% route: 1.1.1.0/24\n"));
    }

    #[tokio::test]
    async fn test_whois_registry_ipv6_only_asn() {
        let (port, _handle) = serve_once(
            "route6:         2606:4700::/32\ndescr:          Cloudflare\norigin:         AS64501\n",
        )
        .await;
        let routes = local_registry(port)
            .origin_routes(Asn::new(64501))
            .await
            .unwrap();
        assert!(routes.is_empty());
    }

    #[tokio::test]
    async fn test_whois_registry_rejects_oversized_response() {
        let (port, _handle) = serve_once(RADB_SAMPLE).await;
        let result = local_registry(port)
            .with_max_response_bytes(64)
            .origin_routes(Asn::new(13335))
            .await;
        match result {
            Err(LookupError::Malformed { reason, .. }) => assert!(reason.contains("exceeds 64 bytes")),
            other => panic!("expected malformed response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whois_registry_response_at_limit_accepted() {
        let (port, _handle) = serve_once(RADB_SAMPLE).await;
        let routes = local_registry(port)
            .with_max_response_bytes(RADB_SAMPLE.len() as u64)
            .origin_routes(Asn::new(13335))
            .await
            .unwrap();
        assert_eq!(routes.len(), 3);
    }

    #[tokio::test]
    async fn test_whois_registry_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = local_registry(port).origin_routes(Asn::new(13335)).await;
        assert!(matches!(result, Err(LookupError::Unreachable { .. })));
    }
}
