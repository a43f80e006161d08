//! URL guard: decides whether a URL may be fetched at all.
//!
//! ## Why resolve before fetching?
//!
//! Checking the hostname string is not enough: `metadata.example.net` can
//! resolve to `169.254.169.254`, and `2852039166` is the same address written
//! as an integer. The guard therefore parses the URL with a WHATWG parser,
//! resolves the host, and judges every address it resolves to. A single
//! reserved address is enough to reject.
//!
//! ## Why return the addresses?
//!
//! A second DNS lookup at connect time could return a different answer (DNS
//! rebinding). [`ValidatedUrl`] carries the socket addresses that were
//! judged, and the static backend pins its connection to exactly those.
//! The guard is re-run on every redirect target before it is followed.
//! On the rendered route it is the browser's [`RequestGate`], asked about
//! each request before the browser sends it.

use crate::browser::RequestGate;
use crate::error::Web2MdError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::{Host, Url};

/// A URL that passed the guard, plus the addresses it was judged on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    pub url: Url,
    pub addrs: Vec<SocketAddr>,
}

impl ValidatedUrl {
    /// Hostname to pin in the HTTP client, or `None` for IP-literal hosts.
    pub fn domain(&self) -> Option<&str> {
        self.url.domain()
    }
}

/// Hostname → address resolution used by the guard.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host table. Unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.into().to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "unknown host"))
    }
}

/// Validates URLs against scheme, credential and address rules.
#[derive(Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn Resolver>,
    trusted: HashSet<IpAddr>,
    dns_timeout: Duration,
}

impl UrlGuard {
    pub fn new(resolver: Arc<dyn Resolver>, trusted: &[IpAddr], dns_timeout: Duration) -> Self {
        Self {
            resolver,
            trusted: trusted.iter().copied().collect(),
            dns_timeout,
        }
    }

    /// Validate `raw`, resolving its host.
    ///
    /// Performs no network I/O besides the DNS lookup for a domain host.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedUrl, Web2MdError> {
        let url = Url::parse(raw.trim()).map_err(|e| invalid(raw, &e.to_string()))?;
        self.validate_url(url).await
    }

    /// Same as [`UrlGuard::validate`] for an already-parsed URL (redirect
    /// targets, post-navigation URLs).
    pub async fn validate_url(&self, url: Url) -> Result<ValidatedUrl, Web2MdError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(url.as_str(), &format!("unsupported scheme '{other}'"))),
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid(url.as_str(), "embedded credentials are not allowed"));
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid(url.as_str(), "missing port"))?;

        let ips: Vec<IpAddr> = match url.host() {
            None => return Err(invalid(url.as_str(), "missing host")),
            Some(Host::Ipv4(v4)) => vec![IpAddr::V4(v4)],
            Some(Host::Ipv6(v6)) => vec![IpAddr::V6(v6)],
            Some(Host::Domain(domain)) => {
                if is_local_hostname(domain) {
                    warn!(url = %url, "blocked local hostname");
                    return Err(Web2MdError::SsrfBlocked {
                        url: url.to_string(),
                        reason: format!("'{domain}' is a local hostname"),
                    });
                }
                self.resolve(&url, domain, port).await?
            }
        };

        for ip in &ips {
            if self.trusted.contains(ip) {
                continue;
            }
            if let Some(class) = classify_ip(*ip) {
                warn!(url = %url, ip = %ip, class, "blocked reserved address");
                return Err(Web2MdError::SsrfBlocked {
                    url: url.to_string(),
                    reason: format!("host resolves to {ip} ({class})"),
                });
            }
        }

        debug!(url = %url, addrs = ips.len(), "URL passed guard");
        let addrs = ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect();
        Ok(ValidatedUrl { url, addrs })
    }

    async fn resolve(&self, url: &Url, domain: &str, port: u16) -> Result<Vec<IpAddr>, Web2MdError> {
        let lookup = tokio::time::timeout(self.dns_timeout, self.resolver.resolve(domain, port));
        let ips = match lookup.await {
            Err(_) => {
                return Err(invalid(
                    url.as_str(),
                    &format!("DNS lookup timed out after {}ms", self.dns_timeout.as_millis()),
                ))
            }
            Ok(Err(e)) => return Err(invalid(url.as_str(), &format!("host does not resolve: {e}"))),
            Ok(Ok(ips)) => ips,
        };
        if ips.is_empty() {
            return Err(invalid(url.as_str(), "host resolved to no addresses"));
        }
        Ok(ips)
    }
}

#[async_trait]
impl RequestGate for UrlGuard {
    async fn admit(&self, url: &Url) -> Result<(), Web2MdError> {
        self.validate_url(url.clone()).await.map(|_| ())
    }
}

fn invalid(url: &str, reason: &str) -> Web2MdError {
    Web2MdError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

fn is_local_hostname(domain: &str) -> bool {
    let d = domain.trim_end_matches('.').to_ascii_lowercase();
    d == "localhost" || d.ends_with(".localhost")
}

/// Name of the reserved range `ip` falls in, or `None` for a public address.
pub fn classify_ip(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => classify_v6(v6),
    }
}

fn classify_v4(ip: Ipv4Addr) -> Option<&'static str> {
    let o = ip.octets();
    if ip.is_unspecified() || o[0] == 0 {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if o[0] == 100 && (64..=127).contains(&o[1]) {
        Some("shared address space")
    } else if o[0] == 192 && o[1] == 0 && o[2] == 0 {
        Some("IETF protocol assignment")
    } else if ip.is_documentation() {
        Some("documentation")
    } else if o[0] == 198 && (o[1] == 18 || o[1] == 19) {
        Some("benchmarking")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if ip.is_broadcast() || o[0] >= 240 {
        Some("reserved")
    } else {
        None
    }
}

fn classify_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return classify_v4(v4);
    }
    let seg = ip.segments();
    // NAT64 well-known prefix 64:ff9b::/96 embeds an IPv4 address.
    if seg[0] == 0x64 && seg[1] == 0xff9b && seg[2..6].iter().all(|s| *s == 0) {
        let v4 = Ipv4Addr::new(
            (seg[6] >> 8) as u8,
            seg[6] as u8,
            (seg[7] >> 8) as u8,
            seg[7] as u8,
        );
        return classify_v4(v4);
    }
    if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if (seg[0] & 0xfe00) == 0xfc00 {
        Some("unique local")
    } else if (seg[0] & 0xffc0) == 0xfe80 {
        Some("link-local")
    } else if seg[0] == 0x2001 && seg[1] == 0x0db8 {
        Some("documentation")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> UrlGuard {
        let resolver = StaticResolver::new()
            .with_host("example.com", vec!["93.184.216.34".parse().unwrap()])
            .with_host("rebind.example", vec![
                "93.184.216.34".parse().unwrap(),
                "10.0.0.5".parse().unwrap(),
            ])
            .with_host("metadata.example", vec!["169.254.169.254".parse().unwrap()]);
        UrlGuard::new(Arc::new(resolver), &[], Duration::from_secs(1))
    }

    fn blocked(res: Result<ValidatedUrl, Web2MdError>) -> bool {
        matches!(res, Err(Web2MdError::SsrfBlocked { .. }))
    }

    fn invalid_url(res: Result<ValidatedUrl, Web2MdError>) -> bool {
        matches!(res, Err(Web2MdError::InvalidUrl { .. }))
    }

    #[test]
    fn classifies_v4_ranges() {
        let cases = [
            ("127.0.0.1", Some("loopback")),
            ("10.1.2.3", Some("private")),
            ("172.16.0.1", Some("private")),
            ("192.168.1.1", Some("private")),
            ("169.254.169.254", Some("link-local")),
            ("100.64.0.1", Some("shared address space")),
            ("0.0.0.0", Some("unspecified")),
            ("0.1.2.3", Some("unspecified")),
            ("224.0.0.1", Some("multicast")),
            ("255.255.255.255", Some("reserved")),
            ("198.18.0.1", Some("benchmarking")),
            ("192.0.2.10", Some("documentation")),
            ("8.8.8.8", None),
            ("93.184.216.34", None),
        ];
        for (ip, want) in cases {
            assert_eq!(classify_ip(ip.parse().unwrap()), want, "ip {ip}");
        }
    }

    #[test]
    fn classifies_v6_ranges() {
        let cases = [
            ("::1", Some("loopback")),
            ("::", Some("unspecified")),
            ("fe80::1", Some("link-local")),
            ("fd00::1", Some("unique local")),
            ("ff02::1", Some("multicast")),
            ("::ffff:127.0.0.1", Some("loopback")),
            ("::ffff:169.254.169.254", Some("link-local")),
            ("64:ff9b::a00:1", Some("private")),
            ("2606:4700:4700::1111", None),
        ];
        for (ip, want) in cases {
            assert_eq!(classify_ip(ip.parse().unwrap()), want, "ip {ip}");
        }
    }

    #[tokio::test]
    async fn accepts_public_host() {
        let v = guard().validate("https://example.com/a/b?q=1").await.unwrap();
        assert_eq!(v.url.as_str(), "https://example.com/a/b?q=1");
        assert_eq!(v.addrs, vec!["93.184.216.34:443".parse().unwrap()]);
        assert_eq!(v.domain(), Some("example.com"));
    }

    #[tokio::test]
    async fn rejects_metadata_endpoint() {
        assert!(blocked(guard().validate("http://169.254.169.254/latest/meta-data").await));
        assert!(blocked(guard().validate("http://metadata.example/").await));
    }

    #[tokio::test]
    async fn rejects_obfuscated_ip_literals() {
        // Integer and hex forms normalise to 127.0.0.1 / 169.254.169.254.
        assert!(blocked(guard().validate("http://2130706433/").await));
        assert!(blocked(guard().validate("http://0xA9FEA9FE/").await));
        assert!(blocked(guard().validate("http://[::ffff:7f00:1]/").await));
    }

    #[tokio::test]
    async fn rejects_if_any_address_is_private() {
        assert!(blocked(guard().validate("https://rebind.example/").await));
    }

    #[tokio::test]
    async fn rejects_localhost_without_dns() {
        assert!(blocked(guard().validate("http://localhost:8080/").await));
        assert!(blocked(guard().validate("http://api.localhost./").await));
    }

    #[tokio::test]
    async fn rejects_bad_shapes() {
        let g = guard();
        assert!(invalid_url(g.validate("not a url").await));
        assert!(invalid_url(g.validate("/relative/path").await));
        assert!(invalid_url(g.validate("ftp://example.com/file").await));
        assert!(invalid_url(g.validate("file:///etc/passwd").await));
        assert!(invalid_url(g.validate("javascript:alert(1)").await));
        assert!(invalid_url(g.validate("https://user:pw@example.com/").await));
        assert!(invalid_url(g.validate("https://unknown.example/").await));
    }

    #[tokio::test]
    async fn trusted_address_is_exempt() {
        let g = UrlGuard::new(
            Arc::new(StaticResolver::new()),
            &["127.0.0.1".parse().unwrap()],
            Duration::from_secs(1),
        );
        let v = g.validate("http://127.0.0.1:9999/page").await.unwrap();
        assert_eq!(v.addrs, vec!["127.0.0.1:9999".parse().unwrap()]);
        assert_eq!(v.domain(), None);
        assert!(blocked(g.validate("http://127.0.0.2/").await));
    }

    struct HangingResolver;

    #[async_trait]
    impl Resolver for HangingResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    #[test]
    fn dns_lookup_is_bounded() {
        let g = UrlGuard::new(Arc::new(HangingResolver), &[], Duration::from_millis(50));
        let res = tokio_test::block_on(g.validate("https://slow.example/"));
        let err = tokio_test::assert_err!(res);
        assert!(err.to_string().contains("timed out"), "got {err}");

        // IP literals never reach the resolver.
        let v = tokio_test::block_on(g.validate("https://93.184.216.34/"));
        tokio_test::assert_ok!(v);
    }
}
