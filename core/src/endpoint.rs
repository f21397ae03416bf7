//! Turns raw user input (bare host, `host:port` or URL) into a reachable
//! endpoint descriptor.
//!
//! Resolution runs through four stages: parsing, DNS classification, ICMP
//! reachability probing and TCP scheme/port negotiation. All expected
//! failures are encoded as fields on the returned [`Endpoint`]; only
//! unexpected I/O (a failed blocking-task join) surfaces as [`ResolverError`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use url::{Host, Url};

use crate::{ICMP_TIMEOUT, TCP_CONNECT_TIMEOUT};

/// How many ICMP echo requests to send before giving up.
pub const DEFAULT_MAX_TRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("background resolution task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Ip,
    Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatencyClass {
    Fast,
    Stable,
    Slow,
    Unstable,
    VeryUnstable,
    Unreachable,
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LatencyClass::Fast => "fast",
            LatencyClass::Stable => "stable",
            LatencyClass::Slow => "slow",
            LatencyClass::Unstable => "unstable",
            LatencyClass::VeryUnstable => "very-unstable",
            LatencyClass::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Structured result of resolving user input.
///
/// Invariant: when `tcp_open == Some(true)`, `resolved_url` is non-empty and
/// carries the scheme that succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub original: String,
    pub input_kind: Option<InputKind>,
    pub ip: Option<IpAddr>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    pub resolved_url: Option<String>,
    pub icmp_reachable: bool,
    pub latency_ms: Option<f64>,
    pub latency_class: LatencyClass,
    pub os_guess: String,
    pub tcp_open: Option<bool>,
    pub error: Option<String>,
}

impl Endpoint {
    fn new(original: &str) -> Self {
        Self {
            original: original.to_owned(),
            input_kind: None,
            ip: None,
            hostname: None,
            port: None,
            scheme: None,
            resolved_url: None,
            icmp_reachable: false,
            latency_ms: None,
            latency_class: LatencyClass::Unreachable,
            os_guess: "Unknown".to_owned(),
            tcp_open: None,
            error: None,
        }
    }

    /// An error that should abort dispatch for this target.
    ///
    /// A failed TCP connect is recoverable: the port scanner may still be able
    /// to probe the host.
    pub fn fatal_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .filter(|e| !e.starts_with("TCP connection"))
    }

    /// Best human-facing name for the target.
    pub fn display_name(&self) -> String {
        if let Some(url) = &self.resolved_url {
            return url.clone();
        }
        if let Some(hostname) = &self.hostname {
            return hostname.clone();
        }
        if let Some(ip) = self.ip {
            return ip.to_string();
        }
        self.original.clone()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Resolves `raw` with the default number of ICMP tries.
pub async fn resolve(raw: &str, port_override: Option<u16>) -> Result<Endpoint, ResolverError> {
    resolve_with_tries(raw, port_override, DEFAULT_MAX_TRIES).await
}

pub async fn resolve_with_tries(
    raw: &str,
    port_override: Option<u16>,
    max_tries: u32,
) -> Result<Endpoint, ResolverError> {
    let mut endpoint = Endpoint::new(raw);

    let Some(parsed) = parse_input(raw, port_override) else {
        endpoint.error = Some("Invalid host format".to_owned());
        return Ok(endpoint);
    };
    endpoint.port = parsed.port;

    match &parsed.host {
        HostInput::Ip(ip) => {
            endpoint.input_kind = Some(InputKind::Ip);
            endpoint.ip = Some(*ip);
            match reverse_lookup(*ip).await? {
                Some(name) => endpoint.hostname = Some(name),
                None => endpoint.error = Some("Reverse DNS lookup failed".to_owned()),
            }
        }
        HostInput::Domain(domain) => {
            endpoint.input_kind = Some(InputKind::Domain);
            match forward_lookup(domain.clone()).await? {
                Ok(ip) => {
                    endpoint.ip = Some(ip);
                    endpoint.hostname = Some(domain.clone());
                }
                Err(e) => {
                    // Fatal: without an address there is nothing to probe.
                    endpoint.error = Some(format!("DNS resolution failed: {e}"));
                    return Ok(endpoint);
                }
            }
        }
    }

    if let Some(ip) = endpoint.ip {
        let (latency, ttl) = ping_host(ip, max_tries).await;
        endpoint.latency_ms = latency;
        endpoint.latency_class = classify_latency(latency);
        endpoint.icmp_reachable = latency.is_some();
        endpoint.os_guess = guess_os_from_ttl(ttl).to_owned();
    }

    negotiate_scheme(&mut endpoint, &parsed).await;

    Ok(endpoint)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostInput {
    Ip(IpAddr),
    Domain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedInput {
    host: HostInput,
    /// `port_override`, else the explicit port from the input.
    port: Option<u16>,
    /// Scheme taken from the input URL, if one was given.
    scheme: Option<Scheme>,
}

fn parse_input(raw: &str, port_override: Option<u16>) -> Option<ParsedInput> {
    let (url, scheme) = if raw.contains("://") {
        let url = Url::parse(raw).ok()?;
        let scheme = match url.scheme() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        };
        (url, scheme)
    } else {
        (Url::parse(&format!("http://{raw}")).ok()?, None)
    };

    let host = match url.host()? {
        Host::Domain(d) => HostInput::Domain(d.to_owned()),
        Host::Ipv4(ip) => HostInput::Ip(IpAddr::V4(ip)),
        Host::Ipv6(ip) => HostInput::Ip(IpAddr::V6(ip)),
    };

    Some(ParsedInput {
        host,
        port: port_override.or_else(|| url.port()),
        scheme,
    })
}

async fn reverse_lookup(ip: IpAddr) -> Result<Option<String>, ResolverError> {
    let name = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip).ok()).await?;
    Ok(name)
}

async fn forward_lookup(domain: String) -> Result<Result<IpAddr, String>, ResolverError> {
    let resolved = tokio::task::spawn_blocking(move || {
        dns_lookup::lookup_host(&domain).map_err(|e| e.to_string())
    })
    .await?;

    Ok(resolved.and_then(|addrs| {
        // Prefer A records, matching classic resolver behaviour.
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| "no addresses returned".to_owned())
    }))
}

/// Sends up to `max_tries` ICMP echo requests and returns the first
/// successful round-trip in milliseconds together with the reply TTL.
///
/// Raw-socket failures (typically: not running as root) degrade to
/// unreachable instead of failing resolution.
async fn ping_host(ip: IpAddr, max_tries: u32) -> (Option<f64>, Option<u8>) {
    use surge_ping::{Client, Config, IcmpPacket, PingIdentifier, PingSequence, ICMP};

    let config = match ip {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };

    let client = match Client::new(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("ICMP socket unavailable (requires elevated privileges): {e}");
            return (None, None);
        }
    };

    let payload = [0u8; 56];
    let mut pinger = client.pinger(ip, PingIdentifier(0x4e48)).await;
    pinger.timeout(ICMP_TIMEOUT);

    for seq in 0..max_tries {
        let start = Instant::now();
        match pinger.ping(PingSequence(seq as u16), &payload).await {
            Ok((packet, _rtt)) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                let ttl = match packet {
                    IcmpPacket::V4(packet) => packet.get_ttl(),
                    IcmpPacket::V6(_) => None,
                };
                return (Some(latency), ttl);
            }
            Err(e) => {
                tracing::debug!(%ip, seq, "ICMP echo failed: {e}");
            }
        }
    }

    (None, None)
}

pub fn classify_latency(latency_ms: Option<f64>) -> LatencyClass {
    let Some(latency) = latency_ms else {
        return LatencyClass::Unreachable;
    };

    if latency < 50.0 {
        LatencyClass::Fast
    } else if latency < 150.0 {
        LatencyClass::Stable
    } else if latency < 300.0 {
        LatencyClass::Slow
    } else if latency < 1000.0 {
        LatencyClass::Unstable
    } else {
        LatencyClass::VeryUnstable
    }
}

/// Guesses the operating system from an observed reply TTL.
///
/// Picks the smallest initial TTL in `{1, 32, 64, 128, 255}` that is >= the
/// observed value and within 20 hops of it.
pub fn guess_os_from_ttl(ttl: Option<u8>) -> &'static str {
    const TTL_OS_MAP: [(u8, &str); 5] = [
        (1, "Hop-Limited"),
        (32, "Older Windows"),
        (64, "Linux"),
        (128, "Windows"),
        (255, "Network Device"),
    ];

    let Some(ttl) = ttl else {
        return "Unknown";
    };
    if ttl == 0 {
        return "Unknown";
    }

    for (initial, os) in TTL_OS_MAP {
        if ttl <= initial && u16::from(initial) - u16::from(ttl) < 20 {
            return os;
        }
    }

    "Unknown"
}

/// Builds `scheme://host[:port]`, omitting the port iff it is the default
/// for the scheme.
pub fn build_url(scheme: Scheme, host: &str, port: u16) -> String {
    if port == scheme.default_port() {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}:{port}")
    }
}

/// Remaps a scheme whose port implies the other protocol.
fn remap_scheme(scheme: Scheme, port: u16) -> Scheme {
    match (scheme, port) {
        (Scheme::Https, 80) => Scheme::Http,
        (Scheme::Http, 443) => Scheme::Https,
        _ => scheme,
    }
}

async fn negotiate_scheme(endpoint: &mut Endpoint, parsed: &ParsedInput) {
    let Some(ip) = endpoint.ip else {
        return;
    };

    let initial = parsed.scheme.unwrap_or(Scheme::Https);
    let candidates: &[Scheme] = if initial == Scheme::Https {
        &[Scheme::Https, Scheme::Http]
    } else {
        &[initial]
    };

    let mut last_port = None;

    for &candidate in candidates {
        let port = parsed.port.unwrap_or_else(|| candidate.default_port());
        last_port = Some(port);

        if can_connect_tcp(ip, port).await {
            let scheme = remap_scheme(candidate, port);
            let url_host = endpoint
                .hostname
                .clone()
                .unwrap_or_else(|| ip.to_string());

            endpoint.tcp_open = Some(true);
            endpoint.port = Some(port);
            endpoint.scheme = Some(scheme);
            endpoint.resolved_url = Some(build_url(scheme, &url_host, port));
            endpoint.error = None;
            return;
        }

        endpoint.tcp_open = Some(false);
        endpoint.error = Some(format!("TCP connection to port {port} failed"));
    }

    // Every scheme candidate failed; with an explicit port the target may
    // still speak a non-HTTP protocol on it.
    if let Some(port) = parsed.port {
        if can_connect_tcp(ip, port).await {
            let scheme = remap_scheme(initial, port);
            let url_host = endpoint
                .hostname
                .clone()
                .unwrap_or_else(|| ip.to_string());

            endpoint.tcp_open = Some(true);
            endpoint.port = Some(port);
            endpoint.scheme = Some(scheme);
            endpoint.resolved_url = Some(build_url(scheme, &url_host, port));
            endpoint.error = None;
            return;
        }
    }

    if endpoint.tcp_open.is_none() {
        endpoint.tcp_open = Some(false);
        endpoint.error = match last_port {
            Some(port) => Some(format!("TCP connection to port {port} failed")),
            None => Some("No open port found and URL could not be resolved".to_owned()),
        };
    }
}

async fn can_connect_tcp(ip: IpAddr, port: u16) -> bool {
    let addr = SocketAddr::new(ip, port);

    matches!(
        tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_input() {
        let parsed = parse_input("http://example.com:8080/", None).unwrap();

        assert_eq!(parsed.host, HostInput::Domain("example.com".to_owned()));
        assert_eq!(parsed.port, Some(8080));
        assert_eq!(parsed.scheme, Some(Scheme::Http));
    }

    #[test]
    fn parses_bare_host_with_port() {
        let parsed = parse_input("example.com:8443", None).unwrap();

        assert_eq!(parsed.host, HostInput::Domain("example.com".to_owned()));
        assert_eq!(parsed.port, Some(8443));
        assert_eq!(parsed.scheme, None);
    }

    #[test]
    fn port_override_wins_over_url_port() {
        let parsed = parse_input("https://example.com:8443", Some(443)).unwrap();

        assert_eq!(parsed.port, Some(443));
        assert_eq!(parsed.scheme, Some(Scheme::Https));
    }

    #[test]
    fn classifies_ip_literals() {
        let parsed = parse_input("192.0.2.10", None).unwrap();

        assert_eq!(
            parsed.host,
            HostInput::Ip(IpAddr::from([192, 0, 2, 10]))
        );
        assert_eq!(parsed.port, None);
    }

    #[test]
    fn latency_thresholds() {
        assert_eq!(classify_latency(Some(10.0)), LatencyClass::Fast);
        assert_eq!(classify_latency(Some(50.0)), LatencyClass::Stable);
        assert_eq!(classify_latency(Some(149.9)), LatencyClass::Stable);
        assert_eq!(classify_latency(Some(299.0)), LatencyClass::Slow);
        assert_eq!(classify_latency(Some(999.0)), LatencyClass::Unstable);
        assert_eq!(classify_latency(Some(5000.0)), LatencyClass::VeryUnstable);
        assert_eq!(classify_latency(None), LatencyClass::Unreachable);
    }

    #[test]
    fn ttl_os_guesses() {
        assert_eq!(guess_os_from_ttl(Some(64)), "Linux");
        assert_eq!(guess_os_from_ttl(Some(52)), "Linux");
        assert_eq!(guess_os_from_ttl(Some(128)), "Windows");
        assert_eq!(guess_os_from_ttl(Some(117)), "Windows");
        assert_eq!(guess_os_from_ttl(Some(255)), "Network Device");
        assert_eq!(guess_os_from_ttl(Some(30)), "Older Windows");
        assert_eq!(guess_os_from_ttl(Some(1)), "Hop-Limited");
        // 128 - 100 >= 20, outside the plausible decrement window.
        assert_eq!(guess_os_from_ttl(Some(100)), "Unknown");
        assert_eq!(guess_os_from_ttl(Some(0)), "Unknown");
        assert_eq!(guess_os_from_ttl(None), "Unknown");
    }

    #[test]
    fn url_building_elides_default_ports() {
        assert_eq!(build_url(Scheme::Http, "example.com", 80), "http://example.com");
        assert_eq!(
            build_url(Scheme::Http, "example.com", 8080),
            "http://example.com:8080"
        );
        assert_eq!(
            build_url(Scheme::Https, "example.com", 443),
            "https://example.com"
        );
    }

    #[test]
    fn scheme_port_remapping() {
        assert_eq!(remap_scheme(Scheme::Https, 80), Scheme::Http);
        assert_eq!(remap_scheme(Scheme::Http, 443), Scheme::Https);
        assert_eq!(remap_scheme(Scheme::Https, 8443), Scheme::Https);
    }

    #[tokio::test]
    async fn resolves_open_local_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let endpoint = resolve_with_tries("127.0.0.1", Some(port), 1).await.unwrap();

        assert_eq!(endpoint.input_kind, Some(InputKind::Ip));
        assert_eq!(endpoint.tcp_open, Some(true));
        assert_eq!(endpoint.port, Some(port));
        let url = endpoint.resolved_url.unwrap();
        assert!(url.ends_with(&format!(":{port}")), "unexpected url {url}");
    }

    #[tokio::test]
    async fn reports_closed_port_as_recoverable() {
        // Bind-then-drop to find a port that is closed.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let endpoint = resolve_with_tries("127.0.0.1", Some(port), 1).await.unwrap();

        assert_eq!(endpoint.tcp_open, Some(false));
        let error = endpoint.error.clone().unwrap();
        assert_eq!(error, format!("TCP connection to port {port} failed"));
        // A failed TCP connect must not abort dispatch.
        assert!(endpoint.fatal_error().is_none());
    }

    #[tokio::test]
    async fn dns_failure_is_fatal() {
        let endpoint = resolve_with_tries("definitely-not-a-real-host.invalid", None, 1)
            .await
            .unwrap();

        assert_eq!(endpoint.ip, None);
        assert!(endpoint.error.as_deref().unwrap().starts_with("DNS resolution failed"));
        assert!(endpoint.fatal_error().is_some());
    }
}
