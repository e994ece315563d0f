//! Descriptor and verdict data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport an endpoint declares for its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    PlainTcp,
    TlsTcp,
    PlainWs,
    TlsWs,
}

impl Transport {
    pub fn from_flags(tls: bool, websocket: bool) -> Self {
        match (tls, websocket) {
            (false, false) => Transport::PlainTcp,
            (true, false) => Transport::TlsTcp,
            (false, true) => Transport::PlainWs,
            (true, true) => Transport::TlsWs,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::TlsTcp | Transport::TlsWs)
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Transport::PlainWs | Transport::TlsWs)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::PlainTcp => write!(f, "tcp"),
            Transport::TlsTcp => write!(f, "tls"),
            Transport::PlainWs => write!(f, "ws"),
            Transport::TlsWs => write!(f, "wss"),
        }
    }
}

/// Bucket a descriptor is published under, assigned by its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    #[default]
    General,
    Whitelist,
}

impl SourceTag {
    pub const ALL: [SourceTag; 2] = [SourceTag::General, SourceTag::Whitelist];
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::General => write!(f, "general"),
            SourceTag::Whitelist => write!(f, "whitelist"),
        }
    }
}

/// Network location of a probeable descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// WebSocket request path, always starting with `/`
    pub path: String,
    /// TLS server name, when it differs from the host
    pub sni: Option<String>,
}

impl Endpoint {
    pub fn new(host: String, port: u16, transport: Transport) -> Self {
        Self {
            host,
            port,
            transport,
            path: "/".to_string(),
            sni: None,
        }
    }

    pub fn with_path(mut self, path: String) -> Self {
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn with_sni(mut self, sni: Option<String>) -> Self {
        self.sni = sni.filter(|s| !s.is_empty());
        self
    }

    /// Server name presented in the TLS handshake
    pub fn server_name(&self) -> &str {
        self.sni.as_deref().unwrap_or(&self.host)
    }

    /// Authority in `host:port` form, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// URL sent in the WebSocket upgrade; its host part is the server name
    pub fn ws_url(&self) -> String {
        let scheme = if self.transport.is_tls() { "wss" } else { "ws" };
        let name = self.server_name();
        if name.contains(':') {
            format!("{}://[{}]:{}{}", scheme, name, self.port, self.path)
        } else {
            format!("{}://{}:{}{}", scheme, name, self.port, self.path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.authority(), self.transport)
    }
}

/// Parsed view of one raw endpoint string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Descriptor text as read, annotation included
    pub raw: String,
    /// `raw` without its `#` annotation; cache and dedup key
    pub id: String,
    /// `None` when no host/port could be parsed
    pub endpoint: Option<Endpoint>,
    pub source_tag: SourceTag,
    pub country: Option<String>,
}

impl Descriptor {
    /// Annotation fragment after the first `#`, if any
    pub fn annotation(&self) -> Option<&str> {
        self.raw.split_once('#').map(|(_, tag)| tag)
    }

    pub fn is_probeable(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn with_source_tag(mut self, tag: SourceTag) -> Self {
        self.source_tag = tag;
        self
    }
}

/// Liveness verdict for one descriptor id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub alive: bool,
    /// Present iff `alive`
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub country: Option<String>,
}

impl Verdict {
    pub fn alive(latency_ms: u64, checked_at: DateTime<Utc>) -> Self {
        Self {
            alive: true,
            latency_ms: Some(latency_ms),
            checked_at,
            country: None,
        }
    }

    pub fn dead(checked_at: DateTime<Utc>) -> Self {
        Self {
            alive: false,
            latency_ms: None,
            checked_at,
            country: None,
        }
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    /// Time elapsed since the check, as seen at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.checked_at
    }
}

/// Latency bucket used in published annotations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    Normal,
    Slow,
}

impl Quality {
    pub fn from_latency(latency_ms: u64) -> Self {
        if latency_ms < 500 {
            Quality::Fast
        } else if latency_ms < 1500 {
            Quality::Normal
        } else {
            Quality::Slow
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Fast => write!(f, "fast"),
            Quality::Normal => write!(f, "normal"),
            Quality::Slow => write!(f, "slow"),
        }
    }
}

/// One surviving descriptor as handed to the publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEntry {
    pub id: String,
    pub latency_ms: u64,
    pub country: Option<String>,
    pub source_tag: SourceTag,
}

impl LiveEntry {
    pub fn quality(&self) -> Quality {
        Quality::from_latency(self.latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_from_flags() {
        assert_eq!(Transport::from_flags(false, false), Transport::PlainTcp);
        assert_eq!(Transport::from_flags(true, false), Transport::TlsTcp);
        assert_eq!(Transport::from_flags(false, true), Transport::PlainWs);
        assert_eq!(Transport::from_flags(true, true), Transport::TlsWs);
        assert!(Transport::TlsWs.is_tls());
        assert!(Transport::TlsWs.is_websocket());
        assert!(!Transport::TlsTcp.is_websocket());
    }

    #[test]
    fn test_endpoint_ws_url() {
        let endpoint = Endpoint::new("example.com".to_string(), 8443, Transport::TlsWs)
            .with_path("ws".to_string());
        assert_eq!(endpoint.ws_url(), "wss://example.com:8443/ws");

        let endpoint = Endpoint::new("1.2.3.4".to_string(), 80, Transport::PlainWs);
        assert_eq!(endpoint.ws_url(), "ws://1.2.3.4:80/");
    }

    #[test]
    fn test_endpoint_ipv6_authority() {
        let endpoint = Endpoint::new("2001:db8::1".to_string(), 443, Transport::PlainTcp);
        assert_eq!(endpoint.authority(), "[2001:db8::1]:443");
    }

    #[test]
    fn test_endpoint_server_name() {
        let endpoint = Endpoint::new("1.2.3.4".to_string(), 443, Transport::TlsTcp);
        assert_eq!(endpoint.server_name(), "1.2.3.4");

        let endpoint = endpoint.with_sni(Some("cdn.example.org".to_string()));
        assert_eq!(endpoint.server_name(), "cdn.example.org");

        let endpoint = endpoint.with_sni(Some(String::new()));
        assert_eq!(endpoint.server_name(), "1.2.3.4");
    }

    #[test]
    fn test_verdict_constructors() {
        let now = Utc::now();
        let verdict = Verdict::alive(120, now);
        assert!(verdict.alive);
        assert_eq!(verdict.latency_ms, Some(120));

        let verdict = Verdict::dead(now).with_country(Some("DE".to_string()));
        assert!(!verdict.alive);
        assert!(verdict.latency_ms.is_none());
        assert_eq!(verdict.country.as_deref(), Some("DE"));
    }

    #[test]
    fn test_quality_thresholds() {
        assert_eq!(Quality::from_latency(0), Quality::Fast);
        assert_eq!(Quality::from_latency(499), Quality::Fast);
        assert_eq!(Quality::from_latency(500), Quality::Normal);
        assert_eq!(Quality::from_latency(1499), Quality::Normal);
        assert_eq!(Quality::from_latency(1500), Quality::Slow);
    }
}
