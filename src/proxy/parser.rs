//! Descriptor parser for proxy key strings
//!
//! Turns one raw key (`vless://`, `vmess://`, `trojan://`, `ss://`) into a
//! [`Descriptor`]: its dedup id, and when the authority can be read, the
//! endpoint and declared transport.

use crate::proxy::models::{Descriptor, Endpoint, SourceTag, Transport};
use crate::Result;
use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Schemes recognised as proxy keys
pub const KEY_SCHEMES: &[&str] = &["vless://", "vmess://", "trojan://", "ss://"];

/// Accepts padded or unpadded input and sloppy trailing bits
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 in either alphabet, ignoring whitespace and padding
pub fn decode_base64_lenient(data: &str) -> Option<String> {
    let normalized: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let trimmed = normalized.trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    let bytes = LENIENT_BASE64.decode(trimmed).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Undo the HTML escaping some sources apply to query strings
fn unescape_html(line: &str) -> String {
    if !line.contains('&') {
        return line.to_string();
    }
    line.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Parser for proxy key descriptors
pub struct DescriptorParser;

impl DescriptorParser {
    /// Whether the line starts with one of the recognised key schemes
    pub fn is_key(line: &str) -> bool {
        KEY_SCHEMES.iter().any(|scheme| line.starts_with(scheme))
    }

    /// Parse a single key line
    ///
    /// Returns `None` for blank lines, comments and non-key text. A key whose
    /// authority cannot be read is still returned, with `endpoint: None`.
    pub fn parse_line(line: &str, source_tag: SourceTag) -> Option<Descriptor> {
        let raw = unescape_html(line.trim());
        if raw.is_empty() || raw.starts_with('#') || !Self::is_key(&raw) {
            return None;
        }

        let id = match raw.split_once('#') {
            Some((base, _)) => base.to_string(),
            None => raw.clone(),
        };
        let endpoint = Self::parse_endpoint(&id);

        Some(Descriptor {
            raw,
            id,
            endpoint,
            source_tag,
            country: None,
        })
    }

    /// Read the endpoint from a key with its annotation already stripped
    fn parse_endpoint(key: &str) -> Option<Endpoint> {
        let (scheme, rest) = key.split_once("://")?;
        match scheme {
            "vmess" => Self::parse_vmess(rest).or_else(|| Self::parse_authority_form(key, true)),
            "trojan" => Self::parse_authority_form(key, true),
            "ss" if !rest.split('?').next().unwrap_or_default().contains('@') => {
                let payload = rest.split('?').next()?.trim_end_matches('/');
                let decoded = decode_base64_lenient(payload)?;
                Self::parse_authority_form(&format!("ss://{}", decoded), false)
            }
            _ => Self::parse_authority_form(key, false),
        }
    }

    /// Parse `scheme://userinfo@host:port?query` style keys
    fn parse_authority_form(key: &str, force_tls: bool) -> Option<Endpoint> {
        let (_, after_at) = key.split_once('@')?;
        let authority = after_at.split(['?', '#', '/']).next()?;
        let (host, port) = Self::split_host_port(authority)?;

        let params = key
            .split_once('?')
            .map(|(_, query)| Self::parse_query(query))
            .unwrap_or_default();

        let security = params.get("security").map(String::as_str);
        let tls = force_tls || matches!(security, Some("tls") | Some("reality"));
        let websocket = params.get("type").map(String::as_str) == Some("ws")
            || params.get("net").map(String::as_str) == Some("ws");

        let mut endpoint = Endpoint::new(host, port, Transport::from_flags(tls, websocket))
            .with_sni(params.get("sni").cloned());
        if websocket {
            if let Some(path) = params.get("path").filter(|p| !p.is_empty()) {
                endpoint = endpoint.with_path(path.clone());
            }
        }
        Some(endpoint)
    }

    /// Parse a base64 JSON vmess payload
    fn parse_vmess(payload: &str) -> Option<Endpoint> {
        let payload = payload.split('?').next()?;
        let decoded = decode_base64_lenient(payload)?;
        let json: serde_json::Value = serde_json::from_str(decoded.trim()).ok()?;

        let host = json.get("add")?.as_str()?.trim().to_string();
        if host.is_empty() {
            return None;
        }
        let port = match json.get("port")? {
            serde_json::Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
            serde_json::Value::String(s) => s.trim().parse::<u16>().ok()?,
            _ => return None,
        };
        if port == 0 {
            return None;
        }

        let field = |name: &str| {
            json.get(name)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let tls = matches!(field("tls").as_deref(), Some("tls") | Some("reality"));
        let websocket = field("net").as_deref() == Some("ws");

        let mut endpoint = Endpoint::new(host, port, Transport::from_flags(tls, websocket))
            .with_sni(field("sni").or_else(|| field("host")));
        if websocket {
            if let Some(path) = field("path") {
                endpoint = endpoint.with_path(path);
            }
        }
        Some(endpoint)
    }

    /// Split `host:port` or `[v6]:port`
    fn split_host_port(authority: &str) -> Option<(String, u16)> {
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']')?;
            (host, rest.strip_prefix(':')?)
        } else {
            authority.rsplit_once(':')?
        };

        let host = host.trim();
        if host.is_empty() {
            return None;
        }
        let port: u16 = port.trim().parse().ok()?;
        if port == 0 {
            return None;
        }
        Some((host.to_string(), port))
    }

    fn parse_query(query: &str) -> HashMap<String, String> {
        let query = query.split('#').next().unwrap_or_default();
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
            .collect()
    }

    /// Parse keys from a string (multiple lines)
    pub fn parse_string(content: &str, source_tag: SourceTag) -> Vec<Descriptor> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, source_tag))
            .collect()
    }

    /// Parse keys from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, source_tag: SourceTag) -> Result<Vec<Descriptor>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, source_tag))
    }
}
