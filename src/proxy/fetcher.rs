//! Source fetcher for remote key lists
//!
//! This module provides functionality for:
//! - Downloading key lists from HTTP sources, one source at a time
//! - Sniffing and decoding base64-wrapped subscription bodies
//! - Collapsing the keys of all sources into one deduplicated batch

use crate::proxy::models::{Descriptor, SourceTag};
use crate::proxy::parser::{decode_base64_lenient, DescriptorParser};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// A remote key list and the bucket its keys are published under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tag: SourceTag,
}

impl KeySource {
    pub fn new(name: &str, url: &str, tag: SourceTag) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            tag,
        }
    }

    /// Built-in source list
    pub fn defaults() -> Vec<KeySource> {
        vec![
            KeySource::new(
                "kort0881-all-new",
                "https://raw.githubusercontent.com/kort0881/vpn-vless-configs-russia/main/githubmirror/new/all_new.txt",
                SourceTag::General,
            ),
            KeySource::new(
                "zieng2-vless",
                "https://raw.githubusercontent.com/zieng2/wl/main/vless.txt",
                SourceTag::Whitelist,
            ),
            KeySource::new(
                "lowiklive-whitelist-bypass",
                "https://raw.githubusercontent.com/LowiKLive/BypassWhitelistRu/refs/heads/main/WhiteList-Bypass_Ru.txt",
                SourceTag::Whitelist,
            ),
            KeySource::new(
                "zieng2-vless-universal",
                "https://raw.githubusercontent.com/zieng2/wl/main/vless_universal.txt",
                SourceTag::Whitelist,
            ),
            KeySource::new(
                "vsevjik-wwh",
                "https://raw.githubusercontent.com/vsevjik/OBSpiskov/refs/heads/main/wwh",
                SourceTag::General,
            ),
            KeySource::new(
                "vkcloud-love",
                "https://jsnegsukavsos.hb.ru-msk.vkcloud-storage.ru/love",
                SourceTag::General,
            ),
            KeySource::new("etoneya", "https://etoneya.a9fm.site/1", SourceTag::General),
            KeySource::new(
                "gpucloud-cjdr",
                "https://s3c3.001.gpucloud.ru/vahe4xkwi/cjdr",
                SourceTag::General,
            ),
        ]
    }
}

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Name of the source that was fetched
    pub source: String,
    /// Keys extracted from the source, in line order
    pub descriptors: Vec<Descriptor>,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl FetchResult {
    pub fn success(source: String, descriptors: Vec<Descriptor>) -> Self {
        Self {
            source,
            descriptors,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            descriptors: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the source fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// HTTP fetcher for key lists
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Download one source and return its decoded text
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(decode_body(&content))
    }

    /// Fetch and parse one source
    pub async fn fetch_source(&self, source: &KeySource) -> Result<Vec<Descriptor>> {
        let content = self.fetch_text(&source.url).await?;
        Ok(extract_descriptors(&content, source.tag))
    }

    /// Fetch every source in order, returning a result for each
    pub async fn fetch_sources_with_results(&self, sources: &[KeySource]) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(sources.len());

        for source in sources {
            let result = match self.fetch_source(source).await {
                Ok(descriptors) => {
                    tracing::info!("{}: {} keys", source.name, descriptors.len());
                    FetchResult::success(source.name.clone(), descriptors)
                }
                Err(e) => {
                    tracing::warn!("failed to fetch {} ({}): {}", source.name, source.url, e);
                    FetchResult::failure(source.name.clone(), e.to_string())
                }
            };
            results.push(result);
        }

        results
    }

    /// Fetch every source and merge the keys into one deduplicated batch
    pub async fn fetch_all(&self, sources: &[KeySource]) -> Vec<Descriptor> {
        let results = self.fetch_sources_with_results(sources).await;
        dedup_descriptors(results.into_iter().flat_map(|r| r.descriptors))
    }
}

/// Decode a subscription body that is not plain key text
///
/// Bodies already containing `vmess://` or `vless://` are returned as is.
/// Anything else is treated as base64 when it decodes.
pub fn decode_body(content: &str) -> String {
    let content = content.trim();
    if content.contains("vmess://") || content.contains("vless://") {
        return content.to_string();
    }
    decode_base64_lenient(content).unwrap_or_else(|| content.to_string())
}

/// Parse every key line of a decoded body
pub fn extract_descriptors(content: &str, tag: SourceTag) -> Vec<Descriptor> {
    DescriptorParser::parse_string(content, tag)
}

/// Keep the first descriptor seen for every id, preserving order
pub fn dedup_descriptors<I>(descriptors: I) -> Vec<Descriptor>
where
    I: IntoIterator<Item = Descriptor>,
{
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_timeout(Duration::from_secs(3))
            .with_user_agent("Custom Agent".to_string());
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.user_agent, "Custom Agent");
    }

    #[test]
    fn test_default_sources() {
        let sources = KeySource::defaults();
        assert_eq!(sources.len(), 8);
        assert!(sources.iter().all(|s| s.url.starts_with("https://")));
        assert!(sources.iter().any(|s| s.tag == SourceTag::Whitelist));
    }

    #[test]
    fn test_fetch_result() {
        let result = FetchResult::failure("src".to_string(), "404".to_string());
        assert!(!result.is_success());
        assert!(result.descriptors.is_empty());

        let result = FetchResult::success("src".to_string(), Vec::new());
        assert!(result.is_success());
    }

    #[test]
    fn test_decode_plain_body() {
        let body = "  vless://a@1.1.1.1:443\nvless://b@2.2.2.2:443  ";
        assert_eq!(decode_body(body), "vless://a@1.1.1.1:443\nvless://b@2.2.2.2:443");
    }

    #[test]
    fn test_decode_base64_body() {
        let plain = "trojan://p@3.3.3.3:443#x\nss://YWVzOnB3@4.4.4.4:8388";
        let body = STANDARD.encode(plain);
        assert_eq!(decode_body(&body), plain);
    }

    #[test]
    fn test_decode_undecodable_body_is_kept() {
        let body = "trojan://p@3.3.3.3:443 no base64 here";
        assert_eq!(decode_body(body), body);
    }

    #[test]
    fn test_dedup_first_seen_wins() {
        let general = extract_descriptors(
            "vless://a@1.1.1.1:443#first\nvless://b@2.2.2.2:443",
            SourceTag::General,
        );
        let whitelist = extract_descriptors(
            "vless://a@1.1.1.1:443#second\nvless://c@3.3.3.3:443",
            SourceTag::Whitelist,
        );

        let merged = dedup_descriptors(general.into_iter().chain(whitelist));
        let ids: Vec<_> = merged.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "vless://a@1.1.1.1:443",
                "vless://b@2.2.2.2:443",
                "vless://c@3.3.3.3:443"
            ]
        );
        assert_eq!(merged[0].annotation(), Some("first"));
        assert_eq!(merged[0].source_tag, SourceTag::General);
    }
}
