//! Run configuration

use crate::error::ConfigError;
use crate::proxy::fetcher::KeySource;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default timeout for a single probe in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default worker pool size
const DEFAULT_CONCURRENCY: usize = 40;

/// Alive verdicts younger than this are reused without probing
const DEFAULT_FRESHNESS_HOURS: u64 = 6;

/// Cache entries older than this are dropped on save
const DEFAULT_RETENTION_HOURS: u64 = 72;

/// Upper bound for either cache window (about a century)
pub const MAX_WINDOW_HOURS: u64 = 24 * 365 * 100;

/// Per-run descriptor cap
const DEFAULT_MAX_DESCRIPTORS: usize = 8000;

/// Lines per published chunk file
const DEFAULT_CHUNK_SIZE: usize = 500;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

const DEFAULT_CHANNEL_TAG: &str = "@vlesstrojan";

/// Everything one engine run needs, passed in at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeout_ms: u64,
    pub concurrency: usize,
    pub freshness_hours: u64,
    pub retention_hours: u64,
    pub max_descriptors: usize,
    pub cache_path: PathBuf,
    pub output_dir: PathBuf,
    pub chunk_size: usize,
    pub channel_tag: String,
    /// Prefix for links in the index file, e.g. a raw repository URL
    pub link_base: Option<String>,
    /// Optional GeoLite2/GeoIP2 country or city database
    pub mmdb_path: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub sources: Vec<KeySource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            concurrency: DEFAULT_CONCURRENCY,
            freshness_hours: DEFAULT_FRESHNESS_HOURS,
            retention_hours: DEFAULT_RETENTION_HOURS,
            max_descriptors: DEFAULT_MAX_DESCRIPTORS,
            cache_path: PathBuf::from("checked/history.json"),
            output_dir: PathBuf::from("checked"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_tag: DEFAULT_CHANNEL_TAG.to_string(),
            link_base: None,
            mmdb_path: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            sources: KeySource::defaults(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_freshness_hours(mut self, hours: u64) -> Self {
        self.freshness_hours = hours;
        self
    }

    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    pub fn with_max_descriptors(mut self, cap: usize) -> Self {
        self.max_descriptors = cap;
        self
    }

    pub fn with_cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_link_base(mut self, base: String) -> Self {
        self.link_base = Some(base);
        self
    }

    pub fn with_mmdb_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.mmdb_path = Some(path.into());
        self
    }

    pub fn with_sources(mut self, sources: Vec<KeySource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Freshness window, clamped to [`MAX_WINDOW_HOURS`]
    pub fn freshness_window(&self) -> chrono::Duration {
        window(self.freshness_hours)
    }

    /// Retention window, clamped to [`MAX_WINDOW_HOURS`]
    pub fn retention_window(&self) -> chrono::Duration {
        window(self.retention_hours)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_descriptors == 0 {
            return Err(ConfigError::ZeroCap);
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.freshness_hours > MAX_WINDOW_HOURS {
            return Err(ConfigError::WindowTooLarge {
                field: "freshness_hours",
                hours: self.freshness_hours,
            });
        }
        if self.retention_hours > MAX_WINDOW_HOURS {
            return Err(ConfigError::WindowTooLarge {
                field: "retention_hours",
                hours: self.retention_hours,
            });
        }
        if self.freshness_hours > self.retention_hours {
            return Err(ConfigError::FreshnessExceedsRetention {
                freshness_hours: self.freshness_hours,
                retention_hours: self.retention_hours,
            });
        }
        Ok(())
    }
}

fn window(hours: u64) -> chrono::Duration {
    chrono::Duration::hours(hours.min(MAX_WINDOW_HOURS) as i64)
}

/// Load configuration from a TOML file, falling back to defaults when no
/// file is given or the file does not exist
///
/// The result is not validated; callers validate once all overrides are in.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(config_path) if config_path.exists() => {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
            toml::from_str::<EngineConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?
        }
        Some(config_path) => {
            tracing::warn!("Config file not found at {:?}, using defaults", config_path);
            EngineConfig::default()
        }
        None => EngineConfig::default(),
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::SourceTag;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.freshness_window(), chrono::Duration::hours(6));
        assert_eq!(config.retention_window(), chrono::Duration::hours(72));
        assert!(!config.sources.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new()
            .with_timeout(Duration::from_millis(750))
            .with_concurrency(8)
            .with_max_descriptors(4000)
            .with_chunk_size(100)
            .with_cache_path("/tmp/cache.json");

        assert_eq!(config.timeout_ms, 750);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_descriptors, 4000);
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.cache_path, PathBuf::from("/tmp/cache.json"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig::new().with_concurrency(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));

        let config = EngineConfig::new().with_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));

        let config = EngineConfig::new().with_max_descriptors(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCap));

        let config = EngineConfig::new()
            .with_freshness_hours(100)
            .with_retention_hours(24);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FreshnessExceedsRetention { .. })
        ));
    }

    #[test]
    fn test_load_config_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
timeout_ms = 1500
concurrency = 16

[[sources]]
name = "local"
url = "http://127.0.0.1:8000/keys.txt"
tag = "whitelist"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.freshness_hours, DEFAULT_FRESHNESS_HOURS);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].tag, SourceTag::Whitelist);
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let config: EngineConfig =
            toml::from_str(include_str!("../keyprobe.toml.example")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/keyprobe.toml"))).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_config_defers_validation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "concurrency = 0").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrency));
        assert!(config.with_concurrency(8).validate().is_ok());
    }

    #[test]
    fn test_huge_windows_are_rejected_without_panicking() {
        let config: EngineConfig =
            toml::from_str("freshness_hours = 3000000000000\nretention_hours = 3000000000000\n")
                .unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::WindowTooLarge {
                field: "freshness_hours",
                hours: 3_000_000_000_000,
            })
        );
        assert_eq!(
            config.freshness_window(),
            chrono::Duration::hours(MAX_WINDOW_HOURS as i64)
        );
        assert_eq!(config.retention_window(), config.freshness_window());

        let config = EngineConfig::new().with_retention_hours(u64::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WindowTooLarge { field: "retention_hours", .. })
        ));
        assert!(EngineConfig::new()
            .with_retention_hours(MAX_WINDOW_HOURS)
            .validate()
            .is_ok());
    }
}
