//! keyprobe - liveness checker for proxy key lists
//!
//! Fetches vless/vmess/trojan/ss keys from remote lists, probes each
//! endpoint at the transport level under a bounded worker pool, caches the
//! verdicts across runs and publishes ranked, chunked key files.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::{load_config, EngineConfig};
pub use error::{ConfigError, ProbeError};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
