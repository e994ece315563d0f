//! Typed errors for probing and configuration

use std::time::Duration;
use thiserror::Error;

/// Why a single probe did not produce a latency
///
/// Consumers treat every variant the same way ("not alive"); the
/// variants only exist for debug logging.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("descriptor has no host/port")]
    NoEndpoint,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("websocket upgrade failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("probe timeout must be greater than zero")]
    ZeroTimeout,
    #[error("max_descriptors must be at least 1")]
    ZeroCap,
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,
    #[error("{field} = {hours} exceeds the maximum window")]
    WindowTooLarge { field: &'static str, hours: u64 },
    #[error("freshness window ({freshness_hours}h) exceeds retention window ({retention_hours}h)")]
    FreshnessExceedsRetention {
        freshness_hours: u64,
        retention_hours: u64,
    },
}
