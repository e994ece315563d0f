//! Persistent verdict cache
//!
//! The cache file is a JSON object keyed by descriptor id:
//!
//! ```json
//! { "vless://u@1.2.3.4:443?security=tls": { "alive": true, "latency": 120, "time": 1760000000, "country": "DE" } }
//! ```
//!
//! A missing or corrupt file loads as an empty cache. Individual records
//! that fail to decode are skipped.

use crate::proxy::models::Verdict;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Unix timestamp as written by either an integer or a float encoder
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum UnixTime {
    Seconds(i64),
    Fractional(f64),
}

impl UnixTime {
    fn to_datetime(self) -> Option<DateTime<Utc>> {
        let secs = match self {
            UnixTime::Seconds(s) => s,
            UnixTime::Fractional(f) if f.is_finite() => f.floor() as i64,
            UnixTime::Fractional(_) => return None,
        };
        Utc.timestamp_opt(secs, 0).single()
    }
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    alive: bool,
    #[serde(default)]
    latency: Option<u64>,
    time: UnixTime,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecordOut<'a> {
    alive: bool,
    latency: Option<u64>,
    time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
}

impl StoredRecord {
    fn into_verdict(self) -> Option<Verdict> {
        let checked_at = self.time.to_datetime()?;
        let verdict = match (self.alive, self.latency) {
            (true, Some(latency)) => Verdict::alive(latency, checked_at),
            // an alive record without a latency cannot be reused
            _ => Verdict::dead(checked_at),
        };
        Some(verdict.with_country(self.country))
    }
}

impl<'a> From<&'a Verdict> for RecordOut<'a> {
    fn from(verdict: &'a Verdict) -> Self {
        Self {
            alive: verdict.alive,
            latency: verdict.latency_ms,
            time: verdict.checked_at.timestamp(),
            country: verdict.country.as_deref(),
        }
    }
}

/// Durable id -> verdict store with age-based validity
#[derive(Debug, Clone, Default)]
pub struct VerdictCache {
    path: Option<PathBuf>,
    entries: HashMap<String, Verdict>,
}

impl VerdictCache {
    /// Cache with no backing file; `save` only prunes
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`, degrading to empty on any failure
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let entries = match fs::read_to_string(path) {
            Ok(content) => parse_entries(&content).unwrap_or_else(|e| {
                tracing::warn!("cache file {:?} is unreadable, starting empty: {}", path, e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no cache file at {:?}, starting empty", path);
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!("failed to read cache file {:?}: {}", path, e);
                HashMap::new()
            }
        };

        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored verdict regardless of age
    pub fn get(&self, id: &str) -> Option<&Verdict> {
        self.entries.get(id)
    }

    /// Stored verdict if it was checked less than `freshness` before `now`
    pub fn lookup(
        &self,
        id: &str,
        freshness: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<&Verdict> {
        self.entries
            .get(id)
            .filter(|verdict| verdict.age(now) < freshness)
    }

    /// Fresh verdict that may stand in for a probe: only alive ones qualify
    pub fn reusable(
        &self,
        id: &str,
        freshness: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Option<&Verdict> {
        self.lookup(id, freshness, now).filter(|verdict| verdict.alive)
    }

    /// Insert or overwrite the verdict for `id`
    pub fn record(&mut self, id: String, verdict: Verdict) {
        self.entries.insert(id, verdict);
    }

    /// Drop every entry checked at least `retention` before `now`
    pub fn prune(&mut self, retention: chrono::Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, verdict| verdict.age(now) < retention);
        before - self.entries.len()
    }

    /// Prune by `retention` and persist the survivors
    ///
    /// Returns the number of entries written.
    pub fn save(&mut self, retention: chrono::Duration, now: DateTime<Utc>) -> Result<usize> {
        let dropped = self.prune(retention, now);
        if dropped > 0 {
            tracing::info!("pruned {} cache entries older than {}h", dropped, retention.num_hours());
        }

        let Some(path) = self.path.as_deref() else {
            return Ok(self.entries.len());
        };

        let ordered: BTreeMap<&str, RecordOut<'_>> = self
            .entries
            .iter()
            .map(|(id, verdict)| (id.as_str(), RecordOut::from(verdict)))
            .collect();
        let json = serde_json::to_string_pretty(&ordered)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                tracing::debug!("failed to remove {:?}: {}", tmp, cleanup);
            }
            return Err(e.into());
        }

        Ok(ordered.len())
    }
}

fn parse_entries(content: &str) -> Result<HashMap<String, Verdict>> {
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;
    let total = raw.len();

    let entries: HashMap<String, Verdict> = raw
        .into_iter()
        .filter_map(|(id, value)| {
            let record: StoredRecord = serde_json::from_value(value).ok()?;
            Some((id, record.into_verdict()?))
        })
        .collect();

    if entries.len() < total {
        tracing::debug!("skipped {} malformed cache records", total - entries.len());
    }
    Ok(entries)
}
