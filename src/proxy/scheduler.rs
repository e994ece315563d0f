//! Probe scheduler: cache partitioning and the bounded worker pool

use crate::error::ProbeError;
use crate::proxy::cache::VerdictCache;
use crate::proxy::models::{Descriptor, Verdict};
use crate::proxy::prober::{Latency, Prober};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// How often (in completed probes) progress is logged
const PROGRESS_EVERY: usize = 100;

/// Limits applied to one scheduling run
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum probes in flight
    pub concurrency: usize,
    /// Hard deadline for a single probe
    pub timeout: Duration,
    /// Alive cache entries younger than this are reused
    pub freshness: chrono::Duration,
    /// Descriptors beyond this count are dropped, in input order
    pub max_descriptors: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 40,
            timeout: Duration::from_secs(2),
            freshness: chrono::Duration::hours(6),
            max_descriptors: 8000,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_freshness(mut self, freshness: chrono::Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_max_descriptors(mut self, cap: usize) -> Self {
        self.max_descriptors = cap;
        self
    }
}

/// Counters for one scheduling run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    /// Descriptors kept after the cap
    pub considered: usize,
    pub dropped_by_cap: usize,
    pub duplicates: usize,
    pub unprobeable: usize,
    pub cached: usize,
    pub probed: usize,
    pub alive: usize,
    pub failed: usize,
}

/// Outcome of a scheduling run
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    /// Alive verdicts keyed by descriptor id, from cache or fresh probes
    pub verdicts: HashMap<String, Verdict>,
    pub stats: ScheduleStats,
}

/// Splits a batch into cache hits and pending probes and runs the probes
/// on a fixed-size worker pool
pub struct ProbeScheduler<P: Prober> {
    prober: Arc<P>,
    config: SchedulerConfig,
}

impl<P: Prober> ProbeScheduler<P> {
    pub fn new(prober: P, config: SchedulerConfig) -> Self {
        Self::with_shared(Arc::new(prober), config)
    }

    pub fn with_shared(prober: Arc<P>, config: SchedulerConfig) -> Self {
        Self { prober, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Produce verdicts for `descriptors`, reusing fresh alive cache entries
    /// and probing the rest
    ///
    /// Only fresh probe results are written to `cache`, after all probes
    /// have finished. Failed probes are recorded as dead and left out of
    /// the returned verdicts.
    pub async fn run(
        &self,
        descriptors: &[Descriptor],
        cache: &mut VerdictCache,
        now: DateTime<Utc>,
    ) -> ScheduleReport {
        let mut stats = ScheduleStats::default();
        let capped = &descriptors[..descriptors.len().min(self.config.max_descriptors)];
        stats.considered = capped.len();
        stats.dropped_by_cap = descriptors.len() - capped.len();
        if stats.dropped_by_cap > 0 {
            tracing::warn!(
                "descriptor cap {} reached, dropping {} descriptors",
                self.config.max_descriptors,
                stats.dropped_by_cap
            );
        }

        let mut verdicts = HashMap::new();
        let mut pending = VecDeque::new();
        let mut seen = HashSet::new();

        for descriptor in capped {
            if !seen.insert(descriptor.id.as_str()) {
                stats.duplicates += 1;
                continue;
            }
            if !descriptor.is_probeable() {
                stats.unprobeable += 1;
                continue;
            }
            match cache.reusable(&descriptor.id, self.config.freshness, now) {
                Some(verdict) => {
                    stats.cached += 1;
                    verdicts.insert(descriptor.id.clone(), verdict.clone());
                }
                None => pending.push_back(descriptor.clone()),
            }
        }

        stats.probed = pending.len();
        tracing::info!(
            "{} cached, {} to probe, {} unprobeable",
            stats.cached,
            stats.probed,
            stats.unprobeable
        );

        let mut fresh = Vec::with_capacity(pending.len());
        for (descriptor, outcome) in self.probe_all(pending).await {
            let verdict = match outcome {
                Ok(latency) => {
                    stats.alive += 1;
                    let verdict = Verdict::alive(latency, now).with_country(descriptor.country);
                    verdicts.insert(descriptor.id.clone(), verdict.clone());
                    verdict
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::debug!("{} is down: {}", descriptor.id, e);
                    Verdict::dead(now).with_country(descriptor.country)
                }
            };
            fresh.push((descriptor.id, verdict));
        }

        for (id, verdict) in fresh {
            cache.record(id, verdict);
        }

        ScheduleReport { verdicts, stats }
    }

    /// Run every pending probe with at most `concurrency` in flight
    async fn probe_all(
        &self,
        pending: VecDeque<Descriptor>,
    ) -> Vec<(Descriptor, Result<Latency, ProbeError>)> {
        let total = pending.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.config.concurrency.clamp(1, total);
        let queue = Arc::new(Mutex::new(pending));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();

        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let prober = Arc::clone(&self.prober);
            let tx = tx.clone();
            let timeout = self.config.timeout;

            pool.spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some(descriptor) = next else {
                        break;
                    };

                    // the deadline holds even if the prober ignores its own
                    let outcome =
                        match tokio::time::timeout(timeout, prober.probe(&descriptor, timeout))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(ProbeError::Timeout(timeout)),
                        };

                    if tx.send((descriptor, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
            if results.len() % PROGRESS_EVERY == 0 {
                tracing::debug!("probed {}/{}", results.len(), total);
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("probe worker failed: {}", e);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::SourceTag;
    use crate::proxy::parser::DescriptorParser;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every probe and counts calls
    #[derive(Default)]
    struct CountingProber {
        calls: AtomicUsize,
    }

    impl Prober for CountingProber {
        fn probe(
            &self,
            _descriptor: &Descriptor,
            _timeout: Duration,
        ) -> impl Future<Output = Result<Latency, ProbeError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProbeError::NoEndpoint) }
        }
    }

    fn batch(lines: &[&str]) -> Vec<Descriptor> {
        lines
            .iter()
            .filter_map(|l| DescriptorParser::parse_line(l, SourceTag::General))
            .collect()
    }

    #[tokio::test]
    async fn test_duplicates_probed_once() {
        let descriptors = batch(&[
            "vless://a@1.1.1.1:443#one",
            "vless://a@1.1.1.1:443#two",
            "vless://b@2.2.2.2:443",
        ]);
        let scheduler = ProbeScheduler::new(CountingProber::default(), SchedulerConfig::new());
        let mut cache = VerdictCache::in_memory();

        let report = scheduler.run(&descriptors, &mut cache, Utc::now()).await;
        assert_eq!(scheduler.prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.stats.duplicates, 1);
        assert_eq!(report.stats.failed, 2);
        assert!(report.verdicts.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_recorded_dead() {
        let descriptors = batch(&["vless://a@1.1.1.1:443"]);
        let scheduler = ProbeScheduler::new(CountingProber::default(), SchedulerConfig::new());
        let mut cache = VerdictCache::in_memory();
        let now = Utc::now();

        scheduler.run(&descriptors, &mut cache, now).await;
        let stored = cache.get("vless://a@1.1.1.1:443").unwrap();
        assert!(!stored.alive);
        assert_eq!(stored.checked_at, now);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let scheduler = ProbeScheduler::new(CountingProber::default(), SchedulerConfig::new());
        let mut cache = VerdictCache::in_memory();
        let report = scheduler.run(&[], &mut cache, Utc::now()).await;
        assert_eq!(report.stats, ScheduleStats::default());
        assert!(cache.is_empty());
    }
}
