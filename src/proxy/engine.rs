//! Engine: one complete checking run
//!
//! load cache -> fetch and dedup -> classify -> schedule probes -> merge
//! classification into surviving verdicts -> save cache -> publish.
//! Nothing is kept between runs except what the cache file holds.

use crate::config::EngineConfig;
use crate::proxy::cache::VerdictCache;
use crate::proxy::classifier::Classifier;
use crate::proxy::fetcher::{dedup_descriptors, FetcherConfig, SourceFetcher};
use crate::proxy::models::{Descriptor, LiveEntry};
use crate::proxy::prober::{Prober, TransportProber};
use crate::proxy::publisher::{OutputPublisher, PublishReport, PublisherConfig};
use crate::proxy::scheduler::{ProbeScheduler, ScheduleStats, SchedulerConfig};
use crate::Result;
use chrono::{DateTime, Utc};

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        SchedulerConfig::new()
            .with_concurrency(config.concurrency)
            .with_timeout(config.timeout())
            .with_freshness(config.freshness_window())
            .with_max_descriptors(config.max_descriptors)
    }
}

impl From<&EngineConfig> for PublisherConfig {
    fn from(config: &EngineConfig) -> Self {
        PublisherConfig {
            output_dir: config.output_dir.clone(),
            chunk_size: config.chunk_size,
            channel_tag: config.channel_tag.clone(),
            link_base: config.link_base.clone(),
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Unique descriptors handed to the scheduler
    pub fetched: usize,
    pub stats: ScheduleStats,
    /// Surviving descriptors, in input order
    pub entries: Vec<LiveEntry>,
    /// Entries written to the cache file, `None` when saving failed
    pub cache_saved: Option<usize>,
    pub publish: PublishReport,
}

pub struct Engine<P: Prober> {
    config: EngineConfig,
    classifier: Classifier,
    scheduler: ProbeScheduler<P>,
    publisher: OutputPublisher,
}

impl Engine<TransportProber> {
    /// Engine with the real network prober and, if configured, MMDB lookups
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let classifier = Classifier::from_mmdb_path(config.mmdb_path.as_deref());
        let prober = TransportProber::new()?;
        Ok(Self::new(config, prober, classifier))
    }
}

impl<P: Prober> Engine<P> {
    pub fn new(config: EngineConfig, prober: P, classifier: Classifier) -> Self {
        let scheduler = ProbeScheduler::new(prober, SchedulerConfig::from(&config));
        let publisher = OutputPublisher::new(PublisherConfig::from(&config));
        Self {
            config,
            classifier,
            scheduler,
            publisher,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full run against the configured HTTP sources
    pub async fn run(&self) -> Result<RunReport> {
        let fetcher = SourceFetcher::with_config(
            FetcherConfig::new().with_timeout(self.config.fetch_timeout()),
        )?;
        tracing::info!("fetching {} sources", self.config.sources.len());
        let descriptors = fetcher.fetch_all(&self.config.sources).await;
        self.run_batch(descriptors).await
    }

    /// Full run over an already gathered batch
    pub async fn run_batch(&self, descriptors: Vec<Descriptor>) -> Result<RunReport> {
        let now = Utc::now();
        let mut cache = VerdictCache::load(&self.config.cache_path);
        tracing::info!("cache holds {} entries", cache.len());

        let mut report = self.evaluate(descriptors, &mut cache, now).await;

        report.cache_saved = match cache.save(self.config.retention_window(), now) {
            Ok(saved) => Some(saved),
            Err(e) => {
                tracing::warn!("failed to save cache to {:?}: {}", self.config.cache_path, e);
                None
            }
        };

        report.publish = self.publisher.publish(report.entries.clone())?;
        Ok(report)
    }

    /// Classify, schedule and merge; touches nothing but `cache`
    pub async fn evaluate(
        &self,
        descriptors: Vec<Descriptor>,
        cache: &mut VerdictCache,
        now: DateTime<Utc>,
    ) -> RunReport {
        let mut descriptors = dedup_descriptors(descriptors);
        self.classifier.classify_all(&mut descriptors);

        let schedule = self.scheduler.run(&descriptors, cache, now).await;

        let entries: Vec<LiveEntry> = descriptors
            .iter()
            .filter_map(|descriptor| {
                let verdict = schedule.verdicts.get(&descriptor.id)?;
                let latency_ms = verdict.latency_ms?;
                Some(LiveEntry {
                    id: descriptor.id.clone(),
                    latency_ms,
                    country: descriptor.country.clone().or_else(|| verdict.country.clone()),
                    source_tag: descriptor.source_tag,
                })
            })
            .collect();

        tracing::info!(
            "{} alive ({} from cache, {} probed, {} failed)",
            entries.len(),
            schedule.stats.cached,
            schedule.stats.probed,
            schedule.stats.failed
        );

        RunReport {
            fetched: descriptors.len(),
            stats: schedule.stats,
            entries,
            cache_saved: None,
            publish: PublishReport::default(),
        }
    }
}
