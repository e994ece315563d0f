//! Proxy key module for fetching, probing and publishing keys
//!
//! This module provides functionality for:
//! - Parsing keys into endpoint descriptors and classifying them
//! - Probing endpoints over TCP, TLS and WebSocket with bounded concurrency
//! - Caching verdicts between runs
//! - Publishing ranked key files and a link index

pub mod cache;
pub mod classifier;
pub mod engine;
pub mod fetcher;
pub mod geo;
pub mod models;
pub mod parser;
pub mod prober;
pub mod publisher;
pub mod scheduler;

pub use cache::VerdictCache;
pub use classifier::Classifier;
pub use engine::{Engine, RunReport};
pub use fetcher::{FetcherConfig, KeySource, SourceFetcher};
pub use geo::GeoLocator;
pub use models::{Descriptor, Endpoint, LiveEntry, Quality, SourceTag, Transport, Verdict};
pub use parser::DescriptorParser;
pub use prober::{Latency, Prober, TransportProber};
pub use publisher::{OutputPublisher, PublisherConfig};
pub use scheduler::{ProbeScheduler, ScheduleReport, ScheduleStats, SchedulerConfig};
