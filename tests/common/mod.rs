#![allow(dead_code)]

use keyprobe::proxy::models::{Descriptor, SourceTag};
use keyprobe::proxy::parser::DescriptorParser;
use keyprobe::proxy::prober::{Latency, Prober};
use keyprobe::ProbeError;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Prober with scripted outcomes that records every call and the peak
/// number of probes running at once
#[derive(Default)]
pub struct ScriptedProber {
    latencies: HashMap<String, Latency>,
    default_latency: Option<Latency>,
    hanging: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe succeeds with `latency` unless scripted otherwise
    pub fn all_alive(latency: Latency) -> Self {
        Self {
            default_latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, id: &str, latency: Latency) -> Self {
        self.latencies.insert(id.to_string(), latency);
        self
    }

    /// Probes of `id` never complete on their own
    pub fn with_hang(mut self, id: &str) -> Self {
        self.hanging.insert(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Prober for ScriptedProber {
    fn probe(
        &self,
        descriptor: &Descriptor,
        _timeout: Duration,
    ) -> impl Future<Output = Result<Latency, ProbeError>> + Send {
        async move {
            self.calls.lock().unwrap().push(descriptor.id.clone());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if self.hanging.contains(&descriptor.id) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            self.latencies
                .get(&descriptor.id)
                .copied()
                .or(self.default_latency)
                .ok_or_else(|| {
                    ProbeError::Connect(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "scripted failure",
                    ))
                })
        }
    }
}

pub fn parse(line: &str) -> Descriptor {
    DescriptorParser::parse_line(line, SourceTag::General).expect("not a key line")
}

/// `count` distinct probeable descriptors
pub fn numbered(count: usize) -> Vec<Descriptor> {
    (0..count)
        .map(|i| {
            parse(&format!(
                "vless://user{}@10.{}.{}.{}:443?security=tls#n{}",
                i,
                (i >> 16) & 0xff,
                (i >> 8) & 0xff,
                i & 0xff,
                i
            ))
        })
        .collect()
}
