//! Metrics collection utilities.
//!
//! Aggregates scan counts and tracker lookup outcomes, globally and per
//! domain, with latency percentiles for observability.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::events::LookupKind;

/// Aggregated metrics across all scans.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub scans_started: u64,
    pub scans_failed: u64,
    pub lookups: u64,
    pub found: u64,
    pub not_found: u64,
    pub failed: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            scans_started: 0,
            scans_failed: 0,
            lookups: 0,
            found: 0,
            not_found: 0,
            failed: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Lookup statistics for one third-party domain.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub lookups: u64,
    pub found: u64,
    pub not_found: u64,
    pub failed: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
}

impl DomainStats {
    fn from_accumulator(domain: &str, acc: &DomainAccumulator) -> Self {
        let (avg, p95) = latency_stats(acc.latencies.iter().copied());
        Self {
            domain: domain.to_string(),
            lookups: acc.lookups,
            found: acc.found,
            not_found: acc.not_found,
            failed: acc.failed,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug)]
struct DomainAccumulator {
    lookups: u64,
    found: u64,
    not_found: u64,
    failed: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_seen: u64,
}

impl DomainAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            lookups: 0,
            found: 0,
            not_found: 0,
            failed: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_seen: 0,
        }
    }

    fn record(&mut self, kind: LookupKind, latency: Duration) {
        self.lookups += 1;
        match kind {
            LookupKind::Found => self.found += 1,
            LookupKind::NotFound => self.not_found += 1,
            LookupKind::Failed => self.failed += 1,
        }

        if kind == LookupKind::Failed {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        } else {
            self.consecutive_failures = 0;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

fn latency_stats(samples: impl Iterator<Item = Duration>) -> (Option<Duration>, Option<Duration>) {
    let mut samples: Vec<_> = samples.collect();
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

/// Domains tracked individually before the least recently looked up one is
/// dropped.
pub const DEFAULT_MAX_DOMAINS: usize = 1024;

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    latencies: VecDeque<Duration>,
    max_window: usize,
    max_domains: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize, max_domains: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            max_domains,
            domains: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, domain: &str) -> &mut DomainAccumulator {
        if !self.domains.contains_key(domain) && self.domains.len() >= self.max_domains {
            let stalest = self
                .domains
                .iter()
                .min_by_key(|(_, acc)| acc.last_seen)
                .map(|(name, _)| name.clone());
            if let Some(stalest) = stalest {
                self.domains.remove(&stalest);
            }
        }

        let lookups = self.global.lookups;
        let acc = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator::new(self.max_window));
        acc.last_seen = lookups;
        acc
    }

    fn push_latency(&mut self, latency: Duration) {
        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }
}

/// Thread-safe metrics collector shared by concurrent scans.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128, DEFAULT_MAX_DOMAINS))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self::with_limits(window, DEFAULT_MAX_DOMAINS)
    }

    /// Latency window per domain and globally, and the number of domains
    /// tracked individually.
    pub fn with_limits(window: usize, max_domains: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16), max_domains.max(1)))),
        }
    }

    // A panic while holding the lock leaves counters that are still usable.
    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_scan_started(&self) {
        self.state().global.scans_started += 1;
    }

    pub fn record_scan_failed(&self) {
        self.state().global.scans_failed += 1;
    }

    pub fn record_lookup(&self, domain: &str, kind: LookupKind, latency: Duration) {
        let mut guard = self.state();
        guard.global.lookups += 1;
        match kind {
            LookupKind::Found => guard.global.found += 1,
            LookupKind::NotFound => guard.global.not_found += 1,
            LookupKind::Failed => guard.global.failed += 1,
        }

        if let Some(avg) = guard.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            guard.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            guard.global.average_latency = Some(latency);
        }

        guard.accumulator_mut(domain).record(kind, latency);
        guard.push_latency(latency);

        let (_, p95) = latency_stats(guard.latencies.iter().copied());
        guard.global.p95_latency = p95;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.state();
        let mut domains: Vec<_> = guard
            .domains
            .iter()
            .map(|(domain, acc)| DomainStats::from_accumulator(domain, acc))
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        MetricsSnapshot {
            global: guard.global.clone(),
            domains,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn separates_missing_metadata_from_failures() {
        let metrics = MetricsCollector::new();
        metrics.record_lookup("ads.test", LookupKind::Found, Duration::from_millis(150));
        metrics.record_lookup("cdn.test", LookupKind::NotFound, Duration::from_millis(90));
        metrics.record_lookup("slow.test", LookupKind::Failed, Duration::from_secs(10));
        metrics.record_lookup("slow.test", LookupKind::Failed, Duration::from_secs(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.lookups, 4);
        assert_eq!(snapshot.global.found, 1);
        assert_eq!(snapshot.global.not_found, 1);
        assert_eq!(snapshot.global.failed, 2);

        let slow = snapshot
            .domains
            .iter()
            .find(|d| d.domain == "slow.test")
            .unwrap();
        assert_eq!(slow.consecutive_failures, 2);
        assert_eq!(slow.p95_latency, Some(Duration::from_secs(10)));
    }

    #[test]
    fn evicts_least_recently_seen_domain() {
        let metrics = MetricsCollector::with_limits(16, 2);
        metrics.record_lookup("a.test", LookupKind::Found, Duration::from_millis(10));
        metrics.record_lookup("b.test", LookupKind::Found, Duration::from_millis(10));
        metrics.record_lookup("a.test", LookupKind::Found, Duration::from_millis(10));
        metrics.record_lookup("c.test", LookupKind::NotFound, Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        let names: Vec<_> = snapshot.domains.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(names, vec!["a.test", "c.test"]);
        assert_eq!(snapshot.domains[0].lookups, 2);
        assert_eq!(snapshot.global.lookups, 4);
    }

    #[test]
    fn global_p95_covers_recent_window_only() {
        let metrics = MetricsCollector::with_window(16);
        for i in 0..4 {
            metrics.record_lookup(&format!("old{i}.test"), LookupKind::Found, Duration::from_secs(5));
        }
        for i in 0..16 {
            metrics.record_lookup(&format!("new{i}.test"), LookupKind::Found, Duration::from_millis(20));
        }
        assert_eq!(metrics.snapshot().global.p95_latency, Some(Duration::from_millis(20)));
    }

    #[test]
    fn counts_scans() {
        let metrics = MetricsCollector::with_window(4);
        metrics.record_scan_started();
        metrics.record_scan_started();
        metrics.record_scan_failed();
        let global = metrics.snapshot().global;
        assert_eq!(global.scans_started, 2);
        assert_eq!(global.scans_failed, 1);
        assert_eq!(global.average_latency, None);
    }
}
