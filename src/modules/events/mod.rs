//! Event system for scan activity.
//!
//! Provides hooks for metrics, logging, and custom reactions around each scan
//! stage.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::observer::Termination;

/// Scan stage at which a scan was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStage {
    Normalize,
    Observe,
}

/// Coarse result of one metadata lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Found,
    NotFound,
    Failed,
}

/// Raised when a scan request is accepted, before any validation, so every
/// `ScanFailed` has a matching start.
#[derive(Debug, Clone)]
pub struct ScanStartedEvent {
    pub input: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObservationEvent {
    pub url: String,
    pub requests: usize,
    pub third_party: usize,
    pub termination: Termination,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LookupEvent {
    pub domain: String,
    pub kind: LookupKind,
    pub detail: Option<String>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScanFailedEvent {
    pub input: String,
    pub stage: ScanStage,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScanCompletedEvent {
    pub root_domain: String,
    pub findings: usize,
    pub not_found: usize,
    pub failed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AuditEvent {
    ScanStarted(ScanStartedEvent),
    ObservationFinished(ObservationEvent),
    Lookup(LookupEvent),
    ScanFailed(ScanFailedEvent),
    ScanCompleted(ScanCompletedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &AuditEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: AuditEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &AuditEvent) {
        match event {
            AuditEvent::ScanStarted(started) => {
                log::info!("scan '{}' started", started.input);
            }
            AuditEvent::ObservationFinished(observed) => {
                log::info!(
                    "observed {} request(s), {} third-party domain(s) on {} ({:?}, {:.2}s)",
                    observed.requests,
                    observed.third_party,
                    observed.url,
                    observed.termination,
                    observed.elapsed.as_secs_f64()
                );
            }
            AuditEvent::Lookup(lookup) => match lookup.kind {
                LookupKind::Found => {
                    log::debug!("lookup {} -> found ({:.2}s)", lookup.domain, lookup.latency.as_secs_f64());
                }
                LookupKind::NotFound => log::debug!("lookup {} -> no metadata", lookup.domain),
                LookupKind::Failed => {
                    log::warn!(
                        "lookup {} failed: {}",
                        lookup.domain,
                        lookup.detail.as_deref().unwrap_or("unknown error")
                    );
                }
            },
            AuditEvent::ScanFailed(failed) => {
                log::error!("scan of '{}' failed during {:?}: {}", failed.input, failed.stage, failed.error);
            }
            AuditEvent::ScanCompleted(done) => {
                log::info!(
                    "scan of {} complete: {} finding(s), {} without metadata, {} failed lookup(s)",
                    done.root_domain,
                    done.findings,
                    done.not_found,
                    done.failed
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &AuditEvent) {
        match event {
            AuditEvent::ScanStarted(_) => self.metrics.record_scan_started(),
            AuditEvent::ScanFailed(_) => self.metrics.record_scan_failed(),
            AuditEvent::Lookup(lookup) => {
                self.metrics
                    .record_lookup(&lookup.domain, lookup.kind, lookup.latency);
            }
            _ => {}
        }
    }
}
