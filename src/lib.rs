//! # tracker-audit
//!
//! Audits a web page for third-party network traffic and classifies every
//! third-party domain against the DuckDuckGo Tracker Radar dataset.
//!
//! A scan loads the page in an isolated headless browser, records every
//! outbound request until the network goes quiet, reduces the destinations to
//! third-party registrable domains and looks each one up, streaming findings
//! to the caller as they resolve.
//!
//! ## Features
//!
//! - Headless Chromium capture with a fresh browser context per scan
//! - Public-suffix aware domain reduction (`news.bbc.co.uk` -> `bbc.co.uk`)
//! - Per-domain failure isolation: missing metadata or a failed lookup never
//!   stops a scan
//! - Ordered, incremental delivery through a pluggable [`FindingSink`]
//! - Event hooks and metrics for every scan stage
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracker_audit::{FindingEvent, TrackerAuditor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auditor = Arc::new(TrackerAuditor::builder().build()?);
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<FindingEvent>();
//!     let scan = auditor.spawn_scan("example.com", Arc::new(tx))?;
//!     while let Some(finding) = rx.recv().await {
//!         println!("{} ({})", finding.domain, finding.owner);
//!     }
//!     let report = scan.await?;
//!     println!("{} finding(s)", report.findings.len());
//!     Ok(())
//! }
//! ```

mod auditor;

pub mod config;
pub mod domains;
pub mod filter;
pub mod modules;
pub mod observer;
pub mod resolver;
pub mod sink;

pub use crate::auditor::{
    AuditError,
    AuditResult,
    ScanReport,
    TrackerAuditor,
    TrackerAuditorBuilder,
    validate_input,
};

pub use crate::config::{AuditorConfig, ConfigError};

pub use crate::domains::{DomainError, ScanTarget, normalize, registrable_domain};

pub use crate::filter::{Classification, classify, third_party_domains};

pub use crate::modules::{
    AuditEvent,
    DomainStats,
    EventDispatcher,
    EventHandler,
    GlobalStats,
    LoggingHandler,
    LookupKind,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    ScanStage,
};

pub use crate::observer::{
    BrowserLauncher,
    BrowserSession,
    CaptureOutcome,
    NavigationError,
    NetworkEvent,
    ObservedRequests,
    ObserverConfig,
    ObserverState,
    RequestObserver,
    SessionProfile,
    Termination,
};

#[cfg(feature = "chromium")]
pub use crate::observer::chromium::ChromiumLauncher;

pub use crate::resolver::{
    Finding,
    LookupError,
    LookupOutcome,
    ResolverConfig,
    TrackerRecord,
    TrackerResolver,
};

pub use crate::sink::{CollectingSink, FindingEvent, FindingSink};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
