//! Cross-cutting services module
//!
//! Observes scans through events and aggregates lookup metrics.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    AuditEvent, EventDispatcher, EventHandler, LoggingHandler, LookupEvent, LookupKind,
    MetricsHandler, ObservationEvent, ScanCompletedEvent, ScanFailedEvent, ScanStage,
    ScanStartedEvent,
};
pub use metrics::{DomainStats, GlobalStats, MetricsCollector, MetricsSnapshot};
