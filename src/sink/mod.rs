//! Outbound delivery of findings.
//!
//! The scan core only knows how to `emit` a [`FindingEvent`]. Whatever carries
//! it to a viewer (a websocket, a channel, stdout) implements [`FindingSink`]
//! and must not block.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::resolver::Finding;

/// Display-ready payload for one finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingEvent {
    pub domain: String,
    pub owner: String,
    pub categories: String,
    pub cookies: String,
}

impl From<&Finding> for FindingEvent {
    fn from(finding: &Finding) -> Self {
        Self {
            domain: finding.domain.clone(),
            owner: finding.owner.clone().unwrap_or_else(|| "Unknown".to_string()),
            categories: finding.categories.join(", "),
            cookies: finding.cookies.clone().unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

/// Fire-and-forget receiver of findings.
pub trait FindingSink: Send + Sync {
    fn emit(&self, event: FindingEvent);
}

impl FindingSink for mpsc::UnboundedSender<FindingEvent> {
    fn emit(&self, event: FindingEvent) {
        if self.send(event).is_err() {
            log::debug!("finding dropped: receiver closed");
        }
    }
}

impl<S: FindingSink + ?Sized> FindingSink for Arc<S> {
    fn emit(&self, event: FindingEvent) {
        (**self).emit(event);
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<FindingEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FindingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl FindingSink for CollectingSink {
    fn emit(&self, event: FindingEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(owner: Option<&str>, categories: &[&str], cookies: Option<&str>) -> Finding {
        Finding {
            domain: "trackerco.test".into(),
            owner: owner.map(String::from),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            cookies: cookies.map(String::from),
            prevalence: None,
            fingerprinting: None,
        }
    }

    #[test]
    fn joins_categories_and_fills_placeholders() {
        let event = FindingEvent::from(&finding(None, &["Advertising", "Analytics"], None));
        assert_eq!(event.owner, "Unknown");
        assert_eq!(event.categories, "Advertising, Analytics");
        assert_eq!(event.cookies, "N/A");

        let empty = FindingEvent::from(&finding(Some("TrackerCo"), &[], Some("Yes")));
        assert_eq!(empty.categories, "");
        assert_eq!(empty.owner, "TrackerCo");
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(FindingEvent::from(&finding(Some("A"), &[], None)));
        drop(tx);
        assert_eq!(rx.recv().await.unwrap().owner, "A");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel::<FindingEvent>();
        drop(rx);
        tx.emit(FindingEvent::from(&finding(None, &[], None)));
    }
}
