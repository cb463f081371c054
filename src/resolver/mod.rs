//! Tracker metadata resolver.
//!
//! Looks up third-party domains in the DuckDuckGo Tracker Radar dataset
//! (`domains/<region>/<domain>.json`). A domain without metadata, a transport
//! failure or a malformed record only skips that domain.

pub mod finding;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::duration_ms;
use crate::modules::events::{AuditEvent, EventDispatcher, LookupEvent, LookupKind};
use crate::observer::DEFAULT_USER_AGENT;

pub use finding::{Finding, OwnerRecord, TrackerRecord};

/// Raw Tracker Radar files on GitHub.
pub const DEFAULT_METADATA_BASE_URL: &str = "https://raw.githubusercontent.com/duckduckgo/tracker-radar/main/";

/// Why a lookup produced no finding, other than missing metadata.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid metadata base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("cannot build a metadata path for '{0}'")]
    InvalidDomain(String),
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed tracker record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outcome of a single domain lookup.
#[derive(Debug)]
pub enum LookupOutcome {
    Found(Finding),
    /// The dataset has no record for the domain (HTTP 404).
    NotFound,
    Failed(LookupError),
}

impl LookupOutcome {
    pub fn kind(&self) -> LookupKind {
        match self {
            LookupOutcome::Found(_) => LookupKind::Found,
            LookupOutcome::NotFound => LookupKind::NotFound,
            LookupOutcome::Failed(_) => LookupKind::Failed,
        }
    }

    pub fn into_finding(self) -> Option<Finding> {
        match self {
            LookupOutcome::Found(finding) => Some(finding),
            _ => None,
        }
    }
}

/// Metadata source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub base_url: String,
    pub region: String,
    pub user_agent: String,
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Lookups in flight at once. Results are still yielded in input order.
    pub max_concurrent_lookups: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_METADATA_BASE_URL.to_string(),
            region: "US".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            max_concurrent_lookups: 1,
        }
    }
}

/// Resolves third-party domains to [`Finding`]s.
pub struct TrackerResolver {
    client: reqwest::Client,
    base_url: Url,
    config: ResolverConfig,
    events: Option<Arc<EventDispatcher>>,
}

impl TrackerResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, LookupError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
            events: None,
        })
    }

    /// Report every lookup to `events`.
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Location of the record for `domain`.
    pub fn metadata_url(&self, domain: &str) -> Result<Url, LookupError> {
        let valid = !domain.is_empty()
            && domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        if !valid {
            return Err(LookupError::InvalidDomain(domain.to_string()));
        }
        Ok(self
            .base_url
            .join(&format!("domains/{}/{}.json", self.config.region, domain))?)
    }

    /// Look up a single domain. Never fails; every problem becomes an outcome.
    pub async fn lookup(&self, domain: &str) -> LookupOutcome {
        let started = Instant::now();
        let outcome = match self.fetch(domain).await {
            Ok(Some(finding)) => LookupOutcome::Found(finding),
            Ok(None) => LookupOutcome::NotFound,
            Err(err) => LookupOutcome::Failed(err),
        };
        self.report(domain, &outcome, started.elapsed());
        outcome
    }

    async fn fetch(&self, domain: &str) -> Result<Option<Finding>, LookupError> {
        let url = self.metadata_url(domain)?;
        let response = self.client.get(url).send().await.map_err(|err| self.transport_error(err))?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(|err| self.transport_error(err))?;
                let record: TrackerRecord = serde_json::from_slice(&body)?;
                Ok(Some(Finding::from_record(domain, record)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(LookupError::Status(status.as_u16())),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> LookupError {
        if err.is_timeout() {
            LookupError::Timeout(self.config.timeout)
        } else {
            LookupError::Transport(err)
        }
    }

    fn report(&self, domain: &str, outcome: &LookupOutcome, latency: Duration) {
        let Some(events) = &self.events else {
            return;
        };
        let detail = match outcome {
            LookupOutcome::Failed(err) => Some(err.to_string()),
            _ => None,
        };
        events.dispatch(AuditEvent::Lookup(LookupEvent {
            domain: domain.to_string(),
            kind: outcome.kind(),
            detail,
            latency,
            timestamp: chrono::Utc::now(),
        }));
    }

    /// Lazily look up each domain, yielding `(domain, outcome)` in input order.
    ///
    /// Up to `max_concurrent_lookups` requests run ahead of the consumer, but
    /// a later domain is never yielded before an earlier one.
    pub fn resolve_outcomes<'a, I>(&'a self, domains: I) -> impl Stream<Item = (String, LookupOutcome)> + 'a
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'a,
    {
        stream::iter(domains)
            .map(move |domain| async move {
                let outcome = self.lookup(&domain).await;
                (domain, outcome)
            })
            .buffered(self.config.max_concurrent_lookups.max(1))
    }

    /// Lazily resolve `domains`, yielding only the successful findings.
    pub fn resolve<'a, I>(&'a self, domains: I) -> impl Stream<Item = Finding> + 'a
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'a,
    {
        self.resolve_outcomes(domains)
            .filter_map(|(_, outcome)| futures::future::ready(outcome.into_finding()))
    }
}
