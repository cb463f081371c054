//! High level scan orchestration.
//!
//! Wires together the normaliser, the request observer, the third-party
//! filter and the tracker resolver, and streams each finding to the caller as
//! soon as it resolves.

use std::collections::BTreeSet;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{AuditorConfig, ConfigError};
use crate::domains::{DomainError, ScanTarget, normalize};
use crate::filter::third_party_domains;
use crate::modules::events::{
	AuditEvent, EventDispatcher, EventHandler, LoggingHandler, MetricsHandler, ObservationEvent,
	ScanCompletedEvent, ScanFailedEvent, ScanStage, ScanStartedEvent,
};
use crate::modules::metrics::{MetricsCollector, MetricsSnapshot};
use crate::observer::{BrowserLauncher, NavigationError, RequestObserver, Termination};
use crate::resolver::{Finding, LookupError, LookupOutcome, TrackerResolver};
use crate::sink::{FindingEvent, FindingSink};

/// Result alias used across the orchestration layer.
pub type AuditResult<T> = Result<T, AuditError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum AuditError {
	#[error("URL cannot be empty. Please enter a URL.")]
	EmptyInput,
	#[error("invalid scan target: {0}")]
	Domain(#[from] DomainError),
	#[error("browser session failed: {0}")]
	Navigation(#[from] NavigationError),
	#[error("metadata resolver setup failed: {0}")]
	Resolver(#[from] LookupError),
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("no browser launcher configured (enable the `chromium` feature or call `with_launcher`)")]
	MissingLauncher,
}

/// Reject blank scan requests before they reach the normaliser.
pub fn validate_input(input: &str) -> AuditResult<&str> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		Err(AuditError::EmptyInput)
	} else {
		Ok(trimmed)
	}
}

/// Summary of one finished scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
	pub input: String,
	pub target: Option<ScanTarget>,
	pub requests_observed: usize,
	pub termination: Option<Termination>,
	pub third_party_domains: Vec<String>,
	/// Domains that produced a finding, in emission order.
	pub findings: Vec<String>,
	/// Domains the dataset has no record for.
	pub not_found: usize,
	/// Domains whose lookup failed (transport, status, malformed record).
	pub failed: usize,
	pub error: Option<String>,
}

impl ScanReport {
	fn failed(input: &str, err: &AuditError) -> Self {
		Self {
			input: input.to_string(),
			error: Some(err.to_string()),
			..Self::default()
		}
	}

	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}

	/// Third-party domains that did not produce a finding.
	pub fn skipped(&self) -> usize {
		self.not_found + self.failed
	}
}

/// Output of the observation half of a scan.
struct Discovery {
	target: ScanTarget,
	requests_observed: usize,
	termination: Termination,
	domains: BTreeSet<String>,
}

/// Lookup outcomes counted over one scan.
#[derive(Debug, Default)]
struct Tally {
	findings: usize,
	not_found: usize,
	failed: usize,
}

/// Fluent builder for [`TrackerAuditor`].
pub struct TrackerAuditorBuilder {
	config: AuditorConfig,
	launcher: Option<Arc<dyn BrowserLauncher>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl TrackerAuditorBuilder {
	pub fn new() -> Self {
		Self {
			config: AuditorConfig::default(),
			launcher: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: AuditorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
		self.launcher = Some(launcher);
		self
	}

	/// Client signature used by both the browser and the metadata lookups.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		let user_agent = user_agent.into();
		self.config.observer.user_agent = user_agent.clone();
		self.config.resolver.user_agent = user_agent;
		self
	}

	pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
		self.config.observer.navigation_timeout = timeout;
		self
	}

	pub fn with_quiet_window(mut self, window: Duration) -> Self {
		self.config.observer.quiet_window = window;
		self
	}

	pub fn with_metadata_base_url(mut self, base_url: impl Into<String>) -> Self {
		self.config.resolver.base_url = base_url.into();
		self
	}

	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.config.resolver.region = region.into();
		self
	}

	pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
		self.config.resolver.timeout = timeout;
		self
	}

	pub fn with_max_concurrent_lookups(mut self, lookups: usize) -> Self {
		self.config.resolver.max_concurrent_lookups = lookups.max(1);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.config.enable_metrics = false;
		self
	}

	pub fn build(self) -> AuditResult<TrackerAuditor> {
		self.config.validate()?;
		let launcher = match self.launcher {
			Some(launcher) => launcher,
			None => default_launcher()?,
		};
		TrackerAuditor::assemble(self.config, launcher, self.handlers)
	}
}

impl Default for TrackerAuditorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(feature = "chromium")]
fn default_launcher() -> AuditResult<Arc<dyn BrowserLauncher>> {
	Ok(Arc::new(crate::observer::chromium::ChromiumLauncher::new()))
}

#[cfg(not(feature = "chromium"))]
fn default_launcher() -> AuditResult<Arc<dyn BrowserLauncher>> {
	Err(AuditError::MissingLauncher)
}

/// Main scan orchestrator. Cheap to share behind an `Arc`; scans never share
/// browser state.
pub struct TrackerAuditor {
	config: AuditorConfig,
	observer: RequestObserver,
	resolver: TrackerResolver,
	metrics: Option<MetricsCollector>,
	events: Arc<EventDispatcher>,
}

impl TrackerAuditor {
	/// Obtain a builder to customise the auditor instance.
	pub fn builder() -> TrackerAuditorBuilder {
		TrackerAuditorBuilder::new()
	}

	fn assemble(
		config: AuditorConfig,
		launcher: Arc<dyn BrowserLauncher>,
		handlers: Vec<Arc<dyn EventHandler>>,
	) -> AuditResult<Self> {
		let metrics = config.enable_metrics.then(MetricsCollector::new);

		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let observer = RequestObserver::new(launcher, config.observer.clone());
		let resolver = TrackerResolver::new(config.resolver.clone())?.with_events(events.clone());

		Ok(Self {
			config,
			observer,
			resolver,
			metrics,
			events,
		})
	}

	pub fn config(&self) -> &AuditorConfig {
		&self.config
	}

	/// Snapshot of scan and lookup counters, when metrics are enabled.
	pub fn metrics(&self) -> Option<MetricsSnapshot> {
		self.metrics.as_ref().map(MetricsCollector::snapshot)
	}

	/// Load the page and return its third-party registrable domains in
	/// lexicographic order, without looking any of them up.
	pub async fn third_party_domains(&self, input: &str) -> AuditResult<Vec<String>> {
		let discovery = self.discover(input).await?;
		Ok(discovery.domains.into_iter().collect())
	}

	/// Run a full scan, emitting each finding to `sink` as it resolves.
	///
	/// Never fails: a scan that cannot start or observe the page returns a
	/// report carrying the error and emits nothing.
	pub async fn scan(&self, input: &str, sink: &dyn FindingSink) -> ScanReport {
		let discovery = match self.discover(input).await {
			Ok(discovery) => discovery,
			Err(err) => return ScanReport::failed(input, &err),
		};

		let mut report = ScanReport {
			input: input.to_string(),
			requests_observed: discovery.requests_observed,
			termination: Some(discovery.termination),
			third_party_domains: discovery.domains.iter().cloned().collect(),
			..ScanReport::default()
		};

		let mut outcomes = pin!(self.resolver.resolve_outcomes(discovery.domains));
		while let Some((domain, outcome)) = outcomes.next().await {
			match outcome {
				LookupOutcome::Found(finding) => {
					sink.emit(FindingEvent::from(&finding));
					report.findings.push(domain);
				}
				LookupOutcome::NotFound => report.not_found += 1,
				LookupOutcome::Failed(_) => report.failed += 1,
			}
		}

		self.report_completion(
			discovery.target.root_domain(),
			&Tally {
				findings: report.findings.len(),
				not_found: report.not_found,
				failed: report.failed,
			},
		);

		report.target = Some(discovery.target);
		report
	}

	/// Lazily scan `input`, yielding findings in lexicographic domain order.
	///
	/// Nothing happens until the stream is polled. A scan that fails before
	/// any lookup yields an empty stream; the failure is still logged.
	/// Completion is reported once the last lookup has been consumed.
	pub fn scan_stream<'a>(&'a self, input: &'a str) -> impl Stream<Item = Finding> + 'a {
		stream::once(async move { self.discover(input).await.ok() })
			.filter_map(futures::future::ready)
			.flat_map(move |discovery| {
				let root_domain = discovery.target.root_domain().to_string();
				let outcomes = Box::pin(self.resolver.resolve_outcomes(discovery.domains));
				stream::unfold(Some((outcomes, Tally::default(), root_domain)), move |state| async move {
					let (mut outcomes, mut tally, root_domain) = state?;
					while let Some((_, outcome)) = outcomes.next().await {
						match outcome {
							LookupOutcome::Found(finding) => {
								tally.findings += 1;
								return Some((finding, Some((outcomes, tally, root_domain))));
							}
							LookupOutcome::NotFound => tally.not_found += 1,
							LookupOutcome::Failed(_) => tally.failed += 1,
						}
					}
					self.report_completion(&root_domain, &tally);
					None
				})
			})
	}

	/// Validate `input` and run the scan on its own task, so the caller can
	/// return immediately while findings reach `sink` asynchronously.
	pub fn spawn_scan(self: &Arc<Self>, input: &str, sink: Arc<dyn FindingSink>) -> AuditResult<JoinHandle<ScanReport>> {
		let input = validate_input(input)?.to_string();
		let auditor = Arc::clone(self);
		Ok(tokio::spawn(async move { auditor.scan(&input, sink.as_ref()).await }))
	}

	async fn discover(&self, input: &str) -> AuditResult<Discovery> {
		self.events.dispatch(AuditEvent::ScanStarted(ScanStartedEvent {
			input: input.to_string(),
			timestamp: chrono::Utc::now(),
		}));

		let input = match validate_input(input) {
			Ok(input) => input,
			Err(err) => {
				self.report_failure(input, ScanStage::Normalize, &err);
				return Err(err);
			}
		};

		let target = match normalize(input) {
			Ok(target) => target,
			Err(err) => {
				let err = AuditError::from(err);
				self.report_failure(input, ScanStage::Normalize, &err);
				return Err(err);
			}
		};

		log::debug!("scan '{input}': loading {} (root {})", target.url(), target.root_domain());

		let observed = match self
			.observer
			.observe(target.url(), self.config.observer.navigation_timeout)
			.await
		{
			Ok(observed) => observed,
			Err(err) => {
				let err = AuditError::from(err);
				self.report_failure(input, ScanStage::Observe, &err);
				return Err(err);
			}
		};

		let domains = third_party_domains(observed.urls(), target.root_domain());
		self.events.dispatch(AuditEvent::ObservationFinished(ObservationEvent {
			url: target.url().to_string(),
			requests: observed.len(),
			third_party: domains.len(),
			termination: observed.termination(),
			elapsed: observed.elapsed(),
			timestamp: chrono::Utc::now(),
		}));

		Ok(Discovery {
			requests_observed: observed.len(),
			termination: observed.termination(),
			target,
			domains,
		})
	}

	fn report_completion(&self, root_domain: &str, tally: &Tally) {
		self.events.dispatch(AuditEvent::ScanCompleted(ScanCompletedEvent {
			root_domain: root_domain.to_string(),
			findings: tally.findings,
			not_found: tally.not_found,
			failed: tally.failed,
			timestamp: chrono::Utc::now(),
		}));
	}

	fn report_failure(&self, input: &str, stage: ScanStage, err: &AuditError) {
		self.events.dispatch(AuditEvent::ScanFailed(ScanFailedEvent {
			input: input.to_string(),
			stage,
			error: err.to_string(),
			timestamp: chrono::Utc::now(),
		}));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observer::scripted::{ScriptStep, ScriptedLauncher};
	use crate::sink::CollectingSink;

	fn auditor(launcher: ScriptedLauncher) -> TrackerAuditor {
		TrackerAuditor::builder()
			.with_launcher(Arc::new(launcher))
			.with_metadata_base_url("http://127.0.0.1:9/")
			.build()
			.unwrap()
	}

	#[test]
	fn rejects_blank_input() {
		assert!(matches!(validate_input("   "), Err(AuditError::EmptyInput)));
		assert_eq!(validate_input(" example.com ").unwrap(), "example.com");
		assert_eq!(AuditError::EmptyInput.to_string(), "URL cannot be empty. Please enter a URL.");
	}

	#[tokio::test]
	async fn unresolvable_target_ends_scan_without_launching() {
		let launcher = ScriptedLauncher::new(Vec::new());
		let auditor = auditor(launcher.clone());
		let sink = CollectingSink::new();

		let report = auditor.scan("http://127.0.0.1/", &sink).await;

		assert!(!report.is_success());
		assert!(sink.events().is_empty());
		assert!(launcher.calls().is_empty());
		let global = auditor.metrics().unwrap().global;
		assert_eq!(global.scans_started, 1);
		assert_eq!(global.scans_failed, 1);
	}

	#[tokio::test]
	async fn blank_scan_still_counts_as_started() {
		let auditor = auditor(ScriptedLauncher::new(Vec::new()));
		let report = auditor.scan("   ", &CollectingSink::new()).await;

		assert!(!report.is_success());
		let global = auditor.metrics().unwrap().global;
		assert_eq!(global.scans_started, 1);
		assert_eq!(global.scans_failed, 1);
	}

	#[derive(Default)]
	struct Completions(std::sync::Mutex<Vec<ScanCompletedEvent>>);

	impl EventHandler for Completions {
		fn handle(&self, event: &AuditEvent) {
			if let AuditEvent::ScanCompleted(done) = event {
				self.0.lock().unwrap().push(done.clone());
			}
		}
	}

	#[tokio::test]
	async fn stream_reports_completion_after_last_lookup() {
		let server = wiremock::MockServer::start().await;
		let launcher = ScriptedLauncher::new(vec![
			ScriptStep::start("1", "https://example.com/"),
			ScriptStep::start("2", "https://px.vendor.test/a.gif"),
			ScriptStep::finish("1"),
			ScriptStep::finish("2"),
		]);
		let completions = Arc::new(Completions::default());
		let auditor = TrackerAuditor::builder()
			.with_launcher(Arc::new(launcher))
			.with_metadata_base_url(server.uri())
			.with_quiet_window(Duration::from_millis(50))
			.with_event_handler(completions.clone())
			.build()
			.unwrap();

		let findings: Vec<_> = auditor.scan_stream("example.com").collect().await;

		assert!(findings.is_empty());
		let done = completions.0.lock().unwrap();
		assert_eq!(done.len(), 1);
		assert_eq!(done[0].root_domain, "example.com");
		assert_eq!(done[0].not_found, 1);
		assert_eq!(done[0].findings, 0);
	}

	#[tokio::test]
	async fn first_party_only_page_yields_nothing() {
		let launcher = ScriptedLauncher::new(vec![
			ScriptStep::start("1", "https://example.com/"),
			ScriptStep::start("2", "https://www.example.com/style.css"),
			ScriptStep::finish("1"),
			ScriptStep::finish("2"),
		]);
		let auditor = auditor(launcher);
		let sink = CollectingSink::new();

		let report = auditor.scan("example.com", &sink).await;

		assert!(report.is_success());
		assert!(report.third_party_domains.is_empty());
		assert!(sink.events().is_empty());
		assert_eq!(report.target.unwrap().root_domain(), "example.com");
	}

	#[tokio::test]
	async fn browser_failure_is_reported_not_raised() {
		let launcher = ScriptedLauncher::new(Vec::new()).fail_launch("chrome not found");
		let auditor = auditor(launcher);
		let sink = CollectingSink::new();

		let report = auditor.scan("example.com", &sink).await;

		assert!(report.error.unwrap().contains("chrome not found"));
		assert!(sink.events().is_empty());
	}

	#[test]
	fn builder_rejects_invalid_config() {
		let result = TrackerAuditor::builder()
			.with_launcher(Arc::new(ScriptedLauncher::new(Vec::new())))
			.with_region("")
			.build();
		assert!(matches!(result, Err(AuditError::Config(_))));
	}
}
