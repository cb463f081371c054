//! Request observer.
//!
//! Loads one page in an isolated browser session and records every distinct
//! destination URL the page requests until the network goes quiet or the
//! navigation timeout runs out. A timeout is a normal way to finish: whatever
//! was captured so far is returned.

pub mod scripted;
pub mod session;

#[cfg(feature = "chromium")]
pub mod chromium;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until, timeout_at};

use crate::config::duration_ms;

pub use session::{
    BrowserLauncher, BrowserSession, NavigationError, NetworkEvent, NetworkEvents, SessionProfile,
};

/// Identifying client signature sent by both the browser and the resolver.
pub const DEFAULT_USER_AGENT: &str = "tracker-audit/1.1";

const PSEUDO_SCHEMES: &[&str] = &["data:", "blob:", "about:", "javascript:"];

/// Browser session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub user_agent: String,
    pub ignore_certificate_errors: bool,
    pub headless: bool,
    #[serde(with = "duration_ms", rename = "navigation_timeout_ms")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_ms", rename = "quiet_window_ms")]
    pub quiet_window: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ignore_certificate_errors: true,
            headless: true,
            navigation_timeout: Duration::from_secs(60),
            quiet_window: Duration::from_millis(500),
        }
    }
}

impl ObserverConfig {
    fn session_profile(&self, navigation_timeout: Duration) -> SessionProfile {
        SessionProfile {
            user_agent: self.user_agent.clone(),
            ignore_certificate_errors: self.ignore_certificate_errors,
            headless: self.headless,
            navigation_timeout,
        }
    }
}

/// Lifecycle of a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    Idle,
    Launching,
    Navigating,
    Settling,
    Closed,
}

/// How an observation that produced results came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No request in flight and none started during the quiet window.
    Settled,
    /// The navigation timeout elapsed first.
    TimedOut,
}

/// What the listener did with one outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Recorded,
    Duplicate,
    PseudoScheme,
    Empty,
}

/// Raw destination URLs captured from one page load.
#[derive(Debug, Clone)]
pub struct ObservedRequests {
    urls: HashSet<String>,
    termination: Termination,
    skipped: usize,
    elapsed: Duration,
}

impl ObservedRequests {
    pub fn urls(&self) -> &HashSet<String> {
        &self.urls
    }

    pub fn into_urls(self) -> HashSet<String> {
        self.urls
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Requests the listener dropped (pseudo-schemes, empty URLs).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Drives browser sessions produced by a [`BrowserLauncher`].
#[derive(Clone)]
pub struct RequestObserver {
    launcher: Arc<dyn BrowserLauncher>,
    config: ObserverConfig,
}

impl RequestObserver {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: ObserverConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Load `url` and collect the destinations it requests within `timeout`.
    ///
    /// The session is closed before returning on every path. Launch and
    /// navigation failures are errors; running out of time is not.
    pub async fn observe(&self, url: &str, timeout: Duration) -> Result<ObservedRequests, NavigationError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut lifecycle = Lifecycle::new(url);

        lifecycle.advance(ObserverState::Launching);
        let profile = self.config.session_profile(timeout);
        let mut session = match timeout_at(deadline, self.launcher.launch(&profile)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                lifecycle.advance(ObserverState::Closed);
                return Err(err);
            }
            Err(_) => {
                lifecycle.advance(ObserverState::Closed);
                return Err(NavigationError::Launch(format!(
                    "browser did not start within {:.1}s",
                    timeout.as_secs_f64()
                )));
            }
        };

        let result = self
            .capture(&mut session, url, deadline, &mut lifecycle)
            .await
            .map(|capture| capture.finish(started.elapsed()));

        lifecycle.advance(ObserverState::Closed);
        if let Err(err) = session.close().await {
            log::warn!("observer {url}: {err}");
        }

        if let Ok(observed) = &result {
            log::debug!(
                "observer {url}: captured {} destination(s), {} skipped, {:?} after {:.2}s",
                observed.len(),
                observed.skipped(),
                observed.termination(),
                observed.elapsed().as_secs_f64()
            );
        }
        result
    }

    async fn capture(
        &self,
        session: &mut Box<dyn BrowserSession>,
        url: &str,
        deadline: Instant,
        lifecycle: &mut Lifecycle,
    ) -> Result<Capture, NavigationError> {
        // The listener has to be attached before navigation starts, otherwise
        // the earliest requests are lost.
        let mut events = session.subscribe().await?;
        let mut capture = Capture::new(self.config.quiet_window);

        lifecycle.advance(ObserverState::Navigating);
        let loaded = {
            let mut navigation = session.navigate(url);
            loop {
                tokio::select! {
                    biased;
                    Some(event) = events.recv() => capture.apply(event),
                    result = &mut navigation => break Some(result),
                    _ = sleep_until(deadline) => break None,
                }
            }
        };

        match loaded {
            Some(Err(err)) => return Err(err),
            None => {
                log::info!("observer {url}: navigation timed out, keeping partial capture");
                capture.termination = Termination::TimedOut;
                return Ok(capture);
            }
            Some(Ok(())) => {}
        }

        lifecycle.advance(ObserverState::Settling);
        capture.touch();
        let mut listening = true;
        loop {
            let quiet_at = capture.quiet_deadline();
            tokio::select! {
                biased;
                event = events.recv(), if listening => match event {
                    Some(event) => capture.apply(event),
                    None => {
                        listening = false;
                        capture.in_flight.clear();
                    }
                },
                _ = sleep_until(quiet_at.unwrap_or(deadline)), if quiet_at.is_some() => {
                    capture.termination = Termination::Settled;
                    return Ok(capture);
                }
                _ = sleep_until(deadline) => {
                    log::info!("observer {url}: network never settled, keeping partial capture");
                    capture.termination = Termination::TimedOut;
                    return Ok(capture);
                }
            }
        }
    }
}

struct Lifecycle {
    url: String,
    state: ObserverState,
}

impl Lifecycle {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: ObserverState::Idle,
        }
    }

    fn advance(&mut self, next: ObserverState) {
        log::trace!("observer {}: {:?} -> {:?}", self.url, self.state, next);
        self.state = next;
    }
}

/// Capture state owned by one `observe` call.
struct Capture {
    urls: HashSet<String>,
    in_flight: HashSet<String>,
    last_activity: Instant,
    quiet_window: Duration,
    skipped: usize,
    termination: Termination,
}

impl Capture {
    fn new(quiet_window: Duration) -> Self {
        Self {
            urls: HashSet::new(),
            in_flight: HashSet::new(),
            last_activity: Instant::now(),
            quiet_window,
            skipped: 0,
            termination: Termination::Settled,
        }
    }

    fn apply(&mut self, event: NetworkEvent) {
        self.touch();
        match event {
            NetworkEvent::RequestStarted { id, url } => {
                self.in_flight.insert(id);
                let outcome = self.record(&url);
                if matches!(outcome, CaptureOutcome::PseudoScheme | CaptureOutcome::Empty) {
                    self.skipped += 1;
                }
            }
            NetworkEvent::RequestFinished { id } => {
                self.in_flight.remove(&id);
            }
        }
    }

    fn record(&mut self, url: &str) -> CaptureOutcome {
        let url = url.trim();
        if url.is_empty() {
            return CaptureOutcome::Empty;
        }
        if is_pseudo_scheme(url) {
            return CaptureOutcome::PseudoScheme;
        }
        if self.urls.insert(url.to_string()) {
            CaptureOutcome::Recorded
        } else {
            CaptureOutcome::Duplicate
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn quiet_deadline(&self) -> Option<Instant> {
        self.in_flight
            .is_empty()
            .then(|| self.last_activity + self.quiet_window)
    }

    fn finish(self, elapsed: Duration) -> ObservedRequests {
        ObservedRequests {
            urls: self.urls,
            termination: self.termination,
            skipped: self.skipped,
            elapsed,
        }
    }
}

fn is_pseudo_scheme(url: &str) -> bool {
    PSEUDO_SCHEMES.iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

#[cfg(test)]
mod tests {
    use super::scripted::{ScriptStep, ScriptedLauncher};
    use super::*;

    fn observer(launcher: &ScriptedLauncher) -> RequestObserver {
        RequestObserver::new(Arc::new(launcher.clone()), ObserverConfig::default())
    }

    #[test]
    fn listener_skips_pseudo_schemes_and_duplicates() {
        let mut capture = Capture::new(Duration::from_millis(500));
        assert_eq!(capture.record("https://cdn.example.net/a.js"), CaptureOutcome::Recorded);
        assert_eq!(capture.record("https://cdn.example.net/a.js"), CaptureOutcome::Duplicate);
        assert_eq!(capture.record("data:image/png;base64,AAAA"), CaptureOutcome::PseudoScheme);
        assert_eq!(capture.record("BLOB:https://example.com/1"), CaptureOutcome::PseudoScheme);
        assert_eq!(capture.record("  "), CaptureOutcome::Empty);
        assert_eq!(capture.urls.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn captures_requests_and_settles() {
        let launcher = ScriptedLauncher::new(vec![
            ScriptStep::start("1", "https://example.com/"),
            ScriptStep::start("2", "https://ads.trackerco.test/pixel.gif"),
            ScriptStep::start("3", "data:text/plain,hello"),
            ScriptStep::finish("1"),
            ScriptStep::finish("2"),
            ScriptStep::finish("3"),
        ]);

        let observed = observer(&launcher)
            .observe("https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(observed.termination(), Termination::Settled);
        assert_eq!(observed.len(), 2);
        assert!(observed.urls().contains("https://ads.trackerco.test/pixel.gif"));
        assert_eq!(observed.skipped(), 1);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_before_navigating() {
        let launcher = ScriptedLauncher::new(vec![ScriptStep::start("1", "https://early.example.org/")]);
        observer(&launcher)
            .observe("https://example.com", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(launcher.calls(), vec!["launch", "subscribe", "navigate", "close"]);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_after_load_extend_the_quiet_window() {
        let launcher = ScriptedLauncher::new(vec![
            ScriptStep::start("1", "https://example.com/"),
            ScriptStep::finish("1"),
            ScriptStep::wait(Duration::from_millis(300)),
            ScriptStep::start("2", "https://late.analytics.test/collect"),
            ScriptStep::wait(Duration::from_millis(200)),
            ScriptStep::finish("2"),
        ]);

        let observed = observer(&launcher)
            .observe("https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(observed.termination(), Termination::Settled);
        assert!(observed.urls().contains("https://late.analytics.test/collect"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_partial_capture() {
        let launcher = ScriptedLauncher::new(vec![
            ScriptStep::start("1", "https://example.com/"),
            ScriptStep::start("2", "https://stream.vendor.test/long-poll"),
        ])
        .hold_open();

        let observed = observer(&launcher)
            .observe("https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(observed.termination(), Termination::TimedOut);
        assert_eq!(observed.len(), 2);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_navigation_times_out_with_partial_capture() {
        let launcher = ScriptedLauncher::new(vec![ScriptStep::start("1", "https://cdn.vendor.test/app.js")])
            .with_navigation_delay(Duration::from_secs(120));

        let observed = observer(&launcher)
            .observe("https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(observed.termination(), Termination::TimedOut);
        assert!(observed.urls().contains("https://cdn.vendor.test/app.js"));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_error_still_closes_session() {
        let launcher = ScriptedLauncher::new(Vec::new()).fail_navigation("net::ERR_NAME_NOT_RESOLVED");

        let err = observer(&launcher)
            .observe("https://missing.example", Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, NavigationError::Navigate { .. }));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let launcher = ScriptedLauncher::new(Vec::new()).fail_launch("no chrome binary");

        let err = observer(&launcher)
            .observe("https://example.com", Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, NavigationError::Launch(_)));
        assert_eq!(launcher.close_count(), 0);
    }
}
