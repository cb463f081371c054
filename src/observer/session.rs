//! Browser session abstraction used by the request observer.
//!
//! The observer only ever talks to these traits, so the capture logic can be
//! driven by a scripted session in tests and by Chromium in production.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Network activity reported by a browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The page issued a request. Redirect hops reuse the same `id`.
    RequestStarted { id: String, url: String },
    /// The request completed or failed; either way it is no longer in flight.
    RequestFinished { id: String },
}

/// Receiving half of a session's network event stream.
pub type NetworkEvents = mpsc::UnboundedReceiver<NetworkEvent>;

/// Settings applied to every freshly launched session.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub ignore_certificate_errors: bool,
    pub headless: bool,
    pub navigation_timeout: Duration,
}

/// Failures raised while launching or driving a browser session.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("failed to attach request listener: {0}")]
    Subscribe(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigate { url: String, reason: String },
    #[error("session teardown failed: {0}")]
    Teardown(String),
}

/// Starts isolated sessions. Each call must hand out a session with its own
/// cookies, cache and storage.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, NavigationError>;
}

/// One isolated page load.
#[async_trait]
pub trait BrowserSession: Send {
    /// Attach the request listener. Events are buffered until read.
    async fn subscribe(&mut self) -> Result<NetworkEvents, NavigationError>;

    /// Start loading `url` and resolve once the browser reports the load.
    async fn navigate(&mut self, url: &str) -> Result<(), NavigationError>;

    /// Tear down the page, its context and the browser.
    async fn close(self: Box<Self>) -> Result<(), NavigationError>;
}
