//! Scripted browser sessions.
//!
//! Replays a fixed sequence of network events instead of driving a browser.
//! Used by the test suites and handy for dry runs of the scan pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::session::{BrowserLauncher, BrowserSession, NavigationError, NetworkEvent, NetworkEvents, SessionProfile};

/// One step of a scripted page load.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(NetworkEvent),
    Wait(Duration),
}

impl ScriptStep {
    pub fn start(id: &str, url: &str) -> Self {
        ScriptStep::Emit(NetworkEvent::RequestStarted {
            id: id.to_string(),
            url: url.to_string(),
        })
    }

    pub fn finish(id: &str) -> Self {
        ScriptStep::Emit(NetworkEvent::RequestFinished { id: id.to_string() })
    }

    pub fn wait(duration: Duration) -> Self {
        ScriptStep::Wait(duration)
    }
}

#[derive(Debug, Default)]
struct Journal {
    calls: Mutex<Vec<&'static str>>,
    profiles: Mutex<Vec<SessionProfile>>,
    closes: AtomicUsize,
}

impl Journal {
    fn note(&self, call: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Launcher handing out sessions that replay the same script.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    steps: Vec<ScriptStep>,
    navigation_delay: Duration,
    hold_open: bool,
    launch_failure: Option<String>,
    navigation_failure: Option<String>,
    journal: Arc<Journal>,
}

impl ScriptedLauncher {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            navigation_delay: Duration::ZERO,
            hold_open: false,
            launch_failure: None,
            navigation_failure: None,
            journal: Arc::new(Journal::default()),
        }
    }

    /// Delay before `navigate` reports the page as loaded.
    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    /// Keep the event stream open after the script ends, like a page with a
    /// long-lived connection.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn fail_launch(mut self, reason: impl Into<String>) -> Self {
        self.launch_failure = Some(reason.into());
        self
    }

    pub fn fail_navigation(mut self, reason: impl Into<String>) -> Self {
        self.navigation_failure = Some(reason.into());
        self
    }

    /// Session calls in the order they happened, across all sessions.
    pub fn calls(&self) -> Vec<&'static str> {
        self.journal
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Profiles passed to `launch`.
    pub fn profiles(&self) -> Vec<SessionProfile> {
        self.journal
            .profiles
            .lock()
            .map(|profiles| profiles.clone())
            .unwrap_or_default()
    }

    pub fn close_count(&self) -> usize {
        self.journal.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, NavigationError> {
        self.journal.note("launch");
        if let Ok(mut profiles) = self.journal.profiles.lock() {
            profiles.push(profile.clone());
        }
        if let Some(reason) = &self.launch_failure {
            return Err(NavigationError::Launch(reason.clone()));
        }
        Ok(Box::new(ScriptedSession {
            launcher: self.clone(),
            sender: None,
            player: None,
        }))
    }
}

struct ScriptedSession {
    launcher: ScriptedLauncher,
    sender: Option<mpsc::UnboundedSender<NetworkEvent>>,
    player: Option<JoinHandle<()>>,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn subscribe(&mut self) -> Result<NetworkEvents, NavigationError> {
        self.launcher.journal.note("subscribe");
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sender = Some(sender);
        Ok(receiver)
    }

    async fn navigate(&mut self, url: &str) -> Result<(), NavigationError> {
        self.launcher.journal.note("navigate");

        // Without a listener the events go nowhere, as with a real browser.
        if let Some(sender) = self.sender.take() {
            let steps = self.launcher.steps.clone();
            let hold_open = self.launcher.hold_open;
            self.player = Some(tokio::spawn(async move {
                for step in steps {
                    match step {
                        ScriptStep::Emit(event) => {
                            if sender.send(event).is_err() {
                                return;
                            }
                        }
                        ScriptStep::Wait(duration) => sleep(duration).await,
                    }
                }
                if hold_open {
                    std::future::pending::<()>().await;
                }
            }));
        }

        if !self.launcher.navigation_delay.is_zero() {
            sleep(self.launcher.navigation_delay).await;
        }

        match &self.launcher.navigation_failure {
            Some(reason) => Err(NavigationError::Navigate {
                url: url.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), NavigationError> {
        self.launcher.journal.note("close");
        self.launcher.journal.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(player) = self.player {
            player.abort();
        }
        Ok(())
    }
}
