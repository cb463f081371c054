//! Headless Chromium sessions via `chromiumoxide`.
//!
//! Every launch starts a dedicated browser process and opens the page inside a
//! fresh browser context, so cookies, cache and storage never carry over from
//! one scan to the next.

use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::session::{BrowserLauncher, BrowserSession, NavigationError, NetworkEvent, NetworkEvents, SessionProfile};

/// Launches a local Chromium/Chrome binary per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    extra_args: Vec<String>,
    no_sandbox: bool,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific browser binary instead of auto-detection.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Required when running as root inside containers.
    pub fn no_sandbox(mut self) -> Self {
        self.no_sandbox = true;
        self
    }

    fn browser_config(&self, profile: &SessionProfile) -> Result<BrowserConfig, NavigationError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(profile.navigation_timeout)
            .arg(format!("--user-agent={}", profile.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");

        if !profile.headless {
            builder = builder.with_head();
        }
        if profile.ignore_certificate_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.extra_args {
            builder = builder.arg(arg.as_str());
        }

        builder.build().map_err(NavigationError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>, NavigationError> {
        let config = self.browser_config(profile)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| NavigationError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log::trace!("chromium handler: {err}");
                }
            }
        });

        let mut session = ChromiumSession {
            browser,
            handler_task,
            context: None,
            page: None,
            listener: None,
        };

        // Anything that fails from here on must still tear the browser down.
        if let Err(err) = session.open_page(profile).await {
            if let Err(close_err) = Box::new(session).close().await {
                log::warn!("chromium: {close_err}");
            }
            return Err(err);
        }

        Ok(Box::new(session))
    }
}

struct ChromiumSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    context: Option<BrowserContextId>,
    page: Option<Page>,
    listener: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    async fn open_page(&mut self, profile: &SessionProfile) -> Result<(), NavigationError> {
        let context = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|err| NavigationError::Launch(format!("browser context: {err}")))?;
        self.context = Some(context.clone());

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context)
            .build()
            .map_err(NavigationError::Launch)?;
        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|err| NavigationError::Launch(format!("new page: {err}")))?;

        page.set_user_agent(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await
            .map_err(|err| NavigationError::Launch(format!("user agent: {err}")))?;

        self.page = Some(page);
        Ok(())
    }

    fn page(&self) -> Result<&Page, NavigationError> {
        self.page
            .as_ref()
            .ok_or_else(|| NavigationError::Subscribe("page is not open".into()))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn subscribe(&mut self) -> Result<NetworkEvents, NavigationError> {
        let page = self.page()?;
        let subscribe_err = |err: chromiumoxide::error::CdpError| NavigationError::Subscribe(err.to_string());

        let started = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(subscribe_err)?
            .map(|event| NetworkEvent::RequestStarted {
                id: event.request_id.inner().clone(),
                url: event.request.url.clone(),
            });
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(subscribe_err)?
            .map(|event| NetworkEvent::RequestFinished {
                id: event.request_id.inner().clone(),
            });
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(subscribe_err)?
            .map(|event| NetworkEvent::RequestFinished {
                id: event.request_id.inner().clone(),
            });

        let streams: Vec<BoxStream<'static, NetworkEvent>> = vec![started.boxed(), finished.boxed(), failed.boxed()];
        let mut merged = futures::stream::select_all(streams);

        let (sender, receiver) = mpsc::unbounded_channel();
        self.listener = Some(tokio::spawn(async move {
            while let Some(event) = merged.next().await {
                if sender.send(event).is_err() {
                    break;
                }
            }
        }));

        Ok(receiver)
    }

    async fn navigate(&mut self, url: &str) -> Result<(), NavigationError> {
        let page = self.page.as_ref().ok_or_else(|| NavigationError::Navigate {
            url: url.to_string(),
            reason: "page is not open".into(),
        })?;
        page.goto(url).await.map_err(|err| NavigationError::Navigate {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), NavigationError> {
        let ChromiumSession {
            mut browser,
            handler_task,
            context,
            page,
            listener,
        } = *self;

        if let Some(listener) = listener {
            listener.abort();
        }

        let mut failures = Vec::new();
        if let Some(page) = page
            && let Err(err) = page.close().await
        {
            failures.push(format!("page: {err}"));
        }
        if let Some(context) = context
            && let Err(err) = browser.dispose_browser_context(context).await
        {
            failures.push(format!("context: {err}"));
        }
        if let Err(err) = browser.close().await {
            failures.push(format!("browser: {err}"));
        }
        if let Err(err) = browser.wait().await {
            failures.push(format!("process: {err}"));
        }
        handler_task.abort();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NavigationError::Teardown(failures.join("; ")))
        }
    }
}
