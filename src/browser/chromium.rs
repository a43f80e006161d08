//! Headless Chrome render engine over the DevTools protocol.
//!
//! One Chrome process is launched per engine. Each [`RenderContext`] is a
//! tab; the pool decides how many tabs exist. The CDP event handler runs on
//! its own task for the lifetime of the engine and is aborted on shutdown.
//!
//! Request interception (the CDP `Fetch` domain) is on for every tab. Each
//! tab runs an interceptor task that answers every paused request: it asks
//! the current navigation's [`RequestGate`] and either continues the request
//! or fails it with `BlockedByClient`. A tab with no navigation in progress
//! sends nothing.

use super::{Navigation, RenderContext, RenderEngine, RequestGate};
use crate::error::Web2MdError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{ClearBrowserCookiesParams, ErrorReason};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Launch options for [`ChromiumEngine`].
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Chrome/Chromium binary. Default: auto-detected by chromiumoxide.
    pub executable: Option<PathBuf>,
    /// Timeout for individual CDP commands. Default: 30 s.
    pub request_timeout: Duration,
    /// Extra command-line switches appended to the defaults.
    pub extra_args: Vec<String>,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            executable: None,
            request_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

const DEFAULT_ARGS: [&str; 4] = [
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--no-first-run",
];

/// [`RenderEngine`] backed by a headless Chrome process.
pub struct ChromiumEngine {
    browser: Mutex<Browser>,
    handler: StdMutex<Option<JoinHandle<()>>>,
}

impl ChromiumEngine {
    /// Launch Chrome and start the CDP event loop.
    pub async fn launch(options: ChromiumOptions) -> Result<Self, Web2MdError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .enable_request_intercept()
            .request_timeout(options.request_timeout)
            .args(DEFAULT_ARGS.iter().map(|s| s.to_string()).chain(options.extra_args));
        if let Some(path) = options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| Web2MdError::Internal(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Web2MdError::Internal(format!("failed to launch browser: {e}")))?;

        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });
        info!("headless browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            handler: StdMutex::new(Some(task)),
        })
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>, Web2MdError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| Web2MdError::Internal(format!("failed to open tab: {e}")))?;
        let paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| Web2MdError::Internal(format!("failed to intercept tab requests: {e}")))?;

        let gate = GateSlot::default();
        let refused = RefusalSlot::default();
        let interceptor = tokio::spawn(intercept(page.clone(), paused, gate.clone(), refused.clone()));
        Ok(Box::new(ChromiumContext {
            page,
            gate,
            refused,
            interceptor,
        }))
    }

    async fn shutdown(&self) -> Result<(), Web2MdError> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "browser process did not exit cleanly");
        }
        let task = match self.handler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        info!("headless browser shut down");
        Ok(())
    }
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        let task = match self.handler.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Gate of the navigation in progress; `None` refuses everything.
type GateSlot = Arc<StdMutex<Option<Arc<dyn RequestGate>>>>;

/// First refusal of a main-frame document during the current navigation.
type RefusalSlot = Arc<StdMutex<Option<Web2MdError>>>;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One Chrome tab.
struct ChromiumContext {
    page: Page,
    gate: GateSlot,
    refused: RefusalSlot,
    interceptor: JoinHandle<()>,
}

/// Answer every paused request of `page` until the tab goes away.
async fn intercept(page: Page, mut paused: EventStream<EventRequestPaused>, gate: GateSlot, refused: RefusalSlot) {
    while let Some(event) = paused.next().await {
        let page = page.clone();
        let gate = lock(&gate).clone();
        let refused = refused.clone();
        tokio::spawn(async move {
            let verdict = match gate {
                Some(gate) => admit(&event, gate.as_ref()).await,
                None => Err(Web2MdError::SsrfBlocked {
                    url: event.request.url.clone(),
                    reason: "no navigation in progress".into(),
                }),
            };
            let answered = match verdict {
                Ok(()) => page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ()),
                Err(e) => {
                    warn!(url = %event.request.url, error = %e, "browser request refused");
                    if is_main_frame(&page, &event).await {
                        lock(&refused).get_or_insert(e);
                    }
                    page.execute(FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient))
                        .await
                        .map(|_| ())
                }
            };
            if let Err(e) = answered {
                debug!(error = %e, "failed to answer paused request");
            }
        });
    }
}

async fn admit(event: &EventRequestPaused, gate: &dyn RequestGate) -> Result<(), Web2MdError> {
    // Response-stage pauses carry a request that was already admitted.
    if event.response_status_code.is_some() {
        return Ok(());
    }
    let url = Url::parse(&event.request.url).map_err(|e| Web2MdError::InvalidUrl {
        url: event.request.url.clone(),
        reason: e.to_string(),
    })?;
    if matches!(url.scheme(), "data" | "blob") {
        return Ok(());
    }
    gate.admit(&url).await
}

async fn is_main_frame(page: &Page, event: &EventRequestPaused) -> bool {
    match page.mainframe().await {
        Ok(Some(frame)) => frame == event.frame_id,
        // Before the first commit the tab has no frame tree yet; the only
        // document it can be loading is the top-level one.
        _ => true,
    }
}

fn cdp_error(what: &str, url: Option<&Url>, e: impl std::fmt::Display) -> Web2MdError {
    match url {
        Some(url) => Web2MdError::UpstreamHttp {
            url: url.to_string(),
            status: None,
            detail: format!("{what}: {e}"),
        },
        None => Web2MdError::Internal(format!("{what}: {e}")),
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &Url, gate: Arc<dyn RequestGate>) -> Result<Navigation, Web2MdError> {
        *lock(&self.gate) = Some(gate);
        lock(&self.refused).take();

        let response = match self.page.goto(url.as_str()).await {
            Ok(page) => page.wait_for_navigation_response().await,
            Err(e) => Err(e),
        };
        let refusal = lock(&self.refused).take();
        if let Some(refusal) = refusal {
            return Err(refusal);
        }
        let request = response.map_err(|e| cdp_error("navigation failed", Some(url), e))?;
        let status = request
            .as_ref()
            .and_then(|r| r.response.as_ref())
            .and_then(|r| u16::try_from(r.status).ok());
        Ok(Navigation { status })
    }

    async fn has_selector(&mut self, selector: &str) -> Result<bool, Web2MdError> {
        // find_element errors both for "no match" and for invalid selectors;
        // either way the element is not there.
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn content(&mut self) -> Result<String, Web2MdError> {
        self.page
            .content()
            .await
            .map_err(|e| cdp_error("failed to read DOM", None, e))
    }

    async fn current_url(&mut self) -> Result<Option<String>, Web2MdError> {
        self.page
            .url()
            .await
            .map_err(|e| cdp_error("failed to read URL", None, e))
    }

    async fn reset(&mut self) -> Result<(), Web2MdError> {
        lock(&self.gate).take();
        lock(&self.refused).take();
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| cdp_error("failed to clear cookies", None, e))?;
        self.page
            .goto("about:blank")
            .await
            .map_err(|e| cdp_error("failed to blank tab", None, e))?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.interceptor.abort();
        if let Err(e) = self.page.close().await {
            warn!(error = %e, "failed to close tab");
        }
    }
}
