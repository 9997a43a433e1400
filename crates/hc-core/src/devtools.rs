//! DevTools transport: the real control channel.
//!
//! The browser's debugger URL is discovered over HTTP (`/json/version`) and
//! handed to chromiumoxide, which owns the socket. Commands go out on the
//! first page target; events are forwarded from typed listeners.

use crate::channel::{ControlSession, ControlTransport, Event, EventStream, Session, ALL_EVENTS};
use crate::error::{CoreError, Result};
use crate::page::{LIFECYCLE_EVENT, RESPONSE_RECEIVED};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::{dom, log, network, page as cdp_page};
use chromiumoxide::cdp::js_protocol::runtime;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use futures::{Stream, StreamExt};
use hc_sandbox::Endpoint;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Timeout for individual DevTools commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the discovery request.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls for an existing page target before opening a new one.
const PAGE_POLLS: u32 = 10;
const PAGE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events a session can forward; [`ALL_EVENTS`] subscribes to all of them.
pub const SUPPORTED_EVENTS: &[&str] = &[
    LIFECYCLE_EVENT,
    "Page.loadEventFired",
    "Page.domContentEventFired",
    "Page.frameNavigated",
    "Network.requestWillBeSent",
    RESPONSE_RECEIVED,
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Runtime.consoleAPICalled",
    "Runtime.exceptionThrown",
    "Log.entryAdded",
    "DOM.documentUpdated",
];

/// Names a subscription expands to.
pub fn expand_subscription(event: &str) -> Result<Vec<&'static str>> {
    if event == ALL_EVENTS {
        return Ok(SUPPORTED_EVENTS.to_vec());
    }
    SUPPORTED_EVENTS
        .iter()
        .find(|supported| **supported == event)
        .map(|supported| vec![*supported])
        .ok_or_else(|| CoreError::Config(format!("unsupported event: {event}")))
}

// ============================================================================
// Discovery
// ============================================================================

/// Body of `/json/version`.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    /// Product string, e.g. `HeadlessChrome/126.0.6478.126`.
    #[serde(rename = "Browser", default)]
    pub browser: String,
    /// Browser-level debugger URL.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: String,
}

/// Point a debugger URL at the published endpoint.
///
/// The browser reports the address it listens on inside the container,
/// which is not reachable from the host.
pub fn rewrite_authority(ws_url: &str, endpoint: &Endpoint) -> Result<String> {
    let invalid = |reason: String| CoreError::Protocol {
        code: -1,
        message: format!("invalid debugger url {ws_url}: {reason}"),
    };

    let mut url = url::Url::parse(ws_url).map_err(|e| invalid(e.to_string()))?;
    url.set_host(Some(&endpoint.url_host()))
        .map_err(|e| invalid(e.to_string()))?;
    url.set_port(Some(endpoint.port))
        .map_err(|_| invalid("cannot carry a port".into()))?;
    Ok(url.into())
}

/// [`ControlTransport`] speaking the Chrome DevTools protocol.
#[derive(Debug, Clone)]
pub struct DevToolsTransport {
    http: reqwest::Client,
    command_timeout: Duration,
}

impl Default for DevToolsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DevToolsTransport {
    /// Create a transport with the default command timeout.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Ask the browser at `endpoint` for its debugger URL.
    pub async fn version(&self, endpoint: &Endpoint) -> Result<BrowserVersion> {
        let url = format!("{}/json/version", endpoint.http_url());
        tracing::trace!(url = %url, "Querying DevTools version");
        let version = self
            .http
            .get(&url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(version)
    }
}

#[async_trait]
impl ControlTransport for DevToolsTransport {
    async fn connect(&self, endpoint: &Endpoint, verbose: bool) -> Result<Session> {
        let version = self.version(endpoint).await?;
        let ws_url = rewrite_authority(&version.ws_url, endpoint)?;

        tracing::debug!(browser = %version.browser, url = %ws_url, "Connecting to browser");
        let session = DevToolsSession::connect(&ws_url, verbose, self.command_timeout).await?;
        Ok(Session::new(session))
    }
}

// ============================================================================
// Session
// ============================================================================

/// A CDP command given by name, answered with raw JSON.
#[derive(Debug, Clone)]
struct RawCommand {
    method: String,
    params: Value,
}

impl RawCommand {
    fn new(method: &str, params: Value) -> Self {
        let params = if params.is_null() { json!({}) } else { params };
        Self {
            method: method.to_string(),
            params,
        }
    }
}

// Only the params go on the wire; the method travels as the identifier.
impl Serialize for RawCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.params.serialize(serializer)
    }
}

impl chromiumoxide_types::Method for RawCommand {
    fn identifier(&self) -> chromiumoxide_types::MethodId {
        self.method.clone().into()
    }
}

impl chromiumoxide_types::Command for RawCommand {
    type Response = Value;
}

/// Subscribe `$tx` to the typed listener matching `$event`.
macro_rules! listen {
    ($page:expr, $event:expr, $tx:expr, { $($name:pat => $ty:ty,)* }) => {
        match $event {
            $($name => forward($page.event_listener::<$ty>().await?, $event, $tx),)*
            other => return Err(CoreError::Config(format!("unsupported event: {other}"))),
        }
    };
}

/// One chromiumoxide connection driving a page target.
pub struct DevToolsSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    verbose: bool,
    command_timeout: Duration,
}

impl DevToolsSession {
    /// Connect to a browser-level debugger URL and attach to a page.
    pub async fn connect(ws_url: &str, verbose: bool, command_timeout: Duration) -> Result<Self> {
        let (mut browser, mut handler) = Browser::connect(ws_url).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "DevTools handler error");
                }
            }
        });

        let page = match first_page(&mut browser).await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e);
            }
        };

        tracing::info!(url = %ws_url, target_id = ?page.target_id(), "DevTools session opened");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
            forwarders: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            verbose,
            command_timeout,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::ChannelClosed("session closed".into()));
        }
        Ok(())
    }

    async fn listen(&self, event: &'static str, tx: UnboundedSender<Event>) -> Result<JoinHandle<()>> {
        let task = listen!(self.page, event, tx, {
            LIFECYCLE_EVENT => cdp_page::EventLifecycleEvent,
            "Page.loadEventFired" => cdp_page::EventLoadEventFired,
            "Page.domContentEventFired" => cdp_page::EventDomContentEventFired,
            "Page.frameNavigated" => cdp_page::EventFrameNavigated,
            "Network.requestWillBeSent" => network::EventRequestWillBeSent,
            RESPONSE_RECEIVED => network::EventResponseReceived,
            "Network.loadingFinished" => network::EventLoadingFinished,
            "Network.loadingFailed" => network::EventLoadingFailed,
            "Runtime.consoleAPICalled" => runtime::EventConsoleApiCalled,
            "Runtime.exceptionThrown" => runtime::EventExceptionThrown,
            "Log.entryAdded" => log::EventEntryAdded,
            "DOM.documentUpdated" => dom::EventDocumentUpdated,
        });
        Ok(task)
    }
}

async fn first_page(browser: &mut Browser) -> Result<Page> {
    browser.fetch_targets().await?;
    for _ in 0..PAGE_POLLS {
        if let Some(page) = browser.pages().await?.into_iter().next() {
            return Ok(page);
        }
        tokio::time::sleep(PAGE_POLL_INTERVAL).await;
    }
    tracing::debug!("No page target found, opening one");
    Ok(browser.new_page("about:blank").await?)
}

/// Re-emit typed events as [`Event`]s until either side goes away.
fn forward<T, S>(mut events: S, method: &'static str, tx: UnboundedSender<Event>) -> JoinHandle<()>
where
    T: Serialize + Send + Sync + 'static,
    S: Stream<Item = Arc<T>> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    let params = match serde_json::to_value(&*event) {
                        Ok(params) => params,
                        Err(e) => {
                            tracing::warn!(event = method, error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if tx.send(Event::new(method, params)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[async_trait]
impl ControlSession for DevToolsSession {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_open()?;

        let command = RawCommand::new(method, params);
        if self.verbose {
            tracing::debug!(method = %method, params = %command.params, "Sending DevTools command");
        } else {
            tracing::trace!(method = %method, "Sending DevTools command");
        }

        match tokio::time::timeout(self.command_timeout, self.page.execute(command)).await {
            Ok(Ok(response)) => {
                if self.verbose {
                    tracing::debug!(method = %method, result = %response.result, "DevTools response");
                }
                Ok(response.result)
            }
            Ok(Err(CdpError::Timeout)) | Err(_) => {
                tracing::warn!(
                    method = %method,
                    timeout_secs = self.command_timeout.as_secs(),
                    "DevTools command timeout"
                );
                Err(CoreError::Timeout(self.command_timeout))
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn subscribe(&self, event: &str) -> Result<EventStream> {
        self.ensure_open()?;

        let (tx, stream) = EventStream::channel();
        let mut tasks = Vec::new();
        for name in expand_subscription(event)? {
            match self.listen(name, tx.clone()).await {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tasks.iter().for_each(JoinHandle::abort);
                    return Err(e);
                }
            }
        }
        tracing::trace!(event = %event, listeners = tasks.len(), "Subscribed to DevTools event");
        lock(&self.forwarders).extend(tasks);
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for task in lock(&self.forwarders).drain(..) {
            task.abort();
        }
        drop(lock(&self.browser).take());
        self.handler.abort();
        tracing::info!("DevTools session closed");
        Ok(())
    }
}

impl Drop for DevToolsSession {
    fn drop(&mut self) {
        for task in lock(&self.forwarders).drain(..) {
            task.abort();
        }
        self.handler.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
