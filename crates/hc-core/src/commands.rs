//! Page commands: one browser task each, run inside a fresh sandbox.

use crate::channel::{ControlSession, Event, ALL_EVENTS};
use crate::error::{CoreError, Result};
use crate::page::{self, LIFECYCLE_EVENT, RESPONSE_RECEIVED};
use crate::wait::{EventWait, WaitOutcome};
use async_trait::async_trait;
use hc_sandbox::InterruptGate;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle event most commands stop on.
pub const DEFAULT_STOP_EVENT: &str = "networkIdle";

/// Default settle delay after the stop event.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

/// Everything a command gets from the host.
pub struct CommandContext<'a> {
    /// Connected session.
    pub session: &'a dyn ControlSession,
    /// Time budget for the awaited event.
    pub deadline: Duration,
    /// Log progress at `info` instead of `debug`.
    pub verbose: bool,
    /// Interrupts end waits early.
    pub gate: Arc<InterruptGate>,
}

impl CommandContext<'_> {
    /// A wait bound to this context's deadline and gate.
    pub fn wait(&self) -> EventWait {
        EventWait::new(self.deadline).interruptible(Arc::clone(&self.gate))
    }

    /// Navigate to `url` and wait for `stop_event` on the navigated frame,
    /// then `settle`. Returns the frame id.
    pub async fn load_page(&self, url: &str, stop_event: &str, settle: Duration) -> Result<String> {
        page::enable_page_events(self.session).await?;

        let stop_event = stop_event.to_string();
        let waited = self
            .wait()
            .settle(settle)
            .run(
                self.session,
                LIFECYCLE_EVENT,
                || page::navigate(self.session, url),
                move |event: &Event, frame_id: &String| {
                    event.param_str("/name") == Some(stop_event.as_str())
                        && event.param_str("/frameId") == Some(frame_id.as_str())
                },
            )
            .await?;

        waited.outcome.into_result(self.deadline)?;
        Ok(waited.subject)
    }
}

/// A command driving one page.
#[async_trait]
pub trait PageCommand: Send + Sync {
    /// Command name.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Run against a connected session, returning the command output.
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>>;
}

// ============================================================================
// eval / html
// ============================================================================

/// Load a page, wait for a lifecycle event, evaluate a script.
#[derive(Debug, Clone)]
pub struct EvalCommand {
    url: String,
    script: String,
    stop_event: String,
    wait: Duration,
    blocked_urls: Vec<String>,
}

impl EvalCommand {
    /// Evaluate `script`, a function body ending in `return ...`, on `url`.
    pub fn new(url: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script: script.into(),
            stop_event: DEFAULT_STOP_EVENT.to_string(),
            wait: DEFAULT_WAIT,
            blocked_urls: Vec::new(),
        }
    }

    /// Lifecycle event to stop on.
    pub fn stop_event(mut self, event: impl Into<String>) -> Self {
        self.stop_event = event.into();
        self
    }

    /// Extra time to wait after the stop event.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// URL patterns to block from loading.
    pub fn blocked_urls(mut self, patterns: Vec<String>) -> Self {
        self.blocked_urls = patterns;
        self
    }
}

#[async_trait]
impl PageCommand for EvalCommand {
    fn name(&self) -> &'static str {
        "eval"
    }

    fn description(&self) -> &'static str {
        "Load a specific page, evaluate an expression and print its result"
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        page::set_blocked_urls(ctx.session, &self.blocked_urls).await?;
        ctx.load_page(&self.url, &self.stop_event, self.wait).await?;

        let value = page::evaluate(ctx.session, &self.script).await?;
        Ok(page::render_value(&value).into_bytes())
    }
}

/// Load a page and print its rendered HTML.
#[derive(Debug, Clone)]
pub struct HtmlCommand {
    inner: EvalCommand,
}

impl HtmlCommand {
    /// Print the HTML of `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            inner: EvalCommand::new(url, "return document.documentElement.outerHTML"),
        }
    }

    /// Lifecycle event to stop on.
    pub fn stop_event(self, event: impl Into<String>) -> Self {
        Self {
            inner: self.inner.stop_event(event),
        }
    }

    /// Extra time to wait after the stop event.
    pub fn wait(self, wait: Duration) -> Self {
        Self {
            inner: self.inner.wait(wait),
        }
    }

    /// URL patterns to block from loading.
    pub fn blocked_urls(self, patterns: Vec<String>) -> Self {
        Self {
            inner: self.inner.blocked_urls(patterns),
        }
    }
}

#[async_trait]
impl PageCommand for HtmlCommand {
    fn name(&self) -> &'static str {
        "html"
    }

    fn description(&self) -> &'static str {
        "Load a specific page and print its HTML"
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        self.inner.run(ctx).await
    }
}

// ============================================================================
// screenshot
// ============================================================================

/// Load a page and capture it as PNG, sized to the document.
#[derive(Debug, Clone)]
pub struct ScreenshotCommand {
    url: String,
    stop_event: String,
    wait: Duration,
    initial_width: u32,
    initial_height: u32,
    max_width: u32,
    max_height: u32,
    blocked_urls: Vec<String>,
}

impl ScreenshotCommand {
    /// Screenshot `url` with a 1024x768 initial viewport and no size cap.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stop_event: DEFAULT_STOP_EVENT.to_string(),
            wait: DEFAULT_WAIT,
            initial_width: 1024,
            initial_height: 768,
            max_width: 0,
            max_height: 0,
            blocked_urls: Vec::new(),
        }
    }

    /// Lifecycle event to stop on.
    pub fn stop_event(mut self, event: impl Into<String>) -> Self {
        self.stop_event = event.into();
        self
    }

    /// Extra time to wait after the stop event.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Viewport used to render the page before measuring it.
    pub fn initial_size(mut self, width: u32, height: u32) -> Self {
        self.initial_width = width;
        self.initial_height = height;
        self
    }

    /// Largest screenshot size; 0 means unbounded.
    pub fn max_size(mut self, width: u32, height: u32) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    /// URL patterns to block from loading.
    pub fn blocked_urls(mut self, patterns: Vec<String>) -> Self {
        self.blocked_urls = patterns;
        self
    }

    fn clamp(&self, width: u32, height: u32) -> (u32, u32) {
        let cap = |value: u32, max: u32| if max > 0 { value.min(max) } else { value };
        (cap(width, self.max_width), cap(height, self.max_height))
    }
}

#[async_trait]
impl PageCommand for ScreenshotCommand {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    fn description(&self) -> &'static str {
        "Load a specific page and capture a PNG screenshot"
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        page::set_blocked_urls(ctx.session, &self.blocked_urls).await?;
        page::set_device_metrics_override(ctx.session, self.initial_width, self.initial_height)
            .await?;
        ctx.load_page(&self.url, &self.stop_event, self.wait).await?;

        let width =
            page::evaluate_u32(ctx.session, "return document.documentElement.scrollWidth").await?;
        let height =
            page::evaluate_u32(ctx.session, "return document.documentElement.scrollHeight").await?;
        let (shot_width, shot_height) = self.clamp(width, height);

        if ctx.verbose {
            tracing::info!(width, height, shot_width, shot_height, "Document measured");
        } else {
            tracing::debug!(width, height, shot_width, shot_height, "Document measured");
        }

        page::set_visible_size(ctx.session, shot_width, shot_height).await?;
        page::set_device_metrics_override(ctx.session, shot_width, shot_height).await?;
        page::capture_screenshot(ctx.session).await
    }
}

// ============================================================================
// resource
// ============================================================================

/// How a resource URL is compared against the requested pattern.
#[derive(Debug, Clone)]
pub enum UrlMatch {
    /// Whole URL equals the pattern.
    Exact(String),
    /// URL starts with the pattern.
    Prefix(String),
    /// URL contains the pattern.
    Contains(String),
    /// URL matches the regular expression.
    Regex(Regex),
}

impl UrlMatch {
    /// Build a matcher from a mode name (`exact`, `prefix`, `contains` or
    /// `regexp`) and a pattern.
    pub fn parse(mode: &str, pattern: &str) -> Result<Self> {
        match mode {
            "exact" => Ok(Self::Exact(pattern.to_string())),
            "prefix" => Ok(Self::Prefix(pattern.to_string())),
            "contains" => Ok(Self::Contains(pattern.to_string())),
            "regexp" => Regex::new(pattern).map(Self::Regex).map_err(|e| {
                CoreError::Config(format!("failed to compile the regular expression: {e}"))
            }),
            other => Err(CoreError::Config(format!(
                "unknown match mode '{other}', expected 'contains', 'exact', 'prefix' or 'regexp'"
            ))),
        }
    }

    /// Whether `url` is the resource being looked for.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern.as_str()),
            Self::Contains(pattern) => url.contains(pattern.as_str()),
            Self::Regex(re) => re.is_match(url),
        }
    }
}

/// Load a page and capture the body of one of the resources it loads.
#[derive(Debug, Clone)]
pub struct ResourceCommand {
    url: String,
    pattern: UrlMatch,
    wait: Duration,
    blocked_urls: Vec<String>,
}

impl ResourceCommand {
    /// Capture the first resource of `url` accepted by `pattern`.
    pub fn new(url: impl Into<String>, pattern: UrlMatch) -> Self {
        Self {
            url: url.into(),
            pattern,
            wait: DEFAULT_WAIT,
            blocked_urls: Vec::new(),
        }
    }

    /// Extra time to wait before capturing the body.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// URL patterns to block from loading.
    pub fn blocked_urls(mut self, patterns: Vec<String>) -> Self {
        self.blocked_urls = patterns;
        self
    }
}

#[async_trait]
impl PageCommand for ResourceCommand {
    fn name(&self) -> &'static str {
        "resource"
    }

    fn description(&self) -> &'static str {
        "Load resource in the context of a page and return its content"
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        page::set_blocked_urls(ctx.session, &self.blocked_urls).await?;
        page::enable_network_events(ctx.session).await?;

        let pattern = self.pattern.clone();
        let verbose = ctx.verbose;
        let waited = ctx
            .wait()
            .settle(self.wait)
            .run(
                ctx.session,
                RESPONSE_RECEIVED,
                || page::navigate(ctx.session, &self.url),
                move |event: &Event, _frame_id: &String| {
                    let Some(url) = event.param_str("/response/url") else {
                        return false;
                    };
                    let mime = event.param_str("/response/mimeType").unwrap_or_default();
                    if verbose {
                        tracing::info!(url = %url, mime = %mime, "Loaded");
                    } else {
                        tracing::debug!(url = %url, mime = %mime, "Loaded");
                    }
                    pattern.matches(url)
                },
            )
            .await?;

        // A matched response whose body cannot be read is a capture failure,
        // not a timeout.
        let event = waited.outcome.into_result(ctx.deadline)?;
        let request_id = event
            .param_str("/requestId")
            .ok_or_else(|| CoreError::Capture("response event has no request id".into()))?;
        page::response_body(ctx.session, request_id).await
    }
}

// ============================================================================
// debug
// ============================================================================

/// Load a page and record every event until the deadline.
#[derive(Debug, Clone)]
pub struct DebugCommand {
    url: String,
    blocked_urls: Vec<String>,
}

impl DebugCommand {
    /// Watch `url` load.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            blocked_urls: Vec::new(),
        }
    }

    /// URL patterns to block from loading.
    pub fn blocked_urls(mut self, patterns: Vec<String>) -> Self {
        self.blocked_urls = patterns;
        self
    }
}

#[async_trait]
impl PageCommand for DebugCommand {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn description(&self) -> &'static str {
        "Peek into page and DOM events as the page loads"
    }

    async fn run(&self, ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        page::set_blocked_urls(ctx.session, &self.blocked_urls).await?;
        page::enable_all_events(ctx.session).await?;

        let mut events = ctx.session.subscribe(ALL_EVENTS).await?;
        page::navigate(ctx.session, &self.url).await?;

        let mut log = String::new();
        let wait = ctx.wait();
        let idle = wait.idle();
        tokio::pin!(idle);

        let outcome = loop {
            tokio::select! {
                outcome = &mut idle => break outcome,
                event = events.next() => match event {
                    Some(event) => {
                        tracing::info!(method = %event.method, params = %event.params, "Event");
                        let _ = writeln!(log, "{} {}", event.method, event.params);
                    }
                    None => break idle.as_mut().await,
                },
            }
        };

        match outcome {
            WaitOutcome::Interrupted => Err(CoreError::Interrupted),
            WaitOutcome::DeadlineExceeded | WaitOutcome::EventMatched(()) => Ok(log.into_bytes()),
        }
    }
}

/// Print the crate version. Touches nothing in the browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionCommand;

impl VersionCommand {
    /// Version string, without a sandbox.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[async_trait]
impl PageCommand for VersionCommand {
    fn name(&self) -> &'static str {
        "version"
    }

    fn description(&self) -> &'static str {
        "Print the version"
    }

    async fn run(&self, _ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
        Ok(Self::version().as_bytes().to_vec())
    }
}
