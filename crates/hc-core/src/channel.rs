//! Control channel capabilities.
//!
//! The rest of the crate talks to the browser only through these traits;
//! [`DevToolsTransport`](crate::DevToolsTransport) is the real adapter and
//! tests supply scripted ones.

use crate::error::Result;
use async_trait::async_trait;
use hc_sandbox::{Disconnect, DisconnectError, Endpoint, SandboxHandle};
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Subscription name that receives every event.
pub const ALL_EVENTS: &str = "*";

/// One event pushed by the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, e.g. `Page.lifecycleEvent`.
    pub method: String,
    /// Event parameters.
    pub params: Value,
}

impl Event {
    /// Create an event.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// String parameter at a JSON pointer, e.g. `/response/url`.
    pub fn param_str(&self, pointer: &str) -> Option<&str> {
        self.params.pointer(pointer).and_then(Value::as_str)
    }
}

/// Events delivered for one subscription.
///
/// Dropping the stream unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<Event>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next event, or `None` once the session has gone away.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// A live control session with one page.
#[async_trait]
pub trait ControlSession: Send + Sync {
    /// Send a command and wait for its result.
    async fn send_command(&self, method: &str, params: Value) -> Result<Value>;

    /// Receive events named `event`, or every event for [`ALL_EVENTS`].
    async fn subscribe(&self, event: &str) -> Result<EventStream>;

    /// Close the session. Later commands fail.
    async fn close(&self) -> Result<()>;
}

/// Opens control sessions to a sandbox endpoint.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Connect to the browser published at `endpoint`.
    async fn connect(&self, endpoint: &Endpoint, verbose: bool) -> Result<Session>;
}

/// Shared handle to a live control session.
#[derive(Clone)]
pub struct Session(Arc<dyn ControlSession>);

impl Session {
    /// Wrap a session implementation.
    pub fn new(session: impl ControlSession + 'static) -> Self {
        Self(Arc::new(session))
    }

    /// Borrow the session as a trait object.
    pub fn as_dyn(&self) -> &dyn ControlSession {
        self.0.as_ref()
    }
}

impl From<Arc<dyn ControlSession>> for Session {
    fn from(session: Arc<dyn ControlSession>) -> Self {
        Self(session)
    }
}

impl Deref for Session {
    type Target = dyn ControlSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

#[async_trait]
impl Disconnect for Session {
    async fn disconnect(&self) -> std::result::Result<(), DisconnectError> {
        self.0.close().await.map_err(Into::into)
    }
}

/// A sandbox whose connection is a control session.
pub type BrowserHandle = SandboxHandle<Session>;
