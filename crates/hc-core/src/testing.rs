//! Scripted control sessions and transports for unit tests.

use crate::channel::{ControlSession, ControlTransport, Event, EventStream, Session, ALL_EVENTS};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use hc_sandbox::Endpoint;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

type Handler = Box<dyn Fn(&str, &Value) -> Result<Value> + Send + Sync>;
type Subscribers = Arc<Mutex<HashMap<String, Vec<UnboundedSender<Event>>>>>;

#[derive(Clone)]
enum Scheduled {
    Emit(Duration, Event),
    CloseStreams(Duration),
}

/// A [`ControlSession`] whose responses come from a handler closure.
///
/// Events can be scheduled relative to a command being sent; a zero delay
/// emits before the command returns.
pub struct ScriptedSession {
    handler: Handler,
    scheduled: Mutex<HashMap<String, Vec<Scheduled>>>,
    subscribers: Subscribers,
    commands: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_close: AtomicBool,
}

impl ScriptedSession {
    /// Session answering every command with `{}`.
    pub fn new() -> Self {
        Self::with_handler(|_, _| Ok(json!({})))
    }

    /// Session answering commands with `handler`.
    pub fn with_handler(
        handler: impl Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            scheduled: Mutex::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            commands: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        }
    }

    /// Emit `event` `delay` after each successful `method` command.
    pub fn emit_after(&self, method: &str, delay: Duration, event: Event) {
        self.schedule(method, Scheduled::Emit(delay, event));
    }

    /// End every event stream `delay` after each `method` command.
    pub fn close_streams_after(&self, method: &str, delay: Duration) {
        self.schedule(method, Scheduled::CloseStreams(delay));
    }

    /// Make `close` fail.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Every command sent, in order.
    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().unwrap().clone()
    }

    /// Names of every command sent, in order.
    pub fn methods(&self) -> Vec<String> {
        self.commands().into_iter().map(|(method, _)| method).collect()
    }

    /// Parameters of the first `method` command.
    pub fn params_of(&self, method: &str) -> Option<Value> {
        self.commands()
            .into_iter()
            .find(|(m, _)| m == method)
            .map(|(_, params)| params)
    }

    /// Live subscriptions for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(event)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Wrap into a [`Session`].
    pub fn into_session(self) -> Session {
        Session::new(self)
    }

    /// Share as a [`Session`] while keeping access to the recordings.
    pub fn shared(self: &Arc<Self>) -> Session {
        let session: Arc<dyn ControlSession> = self.clone();
        Session::from(session)
    }

    fn schedule(&self, method: &str, action: Scheduled) {
        self.scheduled
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push(action);
    }

    fn fire(&self, method: &str) {
        let actions = self
            .scheduled
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_default();

        for action in actions {
            let subscribers = Arc::clone(&self.subscribers);
            match action {
                Scheduled::Emit(delay, event) if delay.is_zero() => deliver(&subscribers, event),
                Scheduled::Emit(delay, event) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        deliver(&subscribers, event);
                    });
                }
                Scheduled::CloseStreams(delay) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        subscribers.lock().unwrap().clear();
                    });
                }
            }
        }
    }
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(subscribers: &Subscribers, event: Event) {
    let mut subscribers = subscribers.lock().unwrap();
    for key in [event.method.as_str(), ALL_EVENTS] {
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl ControlSession for ScriptedSession {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.commands
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::ChannelClosed("session closed".into()));
        }

        let result = (self.handler)(method, &params)?;
        self.fire(method);
        Ok(result)
    }

    async fn subscribe(&self, event: &str) -> Result<EventStream> {
        let (tx, stream) = EventStream::channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(event.to_string())
            .or_default()
            .push(tx);
        Ok(stream)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().unwrap().clear();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(CoreError::ChannelClosed("peer vanished".into()));
        }
        Ok(())
    }
}

/// A [`ControlTransport`] that fails a fixed number of times first.
pub struct FlakyTransport {
    failures: u32,
    attempts: AtomicU32,
    session: Option<Arc<ScriptedSession>>,
}

impl FlakyTransport {
    /// Fail `failures` times, then hand out fresh scripted sessions.
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            session: None,
        }
    }

    /// Fail `failures` times, then hand out `session`.
    pub fn with_session(failures: u32, session: Arc<ScriptedSession>) -> Self {
        Self {
            session: Some(session),
            ..Self::new(failures)
        }
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlTransport for FlakyTransport {
    async fn connect(&self, _endpoint: &Endpoint, _verbose: bool) -> Result<Session> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(CoreError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection refused (attempt {attempt})"),
            )));
        }
        Ok(match &self.session {
            Some(session) => session.shared(),
            None => ScriptedSession::new().into_session(),
        })
    }
}
