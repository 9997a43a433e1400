//! Deadline-bound event waits.
//!
//! Every page operation follows the same shape: trigger something in the
//! browser, then block until a matching event arrives, the deadline passes
//! or an interrupt is delivered. [`EventWait`] owns that race.
//!
//! # Architecture
//!
//! ```text
//!   subscribe(event) ──► action() ──► spawn ┬─ timer     ── DeadlineExceeded ─┐
//!                                           ├─ listener  ── EventMatched ─────┼─► rendezvous ─► first wins
//!                                           └─ interrupt ── Interrupted ──────┘      (cap 3)
//! ```
//!
//! Senders use `try_send` on a channel with room for every signal, so a
//! losing signal never blocks. All tasks are shut down before `run`
//! returns.

use crate::channel::{ControlSession, Event};
use crate::error::{CoreError, Result};
use hc_sandbox::InterruptGate;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Room for one signal from each task.
const RENDEZVOUS_CAPACITY: usize = 3;

/// How a wait ended. Exactly one is produced per wait.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// A matching event arrived (and the settle delay has passed).
    EventMatched(T),
    /// The deadline elapsed first.
    DeadlineExceeded,
    /// An interrupt was delivered first.
    Interrupted,
}

impl<T> WaitOutcome<T> {
    /// True if the awaited event arrived.
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::EventMatched(_))
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EventMatched(_) => "matched",
            Self::DeadlineExceeded => "deadline",
            Self::Interrupted => "interrupted",
        }
    }

    /// Transform the matched payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WaitOutcome<U> {
        match self {
            Self::EventMatched(value) => WaitOutcome::EventMatched(f(value)),
            Self::DeadlineExceeded => WaitOutcome::DeadlineExceeded,
            Self::Interrupted => WaitOutcome::Interrupted,
        }
    }

    /// Matched payload, or the error a command reports otherwise.
    pub fn into_result(self, deadline: Duration) -> Result<T> {
        match self {
            Self::EventMatched(value) => Ok(value),
            Self::DeadlineExceeded => Err(CoreError::Timeout(deadline)),
            Self::Interrupted => Err(CoreError::Interrupted),
        }
    }
}

/// Result of [`EventWait::run`]: what the action returned and how the wait
/// ended.
#[derive(Debug, Clone)]
pub struct Waited<S> {
    /// Value returned by the action, e.g. the navigated frame id.
    pub subject: S,
    /// How the wait ended.
    pub outcome: WaitOutcome<Event>,
}

/// A configured wait.
#[derive(Debug, Clone)]
pub struct EventWait {
    deadline: Duration,
    settle: Duration,
    gate: Option<Arc<InterruptGate>>,
}

impl EventWait {
    /// Wait at most `deadline` for the event.
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            settle: Duration::ZERO,
            gate: None,
        }
    }

    /// Extra delay after a match, letting late side effects land.
    pub fn settle(mut self, delay: Duration) -> Self {
        self.settle = delay;
        self
    }

    /// End the wait early when `gate` delivers an interrupt.
    pub fn interruptible(mut self, gate: Arc<InterruptGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Subscribe to `event`, run `action` once, then wait for the first
    /// event accepted by `matcher`.
    ///
    /// The subscription is in place before `action` runs, so an event fired
    /// by the action itself is never missed. If `action` fails the error is
    /// returned at once, without waiting.
    pub async fn run<S, A, Fut, M>(
        &self,
        session: &dyn ControlSession,
        event: &str,
        action: A,
        matcher: M,
    ) -> Result<Waited<S>>
    where
        A: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
        S: Clone + Send + Sync + 'static,
        M: Fn(&Event, &S) -> bool + Send + 'static,
    {
        let mut events = session.subscribe(event).await?;
        let subject = action().await?;

        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel(RENDEZVOUS_CAPACITY);
        let mut tasks = JoinSet::new();

        let deadline = self.deadline;
        let timer_tx = tx.clone();
        tasks.spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = timer_tx.try_send(WaitOutcome::DeadlineExceeded);
        });

        let settle = self.settle;
        let listener_tx = tx.clone();
        let listener_subject = subject.clone();
        tasks.spawn(async move {
            while let Some(candidate) = events.next().await {
                if matcher(&candidate, &listener_subject) {
                    if !settle.is_zero() {
                        tokio::time::sleep(settle).await;
                    }
                    let _ = listener_tx.try_send(WaitOutcome::EventMatched(candidate));
                    return;
                }
            }
            tracing::trace!("Event stream closed before a match");
        });

        if let Some(gate) = self.gate.clone() {
            let interrupt_tx = tx.clone();
            tasks.spawn(async move {
                gate.interrupted().await;
                let _ = interrupt_tx.try_send(WaitOutcome::Interrupted);
            });
        }
        drop(tx);

        // The timer always sends, so the channel cannot close empty.
        let outcome = rx.recv().await.unwrap_or(WaitOutcome::DeadlineExceeded);
        tasks.shutdown().await;

        tracing::debug!(
            event = %event,
            outcome = outcome.label(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Event wait finished"
        );
        Ok(Waited { subject, outcome })
    }

    /// Wait out the deadline without watching for an event.
    ///
    /// For commands that only observe; returns early on interrupt.
    pub async fn idle(&self) -> WaitOutcome<()> {
        let timer = tokio::time::sleep(self.deadline);
        match &self.gate {
            Some(gate) => {
                tokio::select! {
                    _ = timer => WaitOutcome::DeadlineExceeded,
                    _ = gate.interrupted() => WaitOutcome::Interrupted,
                }
            }
            None => {
                timer.await;
                WaitOutcome::DeadlineExceeded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSession;
    use serde_json::{json, Value};

    const LIFECYCLE: &str = "Page.lifecycleEvent";

    fn lifecycle(name: &str, frame: &str) -> Event {
        Event::new(LIFECYCLE, json!({ "name": name, "frameId": frame }))
    }

    fn is_idle_for(event: &Event, frame: &String) -> bool {
        event.param_str("/name") == Some("networkIdle")
            && event.param_str("/frameId") == Some(frame.as_str())
    }

    async fn navigate(session: &ScriptedSession) -> Result<String> {
        session.send_command("Page.navigate", Value::Null).await?;
        Ok("F1".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_returns_after_settle_delay() {
        let session = ScriptedSession::new();
        session.emit_after("Page.navigate", Duration::from_millis(200), lifecycle("load", "F1"));
        session.emit_after("Page.navigate", Duration::from_millis(300), lifecycle("networkIdle", "F1"));

        let start = Instant::now();
        let waited = EventWait::new(Duration::from_secs(30))
            .settle(Duration::from_millis(500))
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await
            .unwrap();

        assert_eq!(waited.subject, "F1");
        assert_eq!(waited.outcome, WaitOutcome::EventMatched(lifecycle("networkIdle", "F1")));
        assert_eq!(start.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_times_out_at_deadline() {
        let session = ScriptedSession::new();
        session.emit_after("Page.navigate", Duration::from_millis(10), lifecycle("networkIdle", "OTHER"));

        let start = Instant::now();
        let waited = EventWait::new(Duration::from_secs(2))
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await
            .unwrap();

        assert_eq!(waited.outcome, WaitOutcome::DeadlineExceeded);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(matches!(
            waited.outcome.into_result(Duration::from_secs(2)),
            Err(CoreError::Timeout(d)) if d == Duration::from_secs(2)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_fired_by_action_is_not_missed() {
        let session = ScriptedSession::new();
        // Emitted synchronously while the action's command is handled.
        session.emit_after("Page.navigate", Duration::ZERO, lifecycle("networkIdle", "F1"));

        let waited = EventWait::new(Duration::from_secs(1))
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await
            .unwrap();
        assert!(waited.outcome.is_matched());
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_failure_short_circuits() {
        let session = ScriptedSession::with_handler(|method, _| {
            Err(CoreError::Navigation(format!("{method} rejected")))
        });

        let start = Instant::now();
        let result = EventWait::new(Duration::from_secs(30))
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await;

        assert!(matches!(result, Err(CoreError::Navigation(_))));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_ends_wait() {
        let session = ScriptedSession::new();
        let gate = Arc::new(InterruptGate::new());
        {
            let gate = gate.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                gate.request_interrupt();
            });
        }

        let start = Instant::now();
        let waited = EventWait::new(Duration::from_secs(30))
            .interruptible(gate)
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await
            .unwrap();

        assert_eq!(waited.outcome, WaitOutcome::Interrupted);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert!(matches!(
            waited.outcome.into_result(Duration::from_secs(30)),
            Err(CoreError::Interrupted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_leaves_deadline_in_charge() {
        let session = ScriptedSession::new();
        session.close_streams_after("Page.navigate", Duration::from_millis(50));

        let start = Instant::now();
        let waited = EventWait::new(Duration::from_secs(1))
            .run(&session, LIFECYCLE, || navigate(&session), is_idle_for)
            .await
            .unwrap();

        assert_eq!(waited.outcome, WaitOutcome::DeadlineExceeded);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_task_outlives_the_wait() {
        let session = ScriptedSession::new();
        session.emit_after("Page.navigate", Duration::from_millis(5), lifecycle("networkIdle", "F1"));

        let witness = Arc::new(());
        let held = witness.clone();
        let waited = EventWait::new(Duration::from_secs(1))
            .run(&session, LIFECYCLE, || navigate(&session), move |event, frame| {
                let _ = &held;
                is_idle_for(event, frame)
            })
            .await
            .unwrap();

        assert!(waited.outcome.is_matched());
        assert_eq!(Arc::strong_count(&witness), 1);

        // The discarded timer must not fire into anything once time moves on.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.subscriber_count(LIFECYCLE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_runs_to_deadline_or_interrupt() {
        let start = Instant::now();
        let outcome = EventWait::new(Duration::from_secs(3)).idle().await;
        assert_eq!(outcome, WaitOutcome::DeadlineExceeded);
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let gate = Arc::new(InterruptGate::new());
        gate.request_interrupt();
        let outcome = EventWait::new(Duration::from_secs(3))
            .interruptible(gate)
            .idle()
            .await;
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[test]
    fn test_outcome_map_and_label() {
        let outcome: WaitOutcome<u32> = WaitOutcome::EventMatched(2);
        assert_eq!(outcome.clone().map(|v| v * 2), WaitOutcome::EventMatched(4));
        assert_eq!(outcome.label(), "matched");
        assert_eq!(WaitOutcome::<u32>::DeadlineExceeded.map(|v| v + 1).label(), "deadline");
    }
}
