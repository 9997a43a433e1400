//! Interrupt gate: defers external interrupts during non-retriable steps.
//!
//! Creating or force-removing a container must not be abandoned halfway,
//! otherwise the process can exit with a container it never recorded. Code
//! about to perform such a step closes the gate; an interrupt that arrives
//! meanwhile is parked and delivered once the last guard is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// What happened to an interrupt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptDelivery {
    /// Delivered immediately; waiters have been woken.
    Delivered,
    /// Parked until the current critical section ends.
    Deferred,
}

#[derive(Debug, Default)]
struct GateState {
    /// Number of live guards.
    depth: usize,
    /// An interrupt arrived while the gate was closed.
    pending: bool,
}

/// Process-wide interrupt suppression state.
///
/// Shared through an `Arc` by the provisioner, teardown, the event-wait
/// coordinator and the Ctrl-C listener.
#[derive(Debug, Default)]
pub struct InterruptGate {
    state: Mutex<GateState>,
    interrupted: AtomicBool,
    notify: Notify,
}

impl InterruptGate {
    /// Create an open gate with no interrupt recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a critical section.
    ///
    /// The gate stays closed until the returned guard (and every other
    /// outstanding guard) is dropped.
    pub fn close(&self) -> GateGuard<'_> {
        self.lock().depth += 1;
        tracing::trace!("Interrupt gate closed");
        GateGuard { gate: self }
    }

    /// Whether a critical section is in progress.
    pub fn is_closed(&self) -> bool {
        self.lock().depth > 0
    }

    /// Whether an interrupt has been delivered.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Request an interrupt, deferring it if the gate is closed.
    pub fn request_interrupt(&self) -> InterruptDelivery {
        {
            let mut state = self.lock();
            if state.depth > 0 {
                state.pending = true;
                return InterruptDelivery::Deferred;
            }
        }
        self.deliver();
        InterruptDelivery::Delivered
    }

    /// Wait until an interrupt has been delivered.
    ///
    /// Returns immediately if one already was.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let deliver = {
            let mut state = self.lock();
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 && state.pending {
                state.pending = false;
                true
            } else {
                false
            }
        };
        tracing::trace!("Interrupt gate released");
        if deliver {
            tracing::info!("Delivering interrupt deferred during critical section");
            self.deliver();
        }
    }

    fn deliver(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reopens the gate when dropped, on every exit path including unwinding.
#[must_use = "the gate reopens as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a InterruptGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Forward process Ctrl-C presses into the gate.
///
/// Runs until the signal handler cannot be installed.
pub fn listen_for_ctrl_c(gate: Arc<InterruptGate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            match gate.request_interrupt() {
                InterruptDelivery::Delivered => tracing::info!("Interrupt requested"),
                InterruptDelivery::Deferred => {
                    tracing::info!("Interrupt deferred until the sandbox critical section ends")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gate_starts_open() {
        let gate = InterruptGate::new();
        assert!(!gate.is_closed());
        assert!(!gate.is_interrupted());
    }

    #[test]
    fn test_guard_reopens_on_drop() {
        let gate = InterruptGate::new();
        {
            let _guard = gate.close();
            assert!(gate.is_closed());
        }
        assert!(!gate.is_closed());
    }

    #[test]
    fn test_nested_guards() {
        let gate = InterruptGate::new();
        let outer = gate.close();
        let inner = gate.close();
        drop(inner);
        assert!(gate.is_closed());
        drop(outer);
        assert!(!gate.is_closed());
    }

    #[test]
    fn test_interrupt_delivered_when_open() {
        let gate = InterruptGate::new();
        assert_eq!(gate.request_interrupt(), InterruptDelivery::Delivered);
        assert!(gate.is_interrupted());
    }

    #[test]
    fn test_interrupt_deferred_while_closed() {
        let gate = InterruptGate::new();
        let guard = gate.close();
        assert_eq!(gate.request_interrupt(), InterruptDelivery::Deferred);
        assert!(!gate.is_interrupted());

        drop(guard);
        assert!(gate.is_interrupted());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let gate = InterruptGate::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = gate.close();
            panic!("container creation blew up");
        }));
        assert!(result.is_err());
        assert!(!gate.is_closed());
    }

    #[tokio::test]
    async fn test_interrupted_wakes_waiter() {
        let gate = Arc::new(InterruptGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.interrupted().await })
        };

        tokio::task::yield_now().await;
        gate.request_interrupt();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn test_interrupted_returns_when_already_delivered() {
        let gate = InterruptGate::new();
        gate.request_interrupt();
        tokio::time::timeout(Duration::from_millis(100), gate.interrupted())
            .await
            .expect("should return immediately");
    }
}
