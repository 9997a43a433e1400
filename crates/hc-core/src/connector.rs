//! Control channel connector with bounded retries.

use crate::channel::{BrowserHandle, ControlTransport};
use crate::error::{CoreError, Result};
use hc_sandbox::RetryPolicy;
use std::sync::Arc;
use std::time::Instant;

/// Attaches control sessions to provisioned sandboxes.
pub struct Connector {
    transport: Arc<dyn ControlTransport>,
    policy: RetryPolicy,
}

impl Connector {
    /// Create a connector using [`RetryPolicy::connect`].
    pub fn new(transport: Arc<dyn ControlTransport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::connect(),
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Connect `handle` to its browser.
    ///
    /// Idempotent: a handle that already carries a session is left alone.
    /// The browser needs a moment to start listening, so every attempt is
    /// preceded by the policy delay.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if no endpoint has been
    /// discovered, and [`CoreError::Connection`] with the last error once
    /// the retry budget is spent. The container id is kept either way.
    pub async fn attach(&self, handle: &mut BrowserHandle, verbose: bool) -> Result<()> {
        if handle.is_connected() {
            return Ok(());
        }
        let endpoint = handle
            .endpoint()
            .cloned()
            .ok_or_else(|| CoreError::InvalidState {
                expected: "sandbox with a discovered endpoint".into(),
                actual: if handle.is_provisioned() {
                    format!("container {} without endpoint", handle.container_id())
                } else {
                    "unprovisioned sandbox".into()
                },
            })?;

        let start = Instant::now();
        tracing::debug!(endpoint = %endpoint, "Connecting to control channel");

        let mut last = String::from("no attempt made");
        for attempt in self.policy.attempts() {
            tokio::time::sleep(self.policy.delay_for(attempt)).await;

            match self.transport.connect(&endpoint, verbose).await {
                Ok(session) => {
                    tracing::info!(
                        endpoint = %endpoint,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        attempts = attempt,
                        "Connected to control channel"
                    );
                    handle.set_connection(session);
                    return Ok(());
                }
                Err(e) => {
                    tracing::trace!(error = %e, attempt, "Connection attempt failed, retrying...");
                    last = e.to_string();
                }
            }
        }

        tracing::warn!(
            endpoint = %endpoint,
            elapsed_ms = start.elapsed().as_millis() as u64,
            attempts = self.policy.max_attempts,
            error = %last,
            "Control channel connection failed"
        );
        Err(CoreError::Connection {
            attempts: self.policy.max_attempts,
            last,
        })
    }
}
