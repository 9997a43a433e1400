//! Sandbox teardown: disconnect, force-remove, confirm.
//!
//! Teardown never fails. Whatever goes wrong is logged and described in the
//! returned [`TeardownReport`], so a cleanup problem cannot hide the outcome
//! of the command that used the sandbox.

use crate::gate::InterruptGate;
use crate::handle::SandboxHandle;
use crate::process::ProcessRunner;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// Error returned by a failed disconnect.
pub type DisconnectError = Box<dyn std::error::Error + Send + Sync>;

/// Closes a live control connection.
#[async_trait]
pub trait Disconnect: Send + Sync {
    /// Close the connection. Called at most once per connection.
    async fn disconnect(&self) -> Result<(), DisconnectError>;
}

/// What happened to the container during teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Removal {
    /// The handle owned no container.
    #[default]
    NotProvisioned,
    /// The container is confirmed gone.
    Removed {
        /// Removal attempts used.
        attempts: u32,
    },
    /// The container was still present when the retry budget ran out.
    Incomplete {
        /// Removal attempts used.
        attempts: u32,
        /// Last observed problem.
        reason: String,
    },
}

/// Outcome of [`Teardown::remove`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Container that was removed, if the handle owned one.
    pub container_id: Option<String>,
    /// Error returned while closing the control connection.
    pub disconnect_error: Option<String>,
    /// Container removal result.
    pub removal: Removal,
}

impl TeardownReport {
    /// True if nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.disconnect_error.is_none() && !matches!(self.removal, Removal::Incomplete { .. })
    }

    /// Removal attempts made.
    pub fn attempts(&self) -> u32 {
        match self.removal {
            Removal::NotProvisioned => 0,
            Removal::Removed { attempts } | Removal::Incomplete { attempts, .. } => attempts,
        }
    }
}

/// Removes sandbox containers.
pub struct Teardown {
    docker_bin: String,
    runner: Arc<dyn ProcessRunner>,
    gate: Arc<InterruptGate>,
    policy: RetryPolicy,
}

impl Teardown {
    /// Create a teardown using [`RetryPolicy::removal`].
    pub fn new(
        docker_bin: impl Into<String>,
        runner: Arc<dyn ProcessRunner>,
        gate: Arc<InterruptGate>,
    ) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            runner,
            gate,
            policy: RetryPolicy::removal(),
        }
    }

    /// Override the removal retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Disconnect and remove everything `handle` owns.
    ///
    /// Safe on handles that were never provisioned, and idempotent: on
    /// return the handle holds neither a connection nor a container id.
    pub async fn remove<C: Disconnect>(&self, handle: &mut SandboxHandle<C>) -> TeardownReport {
        let _guard = self.gate.close();
        let mut report = TeardownReport::default();

        if let Some(connection) = handle.take_connection() {
            tracing::debug!(session_id = %handle.session_id(), "Disconnecting control channel");
            if let Err(e) = connection.disconnect().await {
                tracing::warn!(error = %e, "Failed to disconnect control channel, continuing teardown");
                report.disconnect_error = Some(e.to_string());
            }
        }

        if !handle.is_provisioned() {
            return report;
        }

        let container_id = handle.take_container();
        report.removal = self.remove_container(&container_id).await;
        report.container_id = Some(container_id);
        report
    }

    async fn remove_container(&self, container_id: &str) -> Removal {
        tracing::info!(container_id = %container_id, "Removing sandbox container");
        let mut reason = String::from("no removal attempted");

        for attempt in self.policy.attempts() {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
            }

            let rm = self.docker(&["rm", "--force", container_id]).await;
            match &rm {
                Ok(output) if !output.success => {
                    tracing::debug!(attempt, error = %output.failure_summary(), "Forced removal failed")
                }
                Err(e) => tracing::debug!(attempt, error = %e, "Forced removal could not run"),
                Ok(_) => {}
            }

            // A failing existence check means the container is gone.
            match self.docker(&["inspect", "--format", "{{.Id}}", container_id]).await {
                Ok(output) if output.success => {
                    tracing::debug!(container_id = %container_id, attempt, "Container still present");
                    reason = match rm {
                        Ok(output) if !output.success => output.failure_summary(),
                        Err(e) => e.to_string(),
                        Ok(_) => "container still present after forced removal".to_string(),
                    };
                }
                _ => {
                    tracing::info!(container_id = %container_id, attempts = attempt, "Sandbox container removed");
                    return Removal::Removed { attempts: attempt };
                }
            }
        }

        tracing::warn!(
            container_id = %container_id,
            attempts = self.policy.max_attempts,
            reason = %reason,
            "Sandbox container removal incomplete, container may be leaked"
        );
        Removal::Incomplete {
            attempts: self.policy.max_attempts,
            reason,
        }
    }

    async fn docker(&self, args: &[&str]) -> std::io::Result<crate::process::ProcessOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(&self.docker_bin, &args).await
    }
}
