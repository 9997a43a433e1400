//! Sandbox provisioning: container creation and endpoint discovery.

use crate::error::{Result, SandboxError};
use crate::gate::InterruptGate;
use crate::handle::{Endpoint, SandboxHandle};
use crate::process::ProcessRunner;
use crate::profile::resolve_security_profile;
use crate::spec::{SandboxSpec, SESSION_LABEL};
use std::sync::Arc;
use std::time::Instant;

/// Creates sandbox containers.
///
/// Creation is never retried here: every successful call starts exactly
/// one container.
pub struct Provisioner {
    spec: SandboxSpec,
    runner: Arc<dyn ProcessRunner>,
    gate: Arc<InterruptGate>,
}

impl Provisioner {
    /// Create a provisioner for `spec`.
    pub fn new(spec: SandboxSpec, runner: Arc<dyn ProcessRunner>, gate: Arc<InterruptGate>) -> Self {
        Self { spec, runner, gate }
    }

    /// Specification used for new containers.
    pub fn spec(&self) -> &SandboxSpec {
        &self.spec
    }

    /// Start a container and discover its control endpoint.
    ///
    /// The container id is recorded on `handle` as soon as creation succeeds,
    /// so a later discovery failure still leaves the handle ready for
    /// teardown.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::Configuration`] if the security profile is missing;
    ///   nothing is spawned in that case.
    /// - [`SandboxError::Provisioning`] if the container runtime fails. A
    ///   container it created but could not start is still recorded.
    /// - [`SandboxError::Internal`] if it succeeds without printing an id.
    /// - [`SandboxError::Discovery`] if the published port cannot be found.
    pub async fn create<C>(&self, handle: &mut SandboxHandle<C>) -> Result<()> {
        if handle.is_provisioned() {
            return Err(SandboxError::AlreadyProvisioned(handle.container_id().to_string()));
        }

        let profile =
            resolve_security_profile(&self.spec.security_profile, &self.spec.profile_search_dirs)?;
        let args = self.spec.run_args(&profile, &handle.session_id().to_string());

        tracing::info!(
            image = %self.spec.image,
            session_id = %handle.session_id(),
            "Creating sandbox container"
        );
        tracing::debug!(program = %self.spec.docker_bin, ?args, "Container create command");

        let start = Instant::now();
        let output = {
            let _guard = self.gate.close();
            self.runner.run(&self.spec.docker_bin, &args).await
        };
        let output = output.map_err(|e| {
            SandboxError::Provisioning(format!("failed to run {}: {e}", self.spec.docker_bin))
        })?;

        if !output.success {
            tracing::error!(error = %output.failure_summary(), "Container creation failed");
            // The daemon may have created the container before failing to
            // start it; adopt it so teardown removes it.
            let session_id = handle.session_id().to_string();
            if let Some(container_id) = self.find_session_container(&session_id).await {
                tracing::warn!(
                    container_id = %container_id,
                    "Container left behind by failed creation, recorded for teardown"
                );
                handle.set_container_id(container_id);
            }
            return Err(SandboxError::Provisioning(output.failure_summary()));
        }

        let container_id = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| {
                SandboxError::Internal("container runtime succeeded without a container id".into())
            })?;

        handle.set_container_id(container_id.clone());
        tracing::info!(
            container_id = %container_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox container created"
        );

        let endpoint = self.discover_endpoint(&container_id).await?;
        tracing::info!(container_id = %container_id, endpoint = %endpoint, "Control endpoint discovered");
        handle.set_endpoint(endpoint);
        Ok(())
    }

    async fn find_session_container(&self, session_id: &str) -> Option<String> {
        let args = vec![
            "ps".to_string(),
            "-aq".to_string(),
            "--filter".to_string(),
            format!("label={SESSION_LABEL}={session_id}"),
        ];
        match self.runner.run(&self.spec.docker_bin, &args).await {
            Ok(output) if output.success => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string),
            Ok(output) => {
                tracing::debug!(error = %output.failure_summary(), "Session container lookup failed");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Session container lookup could not run");
                None
            }
        }
    }

    async fn discover_endpoint(&self, container_id: &str) -> Result<Endpoint> {
        let args = vec![
            "port".to_string(),
            container_id.to_string(),
            format!("{}/tcp", self.spec.control_port),
        ];
        let discovery_error = |reason: String| SandboxError::Discovery {
            container_id: container_id.to_string(),
            reason,
        };

        let output = self
            .runner
            .run(&self.spec.docker_bin, &args)
            .await
            .map_err(|e| discovery_error(e.to_string()))?;

        if !output.success {
            return Err(discovery_error(output.failure_summary()));
        }
        if output.stdout.is_empty() {
            return Err(discovery_error("no published port reported".into()));
        }

        Endpoint::parse(&output.stdout)
            .ok_or_else(|| discovery_error(format!("unrecognized port mapping {:?}", output.stdout)))
    }
}
