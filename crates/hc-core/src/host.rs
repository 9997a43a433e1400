//! Command host: scoped sandbox acquisition around a page command.

use crate::channel::{BrowserHandle, ControlTransport};
use crate::commands::{CommandContext, PageCommand};
use crate::config::HostConfig;
use crate::connector::Connector;
use crate::devtools::DevToolsTransport;
use crate::error::{CoreError, Result};
use futures::FutureExt;
use hc_sandbox::{
    listen_for_ctrl_c, InterruptGate, ProcessRunner, Provisioner, SystemRunner, Teardown,
    TeardownReport,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Runs page commands, each in its own sandbox.
///
/// Every [`execute`](Self::execute) call provisions a fresh container and
/// tears it down afterwards, whatever the command did.
pub struct CommandHost {
    config: HostConfig,
    provisioner: Provisioner,
    connector: Connector,
    teardown: Teardown,
    gate: Arc<InterruptGate>,
}

impl CommandHost {
    /// Create a host running real containers and DevTools sessions.
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(SystemRunner),
            Arc::new(DevToolsTransport::new()),
            Arc::new(InterruptGate::new()),
        )
    }

    /// Create a host from explicit capabilities.
    pub fn with_parts(
        config: HostConfig,
        runner: Arc<dyn ProcessRunner>,
        transport: Arc<dyn ControlTransport>,
        gate: Arc<InterruptGate>,
    ) -> Result<Self> {
        config.validate()?;

        let provisioner = Provisioner::new(config.sandbox.clone(), runner.clone(), gate.clone());
        let teardown = Teardown::new(&config.sandbox.docker_bin, runner, gate.clone());

        Ok(Self {
            config,
            provisioner,
            connector: Connector::new(transport),
            teardown,
            gate,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Gate shared by provisioning, teardown and waits.
    pub fn gate(&self) -> Arc<InterruptGate> {
        Arc::clone(&self.gate)
    }

    /// Forward Ctrl-C to this host's gate.
    pub fn listen_for_ctrl_c(&self) -> JoinHandle<()> {
        listen_for_ctrl_c(self.gate())
    }

    /// Start a container for `handle` and connect to its browser.
    ///
    /// On error the handle may still own a container; pass it to
    /// [`teardown`](Self::teardown) regardless.
    pub async fn provision_and_connect(&self, handle: &mut BrowserHandle) -> Result<()> {
        self.provisioner.create(handle).await?;
        self.connector
            .attach(handle, self.config.verbose_devtools)
            .await
    }

    /// Release everything `handle` owns. Never fails; problems are logged
    /// and reported.
    pub async fn teardown(&self, handle: &mut BrowserHandle) -> TeardownReport {
        let report = self.teardown.remove(handle).await;
        if !report.is_clean() {
            tracing::warn!(
                container_id = report.container_id.as_deref().unwrap_or_default(),
                attempts = report.attempts(),
                disconnect_error = report.disconnect_error.as_deref().unwrap_or_default(),
                "Teardown was not clean"
            );
        }
        report
    }

    /// Run `command` in a fresh sandbox.
    ///
    /// The sandbox is torn down on every exit path, panics included. The
    /// command's own error is returned; teardown problems are only logged.
    pub async fn execute(&self, command: &dyn PageCommand) -> Result<Vec<u8>> {
        let start = Instant::now();
        let mut handle = BrowserHandle::new();
        tracing::info!(
            command = command.name(),
            session_id = %handle.session_id(),
            "Executing command"
        );

        let outcome = AssertUnwindSafe(self.run_in(&mut handle, command))
            .catch_unwind()
            .await;
        let report = self.teardown(&mut handle).await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(command = command.name(), "Command panicked, sandbox torn down");
                std::panic::resume_unwind(panic);
            }
        };

        match &result {
            Ok(output) => tracing::info!(
                command = command.name(),
                bytes = output.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                clean_teardown = report.is_clean(),
                "Command completed"
            ),
            Err(e) => tracing::warn!(
                command = command.name(),
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                clean_teardown = report.is_clean(),
                "Command failed"
            ),
        }
        result
    }

    async fn run_in(&self, handle: &mut BrowserHandle, command: &dyn PageCommand) -> Result<Vec<u8>> {
        self.provision_and_connect(handle).await?;

        let session = handle.connection().ok_or_else(|| CoreError::InvalidState {
            expected: "connected sandbox".into(),
            actual: "sandbox without a control session".into(),
        })?;
        let ctx = CommandContext {
            session: session.as_dyn(),
            deadline: self.config.deadline,
            verbose: self.config.verbose,
            gate: self.gate(),
        };
        command.run(&ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Event;
    use crate::commands::HtmlCommand;
    use crate::page::LIFECYCLE_EVENT;
    use crate::testing::{FlakyTransport, ScriptedSession};
    use async_trait::async_trait;
    use hc_sandbox::testing::ScriptedRunner;
    use hc_sandbox::{ProcessOutput, SandboxError};
    use serde_json::json;
    use std::time::Duration;

    fn browser() -> Arc<ScriptedSession> {
        let session = ScriptedSession::with_handler(|method, _| match method {
            "Page.navigate" => Ok(json!({ "frameId": "F1" })),
            "Runtime.evaluate" => Ok(json!({ "result": { "value": "<html></html>" } })),
            _ => Ok(json!({})),
        });
        session.emit_after(
            "Page.navigate",
            Duration::from_millis(50),
            Event::new(LIFECYCLE_EVENT, json!({ "name": "networkIdle", "frameId": "F1" })),
        );
        Arc::new(session)
    }

    fn runner() -> Arc<ScriptedRunner> {
        let runner = ScriptedRunner::new();
        runner
            .push("run", ProcessOutput::ok("abc123\n"))
            .push("port", ProcessOutput::ok("127.0.0.1:49153\n"));
        Arc::new(runner)
    }

    fn host(runner: Arc<ScriptedRunner>, transport: FlakyTransport) -> CommandHost {
        CommandHost::with_parts(
            HostConfig {
                deadline: Duration::from_secs(5),
                ..HostConfig::default()
            },
            runner,
            Arc::new(transport),
            Arc::new(InterruptGate::new()),
        )
        .unwrap()
    }

    fn subcommands(runner: &ScriptedRunner) -> Vec<String> {
        runner.calls().into_iter().map(|call| call[1].clone()).collect()
    }

    struct Panicking;

    #[async_trait]
    impl PageCommand for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn description(&self) -> &'static str {
            "Always panics"
        }

        async fn run(&self, _ctx: &CommandContext<'_>) -> Result<Vec<u8>> {
            panic!("command bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_tears_down_after_success() {
        let runner = runner();
        let session = browser();
        let host = host(runner.clone(), FlakyTransport::with_session(0, session.clone()));

        let output = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap();

        assert_eq!(output, b"<html></html>");
        assert_eq!(subcommands(&runner), vec!["run", "port", "rm", "inspect"]);
        assert_eq!(runner.calls()[2], vec!["docker", "rm", "--force", "abc123"]);
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_error_is_reported_after_teardown() {
        let runner = runner();
        let session = Arc::new(ScriptedSession::with_handler(|method, _| match method {
            "Page.navigate" => Ok(json!({ "frameId": "F1" })),
            _ => Ok(json!({})),
        }));
        let host = host(runner.clone(), FlakyTransport::with_session(0, session.clone()));

        let err = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap_err();

        assert!(matches!(err, CoreError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(runner.calls_to("rm"), 1);
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_still_removes_container() {
        let runner = ScriptedRunner::new();
        runner
            .push("run", ProcessOutput::ok("abc123\n"))
            .push("port", ProcessOutput::failed(1, "Error: No such container"));
        let runner = Arc::new(runner);
        let transport = FlakyTransport::new(0);
        let host = host(runner.clone(), transport);

        let err = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap_err();

        assert!(matches!(err, CoreError::Sandbox(SandboxError::Discovery { .. })));
        assert_eq!(runner.calls()[2], vec!["docker", "rm", "--force", "abc123"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_port_output_then_teardown_removes_container() {
        let runner = ScriptedRunner::new();
        runner
            .push("run", ProcessOutput::ok("abc123\n"))
            .push("port", ProcessOutput::ok(""));
        let runner = Arc::new(runner);
        let transport = Arc::new(FlakyTransport::new(0));
        let host = CommandHost::with_parts(
            HostConfig::default(),
            runner.clone(),
            transport.clone(),
            Arc::new(InterruptGate::new()),
        )
        .unwrap();

        let mut handle = BrowserHandle::new();
        let err = host.provision_and_connect(&mut handle).await.unwrap_err();
        assert!(matches!(err, CoreError::Sandbox(SandboxError::Discovery { .. })));
        assert_eq!(handle.container_id(), "abc123");
        assert_eq!(transport.attempts(), 0);

        let report = host.teardown(&mut handle).await;
        assert!(report.is_clean());
        assert_eq!(report.container_id.as_deref(), Some("abc123"));
        assert_eq!(subcommands(&runner), vec!["run", "port", "rm", "inspect"]);
        assert_eq!(runner.calls()[2], vec!["docker", "rm", "--force", "abc123"]);
        assert!(!handle.needs_teardown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_still_removes_container() {
        let runner = runner();
        let host = host(runner.clone(), FlakyTransport::new(u32::MAX));

        let err = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap_err();

        assert!(matches!(err, CoreError::Connection { attempts: 5, .. }));
        assert_eq!(runner.calls_to("rm"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_failure_without_container_removes_nothing() {
        let runner = ScriptedRunner::new();
        runner.push("run", ProcessOutput::failed(125, "Unable to find image"));
        let runner = Arc::new(runner);
        let host = host(runner.clone(), FlakyTransport::new(0));

        let err = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap_err();

        assert!(matches!(err, CoreError::Sandbox(SandboxError::Provisioning(_))));
        assert_eq!(subcommands(&runner), vec!["run", "ps"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_but_unstarted_container_is_removed() {
        let runner = ScriptedRunner::new();
        runner
            .push("run", ProcessOutput::failed(125, "OCI runtime create failed"))
            .push("ps", ProcessOutput::ok("0badc0de\n"));
        let runner = Arc::new(runner);
        let host = host(runner.clone(), FlakyTransport::new(0));

        let err = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap_err();

        assert!(matches!(err, CoreError::Sandbox(SandboxError::Provisioning(_))));
        assert_eq!(runner.calls_to("rm"), 1);
        assert_eq!(runner.calls()[2], vec!["docker", "rm", "--force", "0badc0de"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_teardown_does_not_fail_command() {
        let runner = runner();
        for _ in 0..3 {
            runner.push("inspect", ProcessOutput::ok("abc123\n"));
        }
        let host = host(runner.clone(), FlakyTransport::with_session(0, browser()));

        let output = host.execute(&HtmlCommand::new("https://example.com")).await.unwrap();

        assert_eq!(output, b"<html></html>");
        assert_eq!(runner.calls_to("rm"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_command_still_tears_down() {
        let runner = runner();
        let session = Arc::new(ScriptedSession::new());
        let host = host(runner.clone(), FlakyTransport::with_session(0, session.clone()));

        let outcome = AssertUnwindSafe(host.execute(&Panicking)).catch_unwind().await;

        assert!(outcome.is_err());
        assert_eq!(runner.calls_to("rm"), 1);
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = HostConfig {
            deadline: Duration::ZERO,
            ..HostConfig::default()
        };
        let result = CommandHost::with_parts(
            config,
            Arc::new(ScriptedRunner::new()),
            Arc::new(FlakyTransport::new(0)),
            Arc::new(InterruptGate::new()),
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
