//! Host configuration.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use crate::error::{CoreError, Result};
use hc_sandbox::SandboxSpec;
use std::time::Duration;

/// Default time budget for a command's awaited event.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Configuration for a [`CommandHost`](crate::CommandHost).
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// How sandboxes are started.
    pub sandbox: SandboxSpec,

    /// Time budget for the awaited event (default: 30s).
    pub deadline: Duration,

    /// Log command progress at `info` level.
    pub verbose: bool,

    /// Log every DevTools frame.
    pub verbose_devtools: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSpec::default(),
            deadline: DEFAULT_DEADLINE,
            verbose: false,
            verbose_devtools: false,
        }
    }
}

impl HostConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HC_DOCKER_IMAGE` | `justinribeiro/chrome-headless` |
    /// | `HC_DOCKER_BIN` | `docker` |
    /// | `HC_SECCOMP_PROFILE` | `chrome.json` |
    /// | `HC_DEADLINE_SECS` | `30` |
    /// | `HC_VERBOSE` | `false` |
    /// | `HC_VERBOSE_DEVTOOLS` | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let flag = |name: &str| lookup(name).map(|v| v != "false" && v != "0" && !v.is_empty());

        let mut sandbox = default.sandbox;
        if let Some(image) = lookup("HC_DOCKER_IMAGE") {
            sandbox.image = image;
        }
        if let Some(bin) = lookup("HC_DOCKER_BIN") {
            sandbox.docker_bin = bin;
        }
        if let Some(profile) = lookup("HC_SECCOMP_PROFILE") {
            sandbox.security_profile = profile;
        }

        Self {
            sandbox,
            deadline: lookup("HC_DEADLINE_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.deadline),
            verbose: flag("HC_VERBOSE").unwrap_or(default.verbose),
            verbose_devtools: flag("HC_VERBOSE_DEVTOOLS").unwrap_or(default.verbose_devtools),
        }
    }

    /// Check the configuration before starting anything.
    pub fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() {
            return Err(CoreError::Config("deadline must be greater than zero".into()));
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(CoreError::Config("docker image must not be empty".into()));
        }
        self.sandbox.validate()?;
        Ok(())
    }
}
