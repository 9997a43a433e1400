//! Sandbox specification types.

use crate::error::SandboxError;
use std::path::PathBuf;

/// DevTools port inside the container.
pub const CONTROL_PORT: u16 = 9222;

/// Image used when none is configured.
pub const DEFAULT_IMAGE: &str = "justinribeiro/chrome-headless";

/// Label carrying the session id of every container we start.
pub const SESSION_LABEL: &str = "hc.session";

/// Seccomp profile file name looked up by default.
pub const DEFAULT_PROFILE: &str = "chrome.json";

/// Everything needed to start one sandbox container.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    /// Container image running headless Chrome.
    pub image: String,
    /// Container runtime binary (default: `docker`).
    pub docker_bin: String,
    /// Seccomp profile: a file name searched for, or an absolute path.
    pub security_profile: String,
    /// Extra directories searched after the built-in locations.
    pub profile_search_dirs: Vec<PathBuf>,
    /// DevTools port inside the container (default: 9222).
    pub control_port: u16,
    /// Memory limit in MiB.
    pub memory_mib: Option<u32>,
    /// CPU limit (e.g. 1.5).
    pub cpus: Option<f64>,
    /// Docker network to attach to.
    pub network: Option<String>,
}

impl Default for SandboxSpec {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            docker_bin: "docker".to_string(),
            security_profile: DEFAULT_PROFILE.to_string(),
            profile_search_dirs: Vec::new(),
            control_port: CONTROL_PORT,
            memory_mib: None,
            cpus: None,
            network: None,
        }
    }
}

impl SandboxSpec {
    /// Create a new spec builder.
    pub fn builder() -> SandboxSpecBuilder {
        SandboxSpecBuilder::default()
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::InvalidSpec("image is required".into()));
        }
        if self.docker_bin.trim().is_empty() {
            return Err(SandboxError::InvalidSpec("docker_bin is required".into()));
        }
        if self.security_profile.trim().is_empty() {
            return Err(SandboxError::InvalidSpec("security_profile is required".into()));
        }
        if self.control_port == 0 {
            return Err(SandboxError::InvalidSpec("control_port must be > 0".into()));
        }
        if self.memory_mib == Some(0) {
            return Err(SandboxError::InvalidSpec("memory_mib must be > 0".into()));
        }
        if let Some(cpus) = self.cpus {
            if !(cpus > 0.0) {
                return Err(SandboxError::InvalidSpec("cpus must be > 0".into()));
            }
        }
        // The control port is published to the host; these modes cannot do that.
        if let Some(network) = self.network.as_deref() {
            if matches!(network, "none" | "host") {
                return Err(SandboxError::InvalidSpec(format!(
                    "network mode {network} cannot publish the control port"
                )));
            }
        }
        Ok(())
    }

    /// Arguments for `docker run` that start one detached sandbox.
    pub(crate) fn run_args(&self, profile: &std::path::Path, session: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-p".to_string(),
            format!("127.0.0.1::{}", self.control_port),
            "--security-opt".to_string(),
            format!("seccomp={}", profile.display()),
            "--label".to_string(),
            format!("{SESSION_LABEL}={session}"),
        ];

        if let Some(mib) = self.memory_mib {
            args.push("--memory".to_string());
            args.push(format!("{mib}m"));
        }
        if let Some(cpus) = self.cpus {
            args.push("--cpus".to_string());
            args.push(cpus.to_string());
        }
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        args.push(self.image.trim().to_string());
        args
    }
}

/// Builder for SandboxSpec.
#[derive(Debug, Default)]
pub struct SandboxSpecBuilder {
    spec: SandboxSpec,
}

impl SandboxSpecBuilder {
    /// Set the container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = image.into();
        self
    }

    /// Set the container runtime binary.
    pub fn docker_bin(mut self, bin: impl Into<String>) -> Self {
        self.spec.docker_bin = bin.into();
        self
    }

    /// Set the seccomp profile name or absolute path.
    pub fn security_profile(mut self, profile: impl Into<String>) -> Self {
        self.spec.security_profile = profile.into();
        self
    }

    /// Add a directory to search for the seccomp profile.
    pub fn profile_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.profile_search_dirs.push(dir.into());
        self
    }

    /// Set the DevTools port inside the container.
    pub fn control_port(mut self, port: u16) -> Self {
        self.spec.control_port = port;
        self
    }

    /// Set the memory limit in MiB.
    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.spec.memory_mib = Some(mib);
        self
    }

    /// Set the CPU limit.
    pub fn cpus(mut self, cpus: f64) -> Self {
        self.spec.cpus = Some(cpus);
        self
    }

    /// Attach the container to a Docker network.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.spec.network = Some(network.into());
        self
    }

    /// Build a validated [`SandboxSpec`].
    pub fn build(self) -> Result<SandboxSpec, SandboxError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
