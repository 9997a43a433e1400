//! Error types for hc-sandbox.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hc-sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while provisioning a sandbox.
///
/// Teardown problems are deliberately absent: they are reported through
/// [`TeardownReport`](crate::TeardownReport) and never fail a command.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The seccomp profile could not be found in any search location
    #[error("security profile {name} not found (searched: {})", display_paths(.searched))]
    Configuration {
        /// Profile file name that was looked up
        name: String,
        /// Every path that was checked, in order
        searched: Vec<PathBuf>,
    },

    /// The container runtime failed to create the sandbox
    #[error("failed to create sandbox: {0}")]
    Provisioning(String),

    /// The container runtime reported success but broke its own contract
    #[error("internal error: {0}")]
    Internal(String),

    /// The sandbox started but its control endpoint could not be found
    #[error("failed to discover control endpoint of container {container_id}: {reason}")]
    Discovery {
        /// Container that is now running without a known endpoint
        container_id: String,
        /// What went wrong
        reason: String,
    },

    /// The handle already owns a container
    #[error("handle already owns container {0}")]
    AlreadyProvisioned(String),

    /// Sandbox specification failed validation
    #[error("invalid sandbox spec: {0}")]
    InvalidSpec(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
