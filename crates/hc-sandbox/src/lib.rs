//! # hc-sandbox
//!
//! Ephemeral sandbox management for headless Chrome.
//! Each sandbox is a Docker container started under a restrictive seccomp
//! profile, with the DevTools port published on loopback.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hc_sandbox::{InterruptGate, Provisioner, SandboxHandle, SandboxSpec, SystemRunner, Teardown};
//!
//! # #[derive(Debug)] struct NoConnection;
//! # #[async_trait::async_trait]
//! # impl hc_sandbox::Disconnect for NoConnection {
//! #     async fn disconnect(&self) -> Result<(), hc_sandbox::DisconnectError> { Ok(()) }
//! # }
//! # async fn example() -> hc_sandbox::Result<()> {
//! let gate = Arc::new(InterruptGate::new());
//! let runner = Arc::new(SystemRunner);
//! let spec = SandboxSpec::builder()
//!     .image("justinribeiro/chrome-headless")
//!     .build()?;
//!
//! let provisioner = Provisioner::new(spec.clone(), runner.clone(), gate.clone());
//! let teardown = Teardown::new(&spec.docker_bin, runner, gate);
//!
//! let mut handle: SandboxHandle<NoConnection> = SandboxHandle::new();
//! let created = provisioner.create(&mut handle).await;
//!
//! // Always tear down, even if discovery failed after the container started
//! let report = teardown.remove(&mut handle).await;
//! assert!(!handle.needs_teardown());
//! created?;
//! # let _ = report;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Provisioning**: `docker run` with a seccomp profile, then port discovery
//! - **Teardown**: disconnect plus forced removal, confirmed with bounded retries
//! - **Interrupt Gate**: defers Ctrl-C while a container is created or removed
//! - **Capability Seams**: process execution and disconnection are traits,
//!   so every lifecycle step runs against fakes in tests

mod error;
mod gate;
mod handle;
mod process;
mod profile;
mod provisioner;
mod retry;
mod spec;
mod teardown;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Result, SandboxError};
pub use gate::{listen_for_ctrl_c, GateGuard, InterruptDelivery, InterruptGate};
pub use handle::{Endpoint, SandboxHandle};
pub use process::{ProcessOutput, ProcessRunner, SystemRunner};
pub use profile::{profile_candidates, resolve_security_profile, SOURCE_PROFILE_DIR};
pub use provisioner::Provisioner;
pub use retry::{Backoff, RetryPolicy};
pub use spec::{
    SandboxSpec, SandboxSpecBuilder, CONTROL_PORT, DEFAULT_IMAGE, DEFAULT_PROFILE, SESSION_LABEL,
};
pub use teardown::{Disconnect, DisconnectError, Removal, Teardown, TeardownReport};
