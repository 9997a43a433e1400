//! Sandbox handle - one provisioned container and its control connection.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Published control endpoint of a sandbox (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address, without brackets.
    pub host: String,
    /// Published TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse the output of `docker port`.
    ///
    /// Accepts `host:port`, `[v6]:port` and the older
    /// `9222/tcp -> host:port` form. Only the first non-empty line is used.
    /// Wildcard bind addresses are rewritten to loopback.
    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
        let mapping = match line.rsplit_once("->") {
            Some((_, mapping)) => mapping.trim(),
            None => line,
        };

        let (host, port) = mapping.rsplit_once(':')?;
        let port: u16 = port.parse().ok().filter(|p| *p != 0)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = match host {
            "" | "0.0.0.0" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        Some(Self::new(host, port))
    }

    /// Host formatted for use inside a URL authority.
    pub fn url_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Base HTTP URL of the endpoint.
    pub fn http_url(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.url_host(), self.port)
    }
}

/// One provisioned sandbox.
///
/// The handle is owned by the caller from before provisioning starts, so a
/// container that was created but could not be connected to is never lost:
/// a non-empty container id means the container exists and must be torn
/// down exactly once. `C` is the live control connection, owned exclusively
/// by the handle once attached.
pub struct SandboxHandle<C> {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    container_id: String,
    endpoint: Option<Endpoint>,
    connection: Option<C>,
}

impl<C> SandboxHandle<C> {
    /// Create an empty, unprovisioned handle.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            created_at: Utc::now(),
            container_id: String::new(),
            endpoint: None,
            connection: None,
        }
    }

    /// Take ownership of an already running container.
    ///
    /// The handle becomes responsible for removing it.
    pub fn adopt(container_id: impl Into<String>, endpoint: Endpoint) -> Self {
        let mut handle = Self::new();
        handle.container_id = container_id.into();
        handle.endpoint = Some(endpoint);
        handle
    }

    /// Label attached to the container at creation.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// When the handle was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Container identifier; empty until creation succeeds.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Discovered control endpoint, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Live control connection, if attached.
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    /// True once a container has been created.
    pub fn is_provisioned(&self) -> bool {
        !self.container_id.is_empty()
    }

    /// True while a control connection is attached.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// True while the handle still owns a container or a connection.
    pub fn needs_teardown(&self) -> bool {
        self.is_provisioned() || self.is_connected()
    }

    /// Attach a live connection, replacing any previous one.
    pub fn set_connection(&mut self, connection: C) {
        self.connection = Some(connection);
    }

    /// Detach the connection, leaving the field empty.
    pub fn take_connection(&mut self) -> Option<C> {
        self.connection.take()
    }

    pub(crate) fn set_container_id(&mut self, container_id: String) {
        self.container_id = container_id;
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    /// Clear container id and endpoint, returning the id.
    pub(crate) fn take_container(&mut self) -> String {
        self.endpoint = None;
        std::mem::take(&mut self.container_id)
    }
}

impl<C> Default for SandboxHandle<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for SandboxHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("session_id", &self.session_id)
            .field("container_id", &self.container_id)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl<C> Drop for SandboxHandle<C> {
    fn drop(&mut self) {
        if self.is_provisioned() {
            tracing::warn!(
                session_id = %self.session_id,
                container_id = %self.container_id,
                "Sandbox handle dropped without teardown, container may be leaked"
            );
        }
    }
}
