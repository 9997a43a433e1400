//! Error types for hc-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for hc-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while driving a sandboxed browser.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from hc-sandbox
    #[error(transparent)]
    Sandbox(#[from] hc_sandbox::SandboxError),

    /// Control channel could not be established within the retry budget
    #[error("failed to connect to control channel after {attempts} attempts: {last}")]
    Connection {
        /// Attempts made
        attempts: u32,
        /// Last connection error
        last: String,
    },

    /// Deadline elapsed without the awaited event
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// An interrupt was delivered while waiting
    #[error("interrupted")]
    Interrupted,

    /// Error response from the browser
    #[error("protocol error {code}: {message}")]
    Protocol {
        /// Error code from the browser
        code: i64,
        /// Error message from the browser
        message: String,
    },

    /// The awaited event arrived but its payload could not be captured
    #[error("capture failed: {0}")]
    Capture(String),

    /// Script evaluation threw an exception
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Navigation was rejected by the browser
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Invalid handle state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The session was closed while a command was in flight
    #[error("control channel closed: {0}")]
    ChannelClosed(String),

    /// HTTP error while discovering targets
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// DevTools client error
    #[error("DevTools error: {0}")]
    Cdp(Box<chromiumoxide::error::CdpError>),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<chromiumoxide::error::CdpError> for CoreError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        match e {
            chromiumoxide::error::CdpError::Chrome(err) => Self::Protocol {
                code: err.code,
                message: err.message,
            },
            other => Self::Cdp(Box::new(other)),
        }
    }
}

impl CoreError {
    /// True for errors that end a command because time ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
