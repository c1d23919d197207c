//! Domain-specific error types for the capture-and-delivery pipeline.
//!
//! All fallible operations return `Result<T, GrabError>`. The variants are
//! grouped by who raises them and, more importantly, by how the
//! orchestrator reacts to them: see [`GrabError::is_fatal`] and
//! [`GrabError::is_device_lost`].

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for lumicast.
#[derive(Debug, Error)]
pub enum GrabError {
    // ── Capture Errors ───────────────────────────────────────────
    /// Static input is invalid (scaling factor, FPS, timeout, …).
    /// Never retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The requested adapter or monitor does not exist (yet).
    #[error("device enumeration failed: {0}")]
    DeviceEnumeration(String),

    /// The capture session was invalidated (mode change, driver reset,
    /// secure desktop, session disconnect).
    #[error("capture device lost: {0}")]
    DeviceLost(String),

    /// Any other native capture failure.
    #[error("unexpected capture failure: {0}")]
    UnexpectedCapture(String),

    // ── Network Errors ───────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A send was attempted on a client without a live connection.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// The remote server answered with an error reply.
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Encoding or decoding of a wire message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// No configured server accepted the current frame.
    #[error("frame delivery failed: {0}")]
    Delivery(String),

    // ── Orchestration Errors ─────────────────────────────────────
    /// A lifecycle transition was requested from the wrong phase.
    #[error("invalid state transition: {0}")]
    InvalidState(&'static str),

    /// The configured ceiling of full rebuilds was exceeded.
    #[error("gave up after {0} full rebuilds")]
    RetriesExhausted(u32),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl GrabError {
    /// Errors that must stop the pipeline and reach the operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GrabError::Configuration(_) | GrabError::InvalidState(_) | GrabError::RetriesExhausted(_)
        )
    }

    /// Errors that invalidate the capture session and require a full
    /// rebuild of the GPU resources.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, GrabError::DeviceLost(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GrabError {
    fn from(s: String) -> Self {
        GrabError::Other(s)
    }
}

impl From<&str> for GrabError {
    fn from(s: &str) -> Self {
        GrabError::Other(s.to_string())
    }
}

impl From<prost::DecodeError> for GrabError {
    fn from(e: prost::DecodeError) -> Self {
        GrabError::Encoding(e.to_string())
    }
}

impl From<flatbuffers::InvalidFlatbuffer> for GrabError {
    fn from(e: flatbuffers::InvalidFlatbuffer) -> Self {
        GrabError::Encoding(e.to_string())
    }
}
