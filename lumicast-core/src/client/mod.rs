//! # client: delivery of frames to Hyperion servers
//!
//! | Module     | Purpose                                                 |
//! |------------|---------------------------------------------------------|
//! | `link`     | Length-prefixed TCP transport with bounded operations   |
//! | `flatbuf`  | Hyperion FlatBuffers protocol (default port 19400)      |
//! | `protobuf` | Hyperion Protocol Buffers protocol (default port 19445) |
//!
//! Both protocols share the same framing and differ only in the message
//! encoding and in how a priority is claimed.

pub mod flatbuf;
pub mod link;
pub mod protobuf;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::GrabError;

pub use flatbuf::FlatBuffersClient;
pub use link::MessageLink;
pub use protobuf::ProtoBufClient;

// ── ProtocolKind ─────────────────────────────────────────────────

/// Wire protocol spoken by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    #[serde(alias = "flatbuffer")]
    FlatBuffers,
    #[serde(alias = "proto")]
    ProtoBuf,
}

impl ProtocolKind {
    pub fn default_port(self) -> u16 {
        match self {
            Self::FlatBuffers => 19400,
            Self::ProtoBuf => 19445,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlatBuffers => write!(f, "flatbuffers"),
            Self::ProtoBuf => write!(f, "protobuf"),
        }
    }
}

// ── ServerTarget ─────────────────────────────────────────────────

/// One destination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTarget {
    pub host: String,
    pub port: u16,
    /// Hyperion priority channel; lower numbers win.
    pub priority: i32,
    /// How long the server keeps each image, in milliseconds. `-1` = until
    /// replaced or cleared.
    pub duration_ms: i32,
    pub protocol: ProtocolKind,
    /// Name shown in the server's source list.
    pub origin: String,
    /// Upper bound on connect, send and reply waits.
    pub send_timeout_ms: u64,
}

impl Default for ServerTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: ProtocolKind::default().default_port(),
            priority: 150,
            duration_ms: -1,
            protocol: ProtocolKind::default(),
            origin: "lumicast".into(),
            send_timeout_ms: 2000,
        }
    }
}

impl ServerTarget {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProtocolKind) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            ..Default::default()
        }
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), GrabError> {
        if self.host.trim().is_empty() {
            return Err(GrabError::Configuration("server host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(GrabError::Configuration(format!(
                "server {} has port 0",
                self.host
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(GrabError::Configuration(format!(
                "server {} needs a send timeout above zero",
                self.address()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, priority {})", self.address(), self.protocol, self.priority)
    }
}

// ── StreamingClient ──────────────────────────────────────────────

/// A connection to one lighting server.
///
/// Every operation except `connect` fails with
/// [`GrabError::NotConnected`] while disconnected. A network failure
/// during any send drops the connection.
#[async_trait]
pub trait StreamingClient: Send {
    fn target(&self) -> &ServerTarget;

    /// Open the TCP connection. Reconnecting replaces any existing link.
    async fn connect(&mut self) -> Result<(), GrabError>;

    fn is_connected(&self) -> bool;

    /// Claim `priority` for this source.
    async fn send_registration(&mut self, priority: i32) -> Result<(), GrabError>;

    /// Send one RGB image. Returns once the message is flushed.
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), GrabError>;

    /// Ask the server to drop whatever is shown on `priority`.
    async fn send_clear_priority(&mut self, priority: i32) -> Result<(), GrabError>;

    async fn disconnect(&mut self);
}

/// Build a disconnected client for `target`.
pub fn create_client(target: &ServerTarget) -> Box<dyn StreamingClient> {
    match target.protocol {
        ProtocolKind::FlatBuffers => Box::new(FlatBuffersClient::new(target.clone())),
        ProtocolKind::ProtoBuf => Box::new(ProtoBufClient::new(target.clone())),
    }
}

// ── Tests ────────────────────────────────────────────────────────
