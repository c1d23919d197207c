//! Framed TCP link shared by both Hyperion clients.
//!
//! Every message carries a 4-byte big-endian length prefix. Connect, send
//! and receive are each bounded by the server's send timeout. Clients drop
//! the link after any failure.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::error::GrabError;

/// Largest message either side may send (64 MiB).
pub const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

/// Length-prefixed framing shared by both Hyperion protocols: a 4-byte
/// big-endian length followed by the serialized message.
pub fn hyperion_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_MESSAGE_LEN)
        .new_codec()
}

/// One framed TCP connection to a Hyperion server.
///
/// Every network operation is bounded by the same timeout so a stalled
/// server cannot hold up the caller longer than that.
#[derive(Debug)]
pub struct MessageLink {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: String,
    timeout: Duration,
}

impl MessageLink {
    pub async fn connect(address: &str, op_timeout: Duration) -> Result<Self, GrabError> {
        let stream = match timeout(op_timeout, TcpStream::connect(address)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(GrabError::Timeout(op_timeout)),
        };
        stream.set_nodelay(true)?;
        debug!("connected to {address}");

        Ok(Self {
            framed: Framed::new(stream, hyperion_codec()),
            peer: address.to_string(),
            timeout: op_timeout,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one message and flush it.
    pub async fn send(&mut self, payload: Bytes) -> Result<(), GrabError> {
        match timeout(self.timeout, self.framed.send(payload)).await {
            Ok(result) => result.map_err(GrabError::from),
            Err(_) => Err(GrabError::Timeout(self.timeout)),
        }
    }

    /// Wait for the next message from the server.
    pub async fn recv(&mut self) -> Result<BytesMut, GrabError> {
        match timeout(self.timeout, self.framed.next()).await {
            Ok(Some(message)) => Ok(message?),
            Ok(None) => Err(closed(&self.peer)),
            Err(_) => Err(GrabError::Timeout(self.timeout)),
        }
    }

    /// Collect every message that has already arrived, without waiting.
    pub fn drain_ready(&mut self) -> Result<Vec<BytesMut>, GrabError> {
        let mut ready = Vec::new();
        loop {
            match self.framed.next().now_or_never() {
                Some(Some(message)) => ready.push(message?),
                Some(None) => return Err(closed(&self.peer)),
                None => return Ok(ready),
            }
        }
    }
}

fn closed(peer: &str) -> GrabError {
    GrabError::Connection(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{peer} closed the connection"),
    ))
}
