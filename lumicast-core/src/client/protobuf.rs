//! Hyperion Protocol Buffers protocol.
//!
//! Messages are derived with `prost` from the legacy `message.proto`
//! (proto2). The per-command payloads are proto2 extensions of
//! `HyperionRequest`; on the wire an extension is an ordinary field, so
//! they are modelled as optional message fields with the extension tags.

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::client::link::MessageLink;
use crate::client::{ServerTarget, StreamingClient};
use crate::error::GrabError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    Color = 1,
    Image = 2,
    Clear = 3,
    ClearAll = 4,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HyperionRequest {
    #[prost(enumeration = "Command", required, tag = "1")]
    pub command: i32,
    #[prost(message, optional, tag = "11")]
    pub image_request: Option<ImageRequest>,
    #[prost(message, optional, tag = "12")]
    pub clear_request: Option<ClearRequest>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ImageRequest {
    #[prost(int32, required, tag = "1")]
    pub imagewidth: i32,
    #[prost(int32, required, tag = "2")]
    pub imageheight: i32,
    #[prost(bytes = "bytes", required, tag = "3")]
    pub imagedata: Bytes,
    #[prost(int32, required, tag = "4")]
    pub priority: i32,
    #[prost(int32, optional, tag = "5")]
    pub duration: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClearRequest {
    #[prost(int32, required, tag = "1")]
    pub priority: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HyperionReply {
    #[prost(bool, required, tag = "1")]
    pub success: bool,
    #[prost(string, optional, tag = "2")]
    pub error: Option<String>,
}

pub fn image_request(frame: &Frame, priority: i32, duration_ms: i32) -> HyperionRequest {
    HyperionRequest {
        command: Command::Image as i32,
        image_request: Some(ImageRequest {
            imagewidth: frame.width() as i32,
            imageheight: frame.height() as i32,
            imagedata: frame.data().clone(),
            priority,
            // The protocol has no "endless" value; omit the field instead.
            duration: (duration_ms > 0).then_some(duration_ms),
        }),
        clear_request: None,
    }
}

pub fn clear_request(priority: i32) -> HyperionRequest {
    HyperionRequest {
        command: Command::Clear as i32,
        image_request: None,
        clear_request: Some(ClearRequest { priority }),
    }
}

// ── Client ───────────────────────────────────────────────────────

/// [`StreamingClient`] speaking the Protocol Buffers protocol.
///
/// There is no registration message: [`send_registration`] records the
/// priority carried by subsequent images, and the first image sent
/// claims it on the server.
///
/// [`send_registration`]: StreamingClient::send_registration
pub struct ProtoBufClient {
    target: ServerTarget,
    link: Option<MessageLink>,
    priority: i32,
}

impl ProtoBufClient {
    pub fn new(target: ServerTarget) -> Self {
        let priority = target.priority;
        Self {
            target,
            link: None,
            priority,
        }
    }

    /// Priority stamped on outgoing images.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    fn link(&mut self) -> Result<&mut MessageLink, GrabError> {
        self.link
            .as_mut()
            .ok_or_else(|| GrabError::NotConnected(self.target.address()))
    }

    async fn send(&mut self, request: HyperionRequest) -> Result<(), GrabError> {
        let payload = Bytes::from(request.encode_to_vec());
        let result = self.link()?.send(payload).await;
        if result.is_err() {
            self.link = None;
        }
        result
    }

    fn drain_replies(&mut self) -> Result<(), GrabError> {
        let address = self.target.address();
        let pending = match self.link()?.drain_ready() {
            Ok(pending) => pending,
            Err(e) => {
                self.link = None;
                return Err(e);
            }
        };
        for message in pending {
            match HyperionReply::decode(message) {
                Ok(HyperionReply {
                    success: false,
                    error,
                }) => warn!(
                    "{address} reported: {}",
                    error.as_deref().unwrap_or("unspecified error")
                ),
                Ok(_) => {}
                Err(e) => debug!("{address}: undecodable reply: {e}"),
            }
        }
        Ok(())
    }

    async fn await_reply(&mut self) -> Result<(), GrabError> {
        let received = self.link()?.recv().await;
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                self.link = None;
                return Err(e);
            }
        };
        let reply = HyperionReply::decode(message)?;
        if reply.success {
            Ok(())
        } else {
            Err(GrabError::Rejected(
                reply.error.unwrap_or_else(|| "request failed".into()),
            ))
        }
    }
}

#[async_trait]
impl StreamingClient for ProtoBufClient {
    fn target(&self) -> &ServerTarget {
        &self.target
    }

    async fn connect(&mut self) -> Result<(), GrabError> {
        self.link = None;
        let link = MessageLink::connect(&self.target.address(), self.target.send_timeout()).await?;
        info!("connected to {}", self.target);
        self.link = Some(link);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    async fn send_registration(&mut self, priority: i32) -> Result<(), GrabError> {
        self.link()?;
        self.priority = priority;
        debug!("{}: using priority {priority}", self.target.address());
        Ok(())
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), GrabError> {
        self.send(image_request(frame, self.priority, self.target.duration_ms))
            .await?;
        self.drain_replies()
    }

    async fn send_clear_priority(&mut self, priority: i32) -> Result<(), GrabError> {
        // Stale image acknowledgements may still be queued ahead of ours.
        self.drain_replies()?;
        self.send(clear_request(priority)).await?;
        self.await_reply().await
    }

    async fn disconnect(&mut self) {
        if self.link.take().is_some() {
            debug!("disconnected from {}", self.target.address());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureDimensions;

    #[test]
    fn image_request_wire_fields() {
        let frame = Frame::from_rgb(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let encoded = image_request(&frame, 150, -1).encode_to_vec();
        let decoded = HyperionRequest::decode(encoded.as_slice()).unwrap();

        assert_eq!(decoded.command, Command::Image as i32);
        let image = decoded.image_request.unwrap();
        assert_eq!((image.imagewidth, image.imageheight), (2, 1));
        assert_eq!(&image.imagedata[..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(image.priority, 150);
        assert_eq!(image.duration, None);
    }

    #[test]
    fn finite_duration_is_sent() {
        let frame = Frame::black(CaptureDimensions {
            width: 1,
            height: 1,
        });
        let req = image_request(&frame, 100, 5000);
        assert_eq!(req.image_request.unwrap().duration, Some(5000));
    }

    #[test]
    fn image_request_uses_extension_tag_11() {
        let frame = Frame::black(CaptureDimensions {
            width: 1,
            height: 1,
        });
        let bytes = image_request(&frame, 1, -1).encode_to_vec();
        // field 1 varint (command = 2), then field 11 length-delimited.
        assert_eq!(&bytes[..3], &[0x08, 0x02, 0x5a]);
    }

    #[test]
    fn clear_request_wire_fields() {
        let bytes = clear_request(0).encode_to_vec();
        let decoded = HyperionRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.command, Command::Clear as i32);
        assert_eq!(decoded.clear_request, Some(ClearRequest { priority: 0 }));
    }

    #[tokio::test]
    async fn registration_records_priority() {
        let mut client = ProtoBufClient::new(ServerTarget::default());
        assert_eq!(client.priority(), 150);
        // Still requires a connection.
        assert!(matches!(
            client.send_registration(90).await,
            Err(GrabError::NotConnected(_))
        ));
        assert_eq!(client.priority(), 150);
    }
}
