//! Hyperion FlatBuffers protocol.
//!
//! Schema (namespace `hyperionnet`):
//!
//! ```text
//! table Register { origin:string (required); priority:int; }
//! table RawImage { data:[ubyte]; width:int = -1; height:int = -1; }
//! union ImageType { RawImage }
//! table Image { data:ImageType (required); duration:int = -1; }
//! table Clear { priority:int; }
//! union Command { Color, Image, Clear, Register }
//! table Request { command:Command (required); }
//!
//! table Reply { error:string; video:int = -1; registered:int = -1; }
//! ```
//!
//! Tables are built and read directly with the `flatbuffers` runtime;
//! vtable slots follow the schema field order (4, 6, 8, ...).

use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use flatbuffers::{
    FlatBufferBuilder, Follow, ForwardsUOffset, InvalidFlatbuffer, Table, VOffsetT, Verifiable,
    Verifier, Vector,
};
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::client::link::MessageLink;
use crate::client::{ServerTarget, StreamingClient};
use crate::error::GrabError;

// ── Union tags ───────────────────────────────────────────────────

pub const COMMAND_COLOR: u8 = 1;
pub const COMMAND_IMAGE: u8 = 2;
pub const COMMAND_CLEAR: u8 = 3;
pub const COMMAND_REGISTER: u8 = 4;

pub const IMAGE_TYPE_RAW: u8 = 1;

// ── Encoding ─────────────────────────────────────────────────────

fn finish_request(
    mut fbb: FlatBufferBuilder<'_>,
    command_type: u8,
    command: flatbuffers::WIPOffset<flatbuffers::TableFinishedWIPOffset>,
) -> Bytes {
    let start = fbb.start_table();
    fbb.push_slot_always(RequestView::VT_COMMAND, command.as_union_value());
    fbb.push_slot::<u8>(RequestView::VT_COMMAND_TYPE, command_type, 0);
    let request = fbb.end_table(start);
    fbb.finish(request, None);
    Bytes::copy_from_slice(fbb.finished_data())
}

/// `Request { command: Register { origin, priority } }`.
pub fn encode_register(origin: &str, priority: i32) -> Bytes {
    let mut fbb = FlatBufferBuilder::with_capacity(64);
    let origin = fbb.create_string(origin);
    let start = fbb.start_table();
    fbb.push_slot_always(RegisterView::VT_ORIGIN, origin);
    fbb.push_slot::<i32>(RegisterView::VT_PRIORITY, priority, 0);
    let register = fbb.end_table(start);
    finish_request(fbb, COMMAND_REGISTER, register)
}

/// `Request { command: Image { data: RawImage { .. }, duration } }`.
pub fn encode_image(frame: &Frame, duration_ms: i32) -> Bytes {
    let mut fbb = FlatBufferBuilder::with_capacity(frame.byte_len() + 128);
    let data = fbb.create_vector(frame.data().as_ref());

    let start = fbb.start_table();
    fbb.push_slot_always(RawImageView::VT_DATA, data);
    fbb.push_slot::<i32>(RawImageView::VT_WIDTH, frame.width() as i32, -1);
    fbb.push_slot::<i32>(RawImageView::VT_HEIGHT, frame.height() as i32, -1);
    let raw = fbb.end_table(start);

    let start = fbb.start_table();
    fbb.push_slot_always(ImageView::VT_DATA, raw.as_union_value());
    fbb.push_slot::<i32>(ImageView::VT_DURATION, duration_ms, -1);
    fbb.push_slot::<u8>(ImageView::VT_DATA_TYPE, IMAGE_TYPE_RAW, 0);
    let image = fbb.end_table(start);

    finish_request(fbb, COMMAND_IMAGE, image)
}

/// `Request { command: Clear { priority } }`.
pub fn encode_clear(priority: i32) -> Bytes {
    let mut fbb = FlatBufferBuilder::with_capacity(64);
    let start = fbb.start_table();
    // Written unconditionally: priority 0 is a real channel.
    fbb.push_slot_always::<i32>(ClearView::VT_PRIORITY, priority);
    let clear = fbb.end_table(start);
    finish_request(fbb, COMMAND_CLEAR, clear)
}

// ── Table views ──────────────────────────────────────────────────

macro_rules! table_view {
    ($name:ident) => {
        #[derive(Clone, Copy)]
        struct $name<'a> {
            table: Table<'a>,
        }

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
                Self {
                    table: unsafe { Table::new(buf, loc) },
                }
            }
        }
    };
    // Schema-only tables: slot offsets and verification, read through a
    // plain `Table` when decoding.
    (marker $name:ident) => {
        #[derive(Clone, Copy)]
        struct $name<'a>(PhantomData<&'a [u8]>);

        impl<'a> Follow<'a> for $name<'a> {
            type Inner = $name<'a>;

            unsafe fn follow(_buf: &'a [u8], _loc: usize) -> Self::Inner {
                Self(PhantomData)
            }
        }
    };
}

table_view!(RequestView);
table_view!(marker RegisterView);
table_view!(marker ImageView);
table_view!(marker RawImageView);
table_view!(marker ClearView);
table_view!(ReplyView);

impl RequestView<'_> {
    const VT_COMMAND_TYPE: VOffsetT = 4;
    const VT_COMMAND: VOffsetT = 6;
}

impl RegisterView<'_> {
    const VT_ORIGIN: VOffsetT = 4;
    const VT_PRIORITY: VOffsetT = 6;
}

impl ImageView<'_> {
    const VT_DATA_TYPE: VOffsetT = 4;
    const VT_DATA: VOffsetT = 6;
    const VT_DURATION: VOffsetT = 8;
}

impl RawImageView<'_> {
    const VT_DATA: VOffsetT = 4;
    const VT_WIDTH: VOffsetT = 6;
    const VT_HEIGHT: VOffsetT = 8;
}

impl ClearView<'_> {
    const VT_PRIORITY: VOffsetT = 4;
}

impl ReplyView<'_> {
    const VT_ERROR: VOffsetT = 4;
    const VT_VIDEO: VOffsetT = 6;
    const VT_REGISTERED: VOffsetT = 8;
}

impl Verifiable for RegisterView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("origin", Self::VT_ORIGIN, true)?
            .visit_field::<i32>("priority", Self::VT_PRIORITY, false)?
            .finish();
        Ok(())
    }
}

impl Verifiable for RawImageView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<Vector<'_, u8>>>("data", Self::VT_DATA, false)?
            .visit_field::<i32>("width", Self::VT_WIDTH, false)?
            .visit_field::<i32>("height", Self::VT_HEIGHT, false)?
            .finish();
        Ok(())
    }
}

impl Verifiable for ImageView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_union::<u8, _>(
                "data_type",
                Self::VT_DATA_TYPE,
                "data",
                Self::VT_DATA,
                true,
                |key, v, pos| match key {
                    IMAGE_TYPE_RAW => v
                        .verify_union_variant::<ForwardsUOffset<RawImageView<'_>>>(
                            "ImageType::RawImage",
                            pos,
                        ),
                    _ => Ok(()),
                },
            )?
            .visit_field::<i32>("duration", Self::VT_DURATION, false)?
            .finish();
        Ok(())
    }
}

impl Verifiable for ClearView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<i32>("priority", Self::VT_PRIORITY, false)?
            .finish();
        Ok(())
    }
}

impl Verifiable for RequestView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_union::<u8, _>(
                "command_type",
                Self::VT_COMMAND_TYPE,
                "command",
                Self::VT_COMMAND,
                true,
                |key, v, pos| match key {
                    COMMAND_IMAGE => {
                        v.verify_union_variant::<ForwardsUOffset<ImageView<'_>>>("Command::Image", pos)
                    }
                    COMMAND_CLEAR => {
                        v.verify_union_variant::<ForwardsUOffset<ClearView<'_>>>("Command::Clear", pos)
                    }
                    COMMAND_REGISTER => v
                        .verify_union_variant::<ForwardsUOffset<RegisterView<'_>>>(
                            "Command::Register",
                            pos,
                        ),
                    _ => Ok(()),
                },
            )?
            .finish();
        Ok(())
    }
}

impl Verifiable for ReplyView<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("error", Self::VT_ERROR, false)?
            .visit_field::<i32>("video", Self::VT_VIDEO, false)?
            .visit_field::<i32>("registered", Self::VT_REGISTERED, false)?
            .finish();
        Ok(())
    }
}

// ── Decoding ─────────────────────────────────────────────────────

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub error: Option<String>,
    /// Video mode broadcast, `-1` when absent.
    pub video: i32,
    /// Priority acknowledged by a registration, `-1` when absent.
    pub registered: i32,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            error: None,
            video: -1,
            registered: -1,
        }
    }
}

impl Reply {
    pub fn decode(buf: &[u8]) -> Result<Self, GrabError> {
        let view = flatbuffers::root::<ReplyView>(buf)?;
        // SAFETY: the buffer was verified by `root`.
        unsafe {
            Ok(Self {
                error: view
                    .table
                    .get::<ForwardsUOffset<&str>>(ReplyView::VT_ERROR, None)
                    .map(str::to_string),
                video: view.table.get::<i32>(ReplyView::VT_VIDEO, Some(-1)).unwrap_or(-1),
                registered: view
                    .table
                    .get::<i32>(ReplyView::VT_REGISTERED, Some(-1))
                    .unwrap_or(-1),
            })
        }
    }

    /// Encode a reply the way a server would.
    pub fn encode(&self) -> Bytes {
        let mut fbb = FlatBufferBuilder::with_capacity(64);
        let error = self.error.as_deref().map(|e| fbb.create_string(e));
        let start = fbb.start_table();
        if let Some(error) = error {
            fbb.push_slot_always(ReplyView::VT_ERROR, error);
        }
        fbb.push_slot::<i32>(ReplyView::VT_VIDEO, self.video, -1);
        fbb.push_slot::<i32>(ReplyView::VT_REGISTERED, self.registered, -1);
        let reply = fbb.end_table(start);
        fbb.finish(reply, None);
        Bytes::copy_from_slice(fbb.finished_data())
    }
}

/// A decoded client request, as a server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register {
        origin: String,
        priority: i32,
    },
    Image {
        width: i32,
        height: i32,
        data: Vec<u8>,
        duration: i32,
    },
    Clear {
        priority: i32,
    },
    /// Any other union member, by tag.
    Other(u8),
}

/// Decode a `Request` message.
pub fn decode_request(buf: &[u8]) -> Result<Command, GrabError> {
    let request = flatbuffers::root::<RequestView>(buf)?;
    // SAFETY: `root` verified the request and the union member its tag
    // names.
    unsafe {
        let tag = request
            .table
            .get::<u8>(RequestView::VT_COMMAND_TYPE, Some(0))
            .unwrap_or(0);
        let body = request
            .table
            .get::<ForwardsUOffset<Table<'_>>>(RequestView::VT_COMMAND, None)
            .ok_or_else(|| GrabError::Encoding("request carries no command".into()))?;

        let command = match tag {
            COMMAND_REGISTER => Command::Register {
                origin: body
                    .get::<ForwardsUOffset<&str>>(RegisterView::VT_ORIGIN, None)
                    .unwrap_or_default()
                    .to_string(),
                priority: body.get::<i32>(RegisterView::VT_PRIORITY, Some(0)).unwrap_or(0),
            },
            COMMAND_CLEAR => Command::Clear {
                priority: body.get::<i32>(ClearView::VT_PRIORITY, Some(0)).unwrap_or(0),
            },
            COMMAND_IMAGE => {
                let duration = body.get::<i32>(ImageView::VT_DURATION, Some(-1)).unwrap_or(-1);
                let image_type = body.get::<u8>(ImageView::VT_DATA_TYPE, Some(0)).unwrap_or(0);
                if image_type != IMAGE_TYPE_RAW {
                    return Err(GrabError::Encoding(format!(
                        "unsupported image type {image_type}"
                    )));
                }
                let raw = body
                    .get::<ForwardsUOffset<Table<'_>>>(ImageView::VT_DATA, None)
                    .ok_or_else(|| GrabError::Encoding("image carries no data".into()))?;
                Command::Image {
                    width: raw.get::<i32>(RawImageView::VT_WIDTH, Some(-1)).unwrap_or(-1),
                    height: raw.get::<i32>(RawImageView::VT_HEIGHT, Some(-1)).unwrap_or(-1),
                    data: raw
                        .get::<ForwardsUOffset<Vector<'_, u8>>>(RawImageView::VT_DATA, None)
                        .map(|v| v.bytes().to_vec())
                        .unwrap_or_default(),
                    duration,
                }
            }
            other => Command::Other(other),
        };
        Ok(command)
    }
}

// ── Client ───────────────────────────────────────────────────────

/// [`StreamingClient`] speaking the FlatBuffers protocol.
pub struct FlatBuffersClient {
    target: ServerTarget,
    link: Option<MessageLink>,
}

impl FlatBuffersClient {
    pub fn new(target: ServerTarget) -> Self {
        Self { target, link: None }
    }

    fn link(&mut self) -> Result<&mut MessageLink, GrabError> {
        self.link
            .as_mut()
            .ok_or_else(|| GrabError::NotConnected(self.target.address()))
    }

    /// Send one request; a network failure drops the link.
    async fn send(&mut self, payload: Bytes) -> Result<(), GrabError> {
        let result = self.link()?.send(payload).await;
        if result.is_err() {
            self.link = None;
        }
        result
    }

    /// Log and discard replies that arrived since the last send.
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
            match Reply::decode(&message) {
                Ok(Reply { error: Some(e), .. }) => warn!("{address} reported: {e}"),
                Ok(_) => {}
                Err(e) => debug!("{address}: undecodable reply: {e}"),
            }
        }
        Ok(())
    }

    /// Wait for the reply that answers a registration. Unrelated
    /// broadcasts (video mode) are skipped.
    async fn await_registration(&mut self, priority: i32) -> Result<(), GrabError> {
        loop {
            let link = self.link()?;
            let message = match link.recv().await {
                Ok(message) => message,
                Err(e) => {
                    self.link = None;
                    return Err(e);
                }
            };
            let reply = Reply::decode(&message)?;
            if let Some(error) = reply.error {
                return Err(GrabError::Rejected(error));
            }
            if reply.registered != -1 {
                if reply.registered != priority {
                    warn!(
                        "{} registered priority {} instead of {priority}",
                        self.target.address(),
                        reply.registered
                    );
                }
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl StreamingClient for FlatBuffersClient {
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
        self.send(encode_register(&self.target.origin, priority)).await?;
        self.await_registration(priority).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), GrabError> {
        self.send(encode_image(frame, self.target.duration_ms)).await?;
        self.drain_replies()
    }

    async fn send_clear_priority(&mut self, priority: i32) -> Result<(), GrabError> {
        self.send(encode_clear(priority)).await?;
        self.drain_replies()
    }

    async fn disconnect(&mut self) {
        if self.link.take().is_some() {
            debug!("disconnected from {}", self.target.address());
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
