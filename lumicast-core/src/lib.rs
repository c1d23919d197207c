//! # lumicast-core
//!
//! Desktop capture and streaming pipeline for Hyperion ambient-lighting
//! servers.
//!
//! This crate contains:
//! - **Capture**: `CaptureEngine` with DXGI Desktop Duplication (GPU mip-chain
//!   downscale) and legacy GDI sessions, BGRA → RGB packing, frame pacing,
//!   monitor enumeration
//! - **Clients**: `StreamingClient` over length-prefixed TCP, speaking the
//!   Hyperion FlatBuffers or Protocol Buffers protocol
//! - **Orchestrator**: `CaptureOrchestrator`, the capture → fan-out → pace
//!   loop with its recovery state machine, and `CaptureControl`
//! - **Notify**: fire-and-forget operator notifications
//! - **Error**: `GrabError`, a typed, `thiserror`-based error hierarchy

pub mod capture;
pub mod client;
pub mod error;
pub mod notify;
pub mod orchestrator;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    AdapterInfo, CaptureDimensions, CaptureEngine, CaptureMethod, CaptureSession,
    CaptureSettings, Frame, FramePacer, OutputInfo, PixelFormat, SessionEngine, SurfaceLayout,
    create_engine, enumerate_monitors, pack_rgb,
};
pub use client::{
    FlatBuffersClient, MessageLink, ProtoBufClient, ProtocolKind, ServerTarget, StreamingClient,
    create_client,
};
pub use error::GrabError;
pub use notify::{Notification, Notifier};
pub use orchestrator::{
    CaptureControl, CaptureOrchestrator, CapturePhase, CaptureStatus, ClientFactory,
    EngineFactory, PipelineConfig, RecoveryCounter, RecoveryPolicy, StepOutcome,
};
