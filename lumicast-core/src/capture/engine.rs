//! The capture capability and its session-owning implementation.
//!
//! A [`CaptureEngine`] is what the orchestrator drives. The platform work
//! lives in a [`CaptureSession`]: one owning value holding every native
//! resource, acquired transactionally by `open` and released by `Drop`.
//! [`SessionEngine`] wraps a session with the policies that are the same
//! for every backend: settings validation, "repeat the last frame on
//! timeout", invalidation on device loss, and pacing.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capture::frame::Frame;
use crate::capture::pacing::FramePacer;
use crate::capture::{CaptureDimensions, CaptureSettings};
use crate::error::GrabError;

// ── CaptureEngine ────────────────────────────────────────────────

/// Screen capture as seen by the orchestrator.
///
/// Engines are owned by a single worker and are not required to be
/// `Send`: native handles never leave the thread that created them.
#[async_trait(?Send)]
pub trait CaptureEngine {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Tear down any existing session and build a new one.
    ///
    /// A failed call leaves the engine released.
    fn initialize(&mut self, settings: &CaptureSettings) -> Result<CaptureDimensions, GrabError>;

    /// Wait up to the configured timeout for a new frame.
    ///
    /// A timeout repeats the previous frame. Device loss releases the
    /// session and returns [`GrabError::DeviceLost`]; recovering from it is
    /// the caller's job.
    fn capture_frame(&mut self) -> Result<Frame, GrabError>;

    /// Sleep for what is left of the frame budget, measured from the
    /// start of the last [`capture_frame`](Self::capture_frame).
    async fn pace(&self);

    /// Drop every native resource. Safe to call repeatedly.
    fn release(&mut self);

    /// Whether the engine holds no live session.
    fn is_released(&self) -> bool;

    /// Frame size of the live session.
    fn dimensions(&self) -> Option<CaptureDimensions>;
}

// ── CaptureSession ───────────────────────────────────────────────

/// A complete set of native capture resources.
///
/// Either `open` returns a fully built session or nothing is left
/// behind. Resources are released when the value is dropped.
pub trait CaptureSession: Sized {
    /// Backend name for logs.
    const NAME: &'static str;

    /// Acquire every resource for `settings`. Settings are already
    /// validated.
    fn open(settings: &CaptureSettings) -> Result<Self, GrabError>;

    /// Size of the frames this session produces.
    fn dimensions(&self) -> CaptureDimensions;

    /// Capture one frame. `Ok(None)` means no new content arrived within
    /// `timeout_ms`.
    fn acquire(&mut self, timeout_ms: u32) -> Result<Option<Frame>, GrabError>;
}

// ── SessionEngine ────────────────────────────────────────────────

/// [`CaptureEngine`] over any [`CaptureSession`].
pub struct SessionEngine<S> {
    session: Option<S>,
    timeout_ms: u32,
    last_frame: Option<Frame>,
    pacer: FramePacer,
}

impl<S: CaptureSession> SessionEngine<S> {
    /// A released engine. Call [`CaptureEngine::initialize`] before
    /// capturing.
    pub fn new() -> Self {
        Self {
            session: None,
            timeout_ms: 0,
            last_frame: None,
            pacer: FramePacer::new(std::time::Duration::ZERO),
        }
    }

    /// The frame a timeout would repeat.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }
}

impl<S: CaptureSession> Default for SessionEngine<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl<S: CaptureSession> CaptureEngine for SessionEngine<S> {
    fn name(&self) -> &'static str {
        S::NAME
    }

    fn initialize(&mut self, settings: &CaptureSettings) -> Result<CaptureDimensions, GrabError> {
        self.release();
        settings.validate()?;

        let session = S::open(settings)?;
        let dims = session.dimensions();

        self.pacer = FramePacer::for_fps(settings.max_fps);
        self.timeout_ms = settings.frame_timeout_ms;
        self.last_frame = Some(Frame::black(dims));
        self.session = Some(session);

        info!(
            "{} capture ready: adapter {} monitor {} → {dims} (scale 1/{}, ≤{} fps)",
            S::NAME,
            settings.adapter_index,
            settings.monitor_index,
            settings.scaling_factor,
            settings.max_fps
        );
        Ok(dims)
    }

    fn capture_frame(&mut self) -> Result<Frame, GrabError> {
        self.pacer.mark_frame_start();

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| GrabError::DeviceLost("capture session is released".into()))?;

        match session.acquire(self.timeout_ms) {
            Ok(Some(frame)) => {
                self.last_frame = Some(frame.clone());
                Ok(frame)
            }
            Ok(None) => {
                debug!("no new desktop content; repeating last frame");
                self.last_frame
                    .clone()
                    .ok_or_else(|| GrabError::UnexpectedCapture("no frame to repeat".into()))
            }
            Err(e) if e.is_device_lost() => {
                warn!("{} session invalidated: {e}", S::NAME);
                self.session = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn pace(&self) {
        self.pacer.pace().await;
    }

    fn release(&mut self) {
        if self.session.take().is_some() {
            debug!("{} session released", S::NAME);
        }
        self.last_frame = None;
        self.pacer.reset();
    }

    fn is_released(&self) -> bool {
        self.session.is_none()
    }

    fn dimensions(&self) -> Option<CaptureDimensions> {
        self.session.as_ref().map(CaptureSession::dimensions)
    }
}

// ── Tests ────────────────────────────────────────────────────────
