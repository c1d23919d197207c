//! # capture: desktop capture engines
//!
//! ```text
//!   CaptureSettings ──► CaptureEngine::initialize ──► CaptureSession::open
//!                                                         (DXGI | GDI)
//!   CaptureEngine::capture_frame ──► acquire ──► downscale ──► map ──► pack_rgb ──► Frame
//!   CaptureEngine::pace          ──► FramePacer
//! ```
//!
//! | Module     | Purpose                                                   |
//! |------------|-----------------------------------------------------------|
//! | `frame`    | `Frame`, pixel layouts and the BGRA → RGB packing rule    |
//! | `pacing`   | Frame-rate budget and sleep                               |
//! | `engine`   | `CaptureEngine` trait and the session-owning engine shell |
//! | `dxgi`     | DXGI Desktop Duplication session with mip-chain downscale |
//! | `gdi`      | Legacy GDI `StretchBlt` session                           |
//! | `monitors` | Adapter / output enumeration for configuration tooling    |

pub mod dxgi;
pub mod engine;
pub mod frame;
pub mod gdi;
pub mod monitors;
pub mod pacing;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GrabError;

pub use dxgi::DuplicationSession;
pub use engine::{CaptureEngine, CaptureSession, SessionEngine};
pub use frame::{Frame, PixelFormat, SurfaceLayout, pack_rgb};
pub use gdi::GdiSession;
pub use monitors::{AdapterInfo, OutputInfo, enumerate_monitors};
pub use pacing::FramePacer;

/// GPU-accelerated capture through DXGI Desktop Duplication.
pub type DxgiEngine = SessionEngine<DuplicationSession>;

/// Legacy GDI capture.
pub type LegacyEngine = SessionEngine<GdiSession>;

// ── CaptureMethod ────────────────────────────────────────────────

/// Which capture implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMethod {
    /// GDI screen copy. Slower, works without a D3D11 device.
    Legacy,
    /// DXGI Desktop Duplication with GPU downscaling.
    #[default]
    #[serde(alias = "desktop_duplication")]
    Dxgi,
}

impl fmt::Display for CaptureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Dxgi => write!(f, "dxgi"),
        }
    }
}

/// Build a fresh, released engine for `method`.
pub fn create_engine(method: CaptureMethod) -> Box<dyn CaptureEngine> {
    match method {
        CaptureMethod::Dxgi => Box::new(DxgiEngine::new()),
        CaptureMethod::Legacy => Box::new(LegacyEngine::new()),
    }
}

// ── CaptureSettings ──────────────────────────────────────────────

/// Inputs to [`CaptureEngine::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// DXGI adapter index (0 = first GPU).
    pub adapter_index: u32,
    /// Output index on that adapter (0 = first monitor).
    pub monitor_index: u32,
    /// Integer downscale factor; must be a power of two.
    pub scaling_factor: u32,
    /// Upper bound on delivered frames per second.
    pub max_fps: u32,
    /// How long one capture waits for new desktop content.
    pub frame_timeout_ms: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            monitor_index: 0,
            scaling_factor: 8,
            max_fps: 30,
            frame_timeout_ms: 100,
        }
    }
}

impl CaptureSettings {
    /// Reject settings no capture session can honour.
    pub fn validate(&self) -> Result<(), GrabError> {
        if !self.scaling_factor.is_power_of_two() {
            return Err(GrabError::Configuration(format!(
                "scaling factor must be a power of two, got {}",
                self.scaling_factor
            )));
        }
        if self.max_fps == 0 {
            return Err(GrabError::Configuration("max_fps must be greater than zero".into()));
        }
        if self.frame_timeout_ms == 0 {
            return Err(GrabError::Configuration(
                "frame_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Mip level holding the downscaled image: `log2(scaling_factor)`.
    pub fn mip_level(&self) -> u32 {
        self.scaling_factor.trailing_zeros()
    }

    /// Depth of the downscale texture's mip chain.
    pub fn mip_levels(&self) -> u32 {
        self.mip_level() + 1
    }

    /// Whether the GPU downscale path is needed at all.
    pub fn is_scaling(&self) -> bool {
        self.scaling_factor > 1
    }

    /// Minimum spacing between delivered frames.
    pub fn min_frame_interval(&self) -> Duration {
        FramePacer::for_fps(self.max_fps).budget()
    }
}

// ── CaptureDimensions ────────────────────────────────────────────

/// Size of the frames a session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureDimensions {
    pub width: u32,
    pub height: u32,
}

impl CaptureDimensions {
    /// Physical monitor size divided by the scaling factor (integer
    /// division). An empty display is a missing device; a factor that
    /// leaves nothing of a real display is a configuration error.
    pub fn scaled(
        physical_width: u32,
        physical_height: u32,
        scaling_factor: u32,
    ) -> Result<Self, GrabError> {
        if scaling_factor == 0 {
            return Err(GrabError::Configuration("scaling factor must be non-zero".into()));
        }
        if physical_width == 0 || physical_height == 0 {
            return Err(GrabError::DeviceEnumeration(format!(
                "display reports an empty {physical_width}x{physical_height} desktop"
            )));
        }
        let dims = Self {
            width: physical_width / scaling_factor,
            height: physical_height / scaling_factor,
        };
        if dims.width == 0 || dims.height == 0 {
            return Err(GrabError::Configuration(format!(
                "scaling factor {scaling_factor} is too large for a \
                 {physical_width}x{physical_height} display"
            )));
        }
        Ok(dims)
    }

    /// Length of a packed R,G,B frame of this size.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl fmt::Display for CaptureDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── Tests ────────────────────────────────────────────────────────
