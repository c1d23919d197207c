//! Lifecycle phases of the capture pipeline.
//!
//! Transitions are validated and return `Result` instead of panicking;
//! an invalid one is a programming error surfaced as
//! [`GrabError::InvalidState`].

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::GrabError;

// ── CapturePhase ─────────────────────────────────────────────────

/// Where the orchestrator is in its recovery state machine.
///
/// ```text
///   Idle ──► Capturing ──► PausedForDeviceLoss ───────┐
///    │           │   └───► PausedForRepeatedFailure ──┤
///    │           │                                    │
///    │           ▼           (rebuild succeeds)       │
///    │        Stopped        Capturing ◄──────────────┘
///    └──────────► ▲  │
///        (disable, give up, fatal error)
///                    └──► Idle (resume)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CapturePhase {
    /// Nothing built yet. Initial state.
    #[default]
    Idle,

    /// Session and clients are live; frames are flowing.
    Capturing {
        /// When capture last (re)started.
        since: Instant,
    },

    /// Everything was released after the capture device went away.
    PausedForDeviceLoss,

    /// Everything was released after too many consecutive faults.
    PausedForRepeatedFailure,

    /// Disabled by the operator or stopped by an unrecoverable error.
    Stopped,
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Capturing { .. } => write!(f, "Capturing"),
            Self::PausedForDeviceLoss => write!(f, "PausedForDeviceLoss"),
            Self::PausedForRepeatedFailure => write!(f, "PausedForRepeatedFailure"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl CapturePhase {
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::PausedForDeviceLoss | Self::PausedForRepeatedFailure)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// How long the pipeline has been capturing without interruption.
    pub fn capturing_duration(&self) -> Option<Duration> {
        match self {
            Self::Capturing { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Capturing` after a successful build.
    ///
    /// Valid from: `Idle`, `Stopped`, either paused phase.
    pub fn begin_capture(&mut self) -> Result<(), GrabError> {
        match self {
            Self::Capturing { .. } => Err(GrabError::InvalidState(
                "cannot begin capture: already capturing",
            )),
            _ => {
                *self = Self::Capturing {
                    since: Instant::now(),
                };
                Ok(())
            }
        }
    }

    /// Transition to `PausedForDeviceLoss`.
    ///
    /// Valid from: `Capturing`, `Idle`, either paused phase (the loss can
    /// happen while a rebuild is still in progress).
    pub fn pause_for_device_loss(&mut self) -> Result<(), GrabError> {
        match self {
            Self::Stopped => Err(GrabError::InvalidState(
                "cannot pause for device loss: pipeline is stopped",
            )),
            _ => {
                *self = Self::PausedForDeviceLoss;
                Ok(())
            }
        }
    }

    /// Transition to `PausedForRepeatedFailure`.
    ///
    /// Valid from: `Capturing`, `Idle`, either paused phase.
    pub fn pause_for_repeated_failure(&mut self) -> Result<(), GrabError> {
        match self {
            Self::Stopped => Err(GrabError::InvalidState(
                "cannot pause for repeated failure: pipeline is stopped",
            )),
            _ => {
                *self = Self::PausedForRepeatedFailure;
                Ok(())
            }
        }
    }

    /// Force `Stopped` regardless of the current phase.
    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }

    /// Leave `Stopped` for `Idle` when capture is enabled again. No-op in
    /// any other phase.
    pub fn resume(&mut self) {
        if self.is_stopped() {
            *self = Self::Idle;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
