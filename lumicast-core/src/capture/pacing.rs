//! Frame pacing.
//!
//! The pacer remembers when the current frame started and sleeps for
//! whatever is left of the per-frame budget. A frame that overran its
//! budget is followed immediately by the next one; lost time is never
//! caught up with a burst.
//!
//! Time is read from the tokio clock so paused-clock tests see the same
//! budget arithmetic as production.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FramePacer {
    budget: Duration,
    frame_started: Option<Instant>,
}

impl FramePacer {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            frame_started: None,
        }
    }

    /// Pacer for `max_fps` deliveries per second (`1000 / max_fps` ms,
    /// integer division). A zero rate disables pacing.
    pub fn for_fps(max_fps: u32) -> Self {
        let budget = match max_fps {
            0 => Duration::ZERO,
            fps => Duration::from_millis(1000 / u64::from(fps)),
        };
        Self::new(budget)
    }

    /// Minimum spacing between two consecutive frames.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Record the start of a frame attempt.
    pub fn mark_frame_start(&mut self) {
        self.frame_started = Some(Instant::now());
    }

    /// Time left in the budget once `elapsed` has been spent.
    pub fn remaining_after(&self, elapsed: Duration) -> Duration {
        self.budget.saturating_sub(elapsed)
    }

    /// Time left in the budget of the current frame. Zero before the
    /// first frame.
    pub fn remaining(&self) -> Duration {
        match self.frame_started {
            Some(started) => self.remaining_after(started.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep for the remainder of the frame budget.
    pub async fn pace(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }

    /// Forget the current frame start.
    pub fn reset(&mut self) {
        self.frame_started = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────
