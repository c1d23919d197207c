//! Cross-thread control of a running orchestrator.
//!
//! The worker polls the flags between iterations; it is never cancelled
//! mid-frame. The [`Notify`] only shortens sleeps so a disable or restart
//! is noticed without waiting out a cooldown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::orchestrator::PipelineConfig;

#[derive(Debug)]
struct Shared {
    enabled: AtomicBool,
    restart: AtomicBool,
    shutdown: AtomicBool,
    pending_config: Mutex<Option<PipelineConfig>>,
    wake: Notify,
}

/// Cloneable handle to enable, disable, restart or shut down capture.
#[derive(Debug, Clone)]
pub struct CaptureControl {
    shared: Arc<Shared>,
}

impl Default for CaptureControl {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CaptureControl {
    pub fn new(enabled: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                enabled: AtomicBool::new(enabled),
                restart: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                pending_config: Mutex::new(None),
                wake: Notify::new(),
            }),
        }
    }

    pub fn enable(&self) {
        self.shared.enabled.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Stop capturing at the next step boundary.
    pub fn disable(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Tear everything down, wait the restart delay, then start again,
    /// optionally with a new configuration.
    pub fn restart(&self, config: Option<PipelineConfig>) {
        if let Some(config) = config {
            *self
                .shared
                .pending_config
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(config);
        }
        self.shared.restart.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Ask the worker to release everything and return.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_restart_requested(&self) -> bool {
        self.shared.restart.load(Ordering::SeqCst)
    }

    /// Consume a pending restart request and its configuration, if any.
    pub(crate) fn take_restart(&self) -> Option<Option<PipelineConfig>> {
        if !self.shared.restart.swap(false, Ordering::SeqCst) {
            return None;
        }
        let config = self
            .shared
            .pending_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Some(config)
    }

    /// Whether a running pipeline should stop what it is doing.
    pub fn interrupt_pending(&self) -> bool {
        self.is_shutdown() || self.is_restart_requested() || !self.is_enabled()
    }

    /// Sleep for `duration` unless interrupted. Returns `true` when the
    /// sleep was cut short by a control signal.
    pub async fn cooldown(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.interrupt_pending() {
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                _ = self.shared.wake.notified() => {}
            }
        }
    }

    /// Wait until capture is enabled again, a restart is requested, or
    /// shutdown begins.
    pub async fn wait_for_resume(&self) {
        loop {
            if self.is_shutdown() || self.is_restart_requested() || self.is_enabled() {
                return;
            }
            self.shared.wake.notified().await;
        }
    }
}
