//! Grabber service core logic.
//!
//! Runs the capture orchestrator on a dedicated `capture-worker` thread
//! with its own current-thread runtime, so the native capture handles
//! never cross threads. The caller keeps a [`ServiceHandle`] to steer and
//! await it.

use std::thread::{self, JoinHandle};

use tokio::sync::oneshot;
use tracing::{error, info};

use lumicast_core::{CaptureControl, CaptureOrchestrator, GrabError, Notifier, PipelineConfig};

// ── GrabberService ───────────────────────────────────────────────

pub struct GrabberService {
    config: PipelineConfig,
    control: CaptureControl,
    notifier: Notifier,
}

impl GrabberService {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            control: CaptureControl::default(),
            notifier: Notifier::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Handle for enabling, disabling, restarting or stopping capture from
    /// any thread.
    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    /// Validate the configuration and start the worker thread.
    pub fn spawn(self) -> Result<ServiceHandle, GrabError> {
        self.config.validate()?;
        let control = self.control.clone();
        let (done_tx, done_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("capture-worker".into())
            .spawn(move || {
                let result = self.run_worker();
                if let Err(e) = &result {
                    error!("capture worker exited: {e}");
                }
                let _ = done_tx.send(result);
            })
            .map_err(|e| GrabError::Other(format!("failed to spawn capture worker: {e}")))?;

        info!("capture worker started");
        Ok(ServiceHandle {
            control,
            done: done_rx,
            thread,
        })
    }

    fn run_worker(self) -> Result<(), GrabError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GrabError::Other(format!("failed to build worker runtime: {e}")))?;

        runtime.block_on(async move {
            let mut orchestrator =
                CaptureOrchestrator::new(self.config, self.control)?.with_notifier(self.notifier);
            orchestrator.run().await
        })
    }
}

// ── ServiceHandle ────────────────────────────────────────────────

/// A running worker.
pub struct ServiceHandle {
    control: CaptureControl,
    done: oneshot::Receiver<Result<(), GrabError>>,
    thread: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker to return. It returns on shutdown or on a fatal
    /// error.
    pub async fn wait(self) -> Result<(), GrabError> {
        let result = self
            .done
            .await
            .unwrap_or_else(|_| Err(GrabError::Other("capture worker panicked".into())));
        // The worker has already sent its result; joining does not block.
        let _ = self.thread.join();
        info!("capture worker stopped");
        result
    }

    /// Request shutdown and wait for the worker to release everything.
    pub async fn shutdown(self) -> Result<(), GrabError> {
        self.control.shutdown();
        self.wait().await
    }
}

// ── Tests ────────────────────────────────────────────────────────
