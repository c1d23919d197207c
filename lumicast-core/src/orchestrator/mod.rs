//! The capture-and-delivery loop and its recovery state machine.
//!
//! [`CaptureOrchestrator`] owns one capture engine and one client per
//! configured server and drives:
//!
//! 1. build (engine `initialize`, client connect + registration + black
//!    frame),
//! 2. `capture_frame` → sequential fan-out → `pace`,
//! 3. recovery when any of that fails.
//!
//! | Fault                              | Reaction                                         |
//! |------------------------------------|--------------------------------------------------|
//! | `DeviceLost`                       | release all, device-lost cooldown, rebuild       |
//! | one client fails                   | that client reconnects after its own cooldown    |
//! | anything else recoverable          | count it; retry cooldown, or full rebuild at the threshold |
//! | `Configuration` / `InvalidState`   | release all, `Stopped`, return the error         |
//!
//! The orchestrator and its engine stay on one thread; drive it with a
//! current-thread runtime.

pub mod control;
pub mod phase;
pub mod recovery;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::{
    CaptureDimensions, CaptureEngine, CaptureMethod, CaptureSettings, Frame, create_engine,
};
use crate::client::{ServerTarget, StreamingClient, create_client};
use crate::error::GrabError;
use crate::notify::Notifier;

pub use control::CaptureControl;
pub use phase::CapturePhase;
pub use recovery::{RecoveryCounter, RecoveryPolicy};

// ── PipelineConfig ───────────────────────────────────────────────

/// Everything the orchestrator needs to build a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub method: CaptureMethod,
    pub capture: CaptureSettings,
    pub servers: Vec<ServerTarget>,
    pub recovery: RecoveryPolicy,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), GrabError> {
        self.capture.validate()?;
        self.recovery.validate()?;
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }
}

/// Builds a released engine for a capture method.
pub type EngineFactory = Box<dyn Fn(CaptureMethod) -> Box<dyn CaptureEngine>>;

/// Builds a disconnected client for a server.
pub type ClientFactory = Box<dyn Fn(&ServerTarget) -> Box<dyn StreamingClient>>;

// ── Outcomes and status ──────────────────────────────────────────

/// What one [`CaptureOrchestrator::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Built engine and clients and delivered the first frames.
    Started,
    /// Captured one frame and delivered it to `clients` servers.
    Delivered { clients: usize },
    /// A fault below the threshold; slept the retry cooldown.
    RetryScheduled { failures: u32 },
    /// Released everything after device loss; slept its cooldown.
    PausedForDeviceLoss,
    /// Released everything after repeated faults; slept its cooldown.
    PausedForRepeatedFailure,
    /// Capture is disabled; everything is released.
    Disabled,
    /// Torn down for a restart; the next step rebuilds.
    Restarted,
    /// Shutdown requested; everything is released.
    ShutDown,
}

/// Snapshot published after every step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureStatus {
    pub phase: CapturePhase,
    pub consecutive_failures: u32,
    pub total_rebuilds: u64,
    pub frames_delivered: u64,
    pub dimensions: Option<CaptureDimensions>,
    pub connected_clients: usize,
}

// ── ClientSlot ───────────────────────────────────────────────────

/// One configured server and its (lazily built) client.
struct ClientSlot {
    target: ServerTarget,
    client: Option<Box<dyn StreamingClient>>,
    /// Earliest reconnect attempt after a failure.
    retry_at: Option<Instant>,
}

impl ClientSlot {
    fn new(target: ServerTarget) -> Self {
        Self {
            target,
            client: None,
            retry_at: None,
        }
    }

    fn is_connected(&self) -> bool {
        self.client.as_ref().is_some_and(|c| c.is_connected())
    }

    fn is_due(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    async fn fail(&mut self, retry_at: Instant) {
        if let Some(client) = self.client.as_mut() {
            client.disconnect().await;
        }
        self.retry_at = Some(retry_at);
    }
}

/// Connect, claim the priority, and show a black frame right away.
async fn open_client(
    client: &mut dyn StreamingClient,
    target: &ServerTarget,
    initial: &Frame,
) -> Result<(), GrabError> {
    client.connect().await?;
    client.send_registration(target.priority).await?;
    client.send_frame(initial).await
}

// ── CaptureOrchestrator ──────────────────────────────────────────

pub struct CaptureOrchestrator {
    config: PipelineConfig,
    engine_factory: EngineFactory,
    client_factory: ClientFactory,
    engine: Option<Box<dyn CaptureEngine>>,
    clients: Vec<ClientSlot>,
    initial_frame: Option<Frame>,
    phase: CapturePhase,
    counter: RecoveryCounter,
    frames_delivered: u64,
    control: CaptureControl,
    notifier: Notifier,
    status_tx: watch::Sender<CaptureStatus>,
}

impl CaptureOrchestrator {
    /// Validate `config` and prepare an idle orchestrator using the
    /// platform engine and the network clients.
    pub fn new(config: PipelineConfig, control: CaptureControl) -> Result<Self, GrabError> {
        config.validate()?;
        let (status_tx, _) = watch::channel(CaptureStatus::default());
        Ok(Self {
            config,
            engine_factory: Box::new(create_engine),
            client_factory: Box::new(create_client),
            engine: None,
            clients: Vec::new(),
            initial_frame: None,
            phase: CapturePhase::Idle,
            counter: RecoveryCounter::default(),
            frames_delivered: 0,
            control,
            notifier: Notifier::default(),
            status_tx,
        })
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn control(&self) -> &CaptureControl {
        &self.control
    }

    pub fn phase(&self) -> &CapturePhase {
        &self.phase
    }

    pub fn counter(&self) -> &RecoveryCounter {
        &self.counter
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Whether a capture session is currently held.
    pub fn is_engine_live(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| !e.is_released())
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.iter().filter(|s| s.is_connected()).count()
    }

    /// Receiver for the status published after every step.
    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            phase: self.phase.clone(),
            consecutive_failures: self.counter.consecutive_failures(),
            total_rebuilds: self.counter.total_rebuilds(),
            frames_delivered: self.frames_delivered,
            dimensions: self.engine.as_ref().and_then(|e| e.dimensions()),
            connected_clients: self.connected_clients(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    // ── Driving ──────────────────────────────────────────────────

    /// Step until shutdown. Returns `Err` only for fatal errors.
    pub async fn run(&mut self) -> Result<(), GrabError> {
        info!(
            "capture orchestrator running: {} capture, {} server(s)",
            self.config.method,
            self.config.servers.len()
        );
        loop {
            match self.step().await? {
                StepOutcome::ShutDown => break,
                StepOutcome::Disabled => self.control.wait_for_resume().await,
                _ => {}
            }
        }
        info!("capture orchestrator stopped");
        Ok(())
    }

    /// Run exactly one iteration of the state machine.
    pub async fn step(&mut self) -> Result<StepOutcome, GrabError> {
        let outcome = self.step_inner().await;
        self.publish();
        outcome
    }

    async fn step_inner(&mut self) -> Result<StepOutcome, GrabError> {
        if self.control.is_shutdown() {
            if !self.phase.is_stopped() {
                self.teardown(true).await;
                self.phase.stop();
            }
            return Ok(StepOutcome::ShutDown);
        }

        if let Some(new_config) = self.control.take_restart() {
            return match self.restart(new_config).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => self.handle_fault(e).await,
            };
        }

        if !self.control.is_enabled() {
            if !self.phase.is_stopped() {
                self.disable().await;
            }
            return Ok(StepOutcome::Disabled);
        }

        let attempt = if self.is_engine_live() {
            self.capture_cycle().await
        } else {
            self.start().await
        };
        match attempt {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.handle_fault(e).await,
        }
    }

    // ── Build and deliver ────────────────────────────────────────

    async fn start(&mut self) -> Result<StepOutcome, GrabError> {
        self.phase.resume();
        let engine = self
            .engine
            .get_or_insert_with(|| (self.engine_factory)(self.config.method));
        let dims = engine.initialize(&self.config.capture)?;
        let name = engine.name();

        if !self.phase.is_capturing() {
            self.phase.begin_capture()?;
        }
        self.initial_frame = Some(Frame::black(dims));
        if self.clients.is_empty() {
            self.clients = self.config.servers.iter().cloned().map(ClientSlot::new).collect();
        }
        self.connect_due_clients().await;

        let delivered = self.capture_and_deliver().await?;
        let message = format!(
            "capture started: {name} {dims}, {delivered}/{} server(s) receiving",
            self.clients.len()
        );
        info!("{message}");
        self.notifier.info(message);
        Ok(StepOutcome::Started)
    }

    async fn capture_cycle(&mut self) -> Result<StepOutcome, GrabError> {
        self.connect_due_clients().await;
        let clients = self.capture_and_deliver().await?;
        Ok(StepOutcome::Delivered { clients })
    }

    /// Capture one frame, fan it out, and pace. A cycle succeeds when
    /// at least one server took the frame or none are configured.
    async fn capture_and_deliver(&mut self) -> Result<usize, GrabError> {
        let frame = self.engine_mut()?.capture_frame()?;
        let delivered = self.fan_out(&frame).await;

        if delivered == 0 && !self.clients.is_empty() {
            return Err(GrabError::Delivery(format!(
                "none of {} server(s) accepted the frame",
                self.clients.len()
            )));
        }

        self.counter.record_success();
        self.frames_delivered += 1;
        debug!("frame {} delivered to {delivered} server(s)", self.frames_delivered);

        self.engine_mut()?.pace().await;
        Ok(delivered)
    }

    fn engine_mut(&mut self) -> Result<&mut Box<dyn CaptureEngine>, GrabError> {
        self.engine
            .as_mut()
            .ok_or_else(|| GrabError::DeviceLost("capture engine is not built".into()))
    }

    /// (Re)connect every disconnected client whose cooldown has passed.
    async fn connect_due_clients(&mut self) {
        let Some(initial) = self.initial_frame.clone() else {
            return;
        };
        let now = Instant::now();
        let cooldown = self.config.recovery.client_retry_cooldown();

        for slot in &mut self.clients {
            if slot.is_connected() || !slot.is_due(now) {
                continue;
            }
            let client = slot
                .client
                .get_or_insert_with(|| (self.client_factory)(&slot.target));
            match open_client(client.as_mut(), &slot.target, &initial).await {
                Ok(()) => {
                    info!("streaming to {}", slot.target);
                    slot.retry_at = None;
                }
                Err(e) => {
                    warn!(
                        "{}: connect failed: {e}; retrying in {cooldown:?}",
                        slot.target.address()
                    );
                    // Earlier clients may have spent their connect timeout.
                    slot.fail(Instant::now() + cooldown).await;
                }
            }
        }
    }

    /// Send `frame` to every connected client in turn. A failing client
    /// is disconnected and scheduled for reconnection; the rest still
    /// receive the frame.
    async fn fan_out(&mut self, frame: &Frame) -> usize {
        let cooldown = self.config.recovery.client_retry_cooldown();
        let mut delivered = 0;

        for slot in &mut self.clients {
            if !slot.is_connected() {
                continue;
            }
            let Some(client) = slot.client.as_mut() else {
                continue;
            };
            match client.send_frame(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        "{}: frame not delivered: {e}; reconnecting in {cooldown:?}",
                        slot.target.address()
                    );
                    slot.fail(Instant::now() + cooldown).await;
                }
            }
        }
        delivered
    }

    // ── Recovery ─────────────────────────────────────────────────

    async fn handle_fault(&mut self, e: GrabError) -> Result<StepOutcome, GrabError> {
        let policy = self.config.recovery.clone();

        if e.is_fatal() {
            error!("capture stopped: {e}");
            self.notifier.error(format!("capture stopped: {e}"));
            self.teardown(false).await;
            self.phase.stop();
            return Err(e);
        }

        if e.is_device_lost() {
            warn!(
                "{e}; releasing everything and rebuilding in {:?}",
                policy.device_lost_cooldown()
            );
            self.phase.pause_for_device_loss()?;
            self.teardown(false).await;
            self.publish();
            self.control.cooldown(policy.device_lost_cooldown()).await;
            return Ok(StepOutcome::PausedForDeviceLoss);
        }

        let failures = self.counter.record_failure();
        if !self.counter.threshold_reached(&policy) {
            warn!(
                "{e} (failure {failures}/{}); retrying in {:?}",
                policy.max_consecutive_failures,
                policy.retry_cooldown()
            );
            self.publish();
            self.control.cooldown(policy.retry_cooldown()).await;
            return Ok(StepOutcome::RetryScheduled { failures });
        }

        self.phase.pause_for_repeated_failure()?;
        self.teardown(false).await;
        self.counter.record_rebuild();

        if self.counter.rebuilds_exhausted(&policy) {
            let gave_up = GrabError::RetriesExhausted(policy.max_full_rebuilds.unwrap_or_default());
            error!("{gave_up}; last error: {e}");
            self.notifier.error(format!("{gave_up}; last error: {e}"));
            self.phase.stop();
            return Err(gave_up);
        }

        let message = format!(
            "{failures} consecutive failures (last: {e}); full rebuild in {:?}",
            policy.repeated_failure_cooldown()
        );
        warn!("{message}");
        self.notifier.error(message);
        self.publish();
        self.control.cooldown(policy.repeated_failure_cooldown()).await;
        Ok(StepOutcome::PausedForRepeatedFailure)
    }

    /// Disconnect every client (optionally clearing its priority first)
    /// and drop the engine.
    async fn teardown(&mut self, clear_priority: bool) {
        for slot in &mut self.clients {
            let Some(client) = slot.client.as_mut() else {
                continue;
            };
            if clear_priority && client.is_connected() {
                if let Err(e) = client.send_clear_priority(slot.target.priority).await {
                    debug!("{}: clear priority failed: {e}", slot.target.address());
                }
            }
            client.disconnect().await;
        }
        self.clients.clear();

        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
        self.initial_frame = None;
    }

    async fn disable(&mut self) {
        self.teardown(true).await;
        self.phase.stop();
        self.counter.record_success();
        info!("capture disabled");
        self.notifier.info("capture disabled");
    }

    async fn restart(
        &mut self,
        new_config: Option<PipelineConfig>,
    ) -> Result<StepOutcome, GrabError> {
        info!("restarting capture");
        self.teardown(true).await;
        self.phase.stop();
        self.counter = RecoveryCounter::default();

        if let Some(config) = new_config {
            config.validate()?;
            self.config = config;
        }
        self.publish();
        self.control.cooldown(self.config.recovery.restart_delay()).await;
        self.control.enable();
        Ok(StepOutcome::Restarted)
    }
}
