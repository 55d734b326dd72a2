//! Lifecycle coordinator: owns one voice session pipeline at a time.
//!
//! A single task owns every live resource and applies all events in arrival
//! order: toggle commands, microphone callbacks, inbound session events,
//! playback completions and the silence deadline. Nothing else creates or
//! releases devices or the session.
//!
//! The toggle guard is held whenever the coordinator is between stable states
//! (acquiring devices, waiting for the session to open, or closing device
//! contexts). Toggles that arrive while it is held are answered with
//! [`ToggleOutcome::Ignored`] rather than queued.

use crate::audio::backend::AudioBackend;
use crate::audio::device::DeviceContext;
use crate::audio::playback::{CompletionReceiver, SourceId};
use crate::audio::recorder::{AudioSource, CaptureEvent, CaptureReceiver, CaptureSender};
use crate::audio::vad::{SpeechTransition, VadConfig, silence_frames_for};
use crate::config::{Config, SessionConfig};
use crate::defaults;
use crate::error::{GreenlightError, Result};
use crate::pipeline::capture_station::{CaptureConfig, CaptureStation};
use crate::pipeline::encoder::OutboundEncoder;
use crate::pipeline::observer::{NullObserver, SessionObserver};
use crate::pipeline::scheduler::PlaybackScheduler;
use crate::pipeline::types::Transcript;
use crate::pipeline::watchdog::{SilenceWatchdog, sleep_until_opt};
use crate::putting::{PuttingStats, Settings, StatsUpdate, calculate_break};
use crate::session::protocol::{InboundEvent, ToolResponsePayload, ToolResult};
use crate::session::setup::SessionSetup;
use crate::session::transport::{InboundReceiver, Transport};
use crate::session::{Session, SessionState};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Fixed parameters for every pipeline run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub capture: CaptureConfig,
    pub playback_sample_rate: u32,
    pub silence_timeout: Duration,
    pub session: SessionConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            silence_timeout: Duration::from_millis(defaults::SILENCE_TIMEOUT_MS),
            session: SessionConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture: CaptureConfig {
                block_size: config.audio.block_size,
                sample_rate: defaults::CAPTURE_SAMPLE_RATE,
                vad: VadConfig {
                    speech_threshold: config.audio.vad_threshold,
                    silence_frames_required: silence_frames_for(
                        config.audio.silence_ms,
                        defaults::CAPTURE_SAMPLE_RATE,
                        config.audio.block_size,
                    ),
                    ..VadConfig::default()
                },
            },
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            silence_timeout: Duration::from_millis(config.session.silence_timeout_ms),
            session: config.session.clone(),
        }
    }
}

/// What a call to [`CoordinatorHandle::toggle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Stopped,
    /// Another start or stop was still running.
    Ignored,
}

/// Why a running pipeline is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    SilenceTimeout,
    RemoteError,
    RemoteClosed,
    DeviceDropout,
    StartFailed,
    Shutdown,
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub active: bool,
    pub toggle_in_progress: bool,
    pub session_state: SessionState,
    pub microphone_held: bool,
    pub capture_context_held: bool,
    pub playback_held: bool,
    pub watchdog_armed: bool,
    pub speaking: bool,
    pub pending_playback: usize,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub transcript: Transcript,
    pub stats: PuttingStats,
}

impl PipelineStatus {
    /// True when no device, context, session or timer is held and no release
    /// is still running.
    pub fn is_released(&self) -> bool {
        !self.toggle_in_progress
            && !self.microphone_held
            && !self.capture_context_held
            && !self.playback_held
            && !self.watchdog_armed
            && self.session_state == SessionState::Idle
    }
}

type Reply = oneshot::Sender<Result<ToggleOutcome>>;

enum Command {
    Toggle(Reply),
    Status(oneshot::Sender<PipelineStatus>),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    Prepared(Box<PipelineHandle>, PipelineLinks),
    PrepareFailed(GreenlightError),
    Released,
}

enum Phase {
    Idle,
    Acquiring(Reply),
    /// Devices held and connected. The session may still be opening.
    Active,
    Releasing {
        reply: Option<Reply>,
        outcome: Result<ToggleOutcome>,
    },
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Acquiring(_) => "acquiring",
            Phase::Active => "active",
            Phase::Releasing { .. } => "releasing",
        }
    }
}

/// Everything one pipeline run holds. Dropped as a whole when the run ends.
struct PipelineHandle {
    microphone: Option<Box<dyn AudioSource>>,
    capture_context: Option<Box<dyn DeviceContext>>,
    scheduler: Option<PlaybackScheduler>,
    station: Option<CaptureStation>,
    session: Session,
    encoder: OutboundEncoder,
    watchdog: SilenceWatchdog,
    capture_sink: CaptureSender,
}

/// Receiving ends of one pipeline run's channels.
struct PipelineLinks {
    inbound: InboundReceiver,
    capture: CaptureReceiver,
    completions: CompletionReceiver,
}

/// Handles detached from a finished run, released off the coordinator task.
///
/// Stopping a microphone can join a worker thread and closing a device
/// context can block on the audio host.
struct Teardown {
    microphone: Option<Box<dyn AudioSource>>,
    session: Session,
    scheduler: Option<PlaybackScheduler>,
    capture_context: Option<Box<dyn DeviceContext>>,
}

impl Teardown {
    /// Release capture, session and playback, in that order. A failure on one
    /// does not prevent releasing the rest.
    fn run(mut self) {
        if let Some(mut microphone) = self.microphone.take()
            && let Err(e) = microphone.stop()
        {
            tracing::warn!(error = %e, device = %microphone.name(), "failed to release microphone");
        }

        self.session.close();

        let playback = self.scheduler.take().map(|mut scheduler| {
            scheduler.interrupt();
            scheduler.into_device()
        });
        if let Some(mut context) = self.capture_context.take()
            && let Err(e) = context.close()
        {
            tracing::warn!(error = %e, "failed to close capture context");
        }
        if let Some(mut device) = playback
            && let Err(e) = device.close()
        {
            tracing::warn!(error = %e, "failed to close playback context");
        }
    }
}

impl PipelineHandle {
    fn new(watchdog_timeout: Duration, capture_sink: CaptureSender) -> Self {
        Self {
            microphone: None,
            capture_context: None,
            scheduler: None,
            station: None,
            session: Session::new(),
            encoder: OutboundEncoder::new(),
            watchdog: SilenceWatchdog::new(watchdog_timeout),
            capture_sink,
        }
    }

    /// Wire the microphone into the capture channel.
    fn connect_capture(&mut self, sample_rate: u32) -> Result<()> {
        let microphone = self
            .microphone
            .as_mut()
            .ok_or(GreenlightError::PipelineStopped)?;
        microphone.start(sample_rate, self.capture_sink.clone())?;
        tracing::debug!(device = %microphone.name(), sample_rate, "capture graph connected");
        Ok(())
    }

    /// Stop the timer and the frame flow, then hand every held resource to a
    /// [`Teardown`].
    fn detach(&mut self) -> Teardown {
        self.watchdog.cancel();
        if let Some(microphone) = self.microphone.as_mut() {
            microphone.disconnect();
        }
        Teardown {
            microphone: self.microphone.take(),
            session: std::mem::take(&mut self.session),
            scheduler: self.scheduler.take(),
            capture_context: self.capture_context.take(),
        }
    }
}

struct StartDeps {
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    stats: PuttingStats,
    settings: Settings,
}

/// Acquire devices and connect, releasing whatever was acquired on failure.
async fn prepare(deps: StartDeps) -> Result<(PipelineHandle, PipelineLinks)> {
    let (capture_tx, capture_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let mut handle = PipelineHandle::new(deps.config.silence_timeout, capture_tx);

    let acquired = async {
        handle.microphone = Some(deps.backend.acquire_microphone().await?);
        handle.capture_context = Some(
            deps.backend
                .create_input_context(deps.config.capture.sample_rate)
                .await?,
        );
        let playback = deps
            .backend
            .create_output_context(deps.config.playback_sample_rate, completions_tx)
            .await?;
        handle.scheduler = Some(PlaybackScheduler::new(playback));
        handle.station = Some(deps.backend.load_frame_processor(deps.config.capture).await?);

        let setup = SessionSetup::new(&deps.config.session, &deps.stats, &deps.settings);
        handle.session.begin_open()?;
        let connection = deps.transport.connect(&setup, inbound_tx).await?;
        handle.session.attach(connection)
    }
    .await;

    match acquired {
        Ok(()) => Ok((
            handle,
            PipelineLinks {
                inbound: inbound_rx,
                capture: capture_rx,
                completions: completions_rx,
            },
        )),
        Err(e) => {
            handle.session.abort_open();
            let teardown = handle.detach();
            if let Err(join) = tokio::task::spawn_blocking(move || teardown.run()).await {
                tracing::warn!(error = %join, "device release task failed");
            }
            Err(e)
        }
    }
}

/// Configures and spawns the coordinator task.
pub struct LifecycleCoordinator {
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    observer: Arc<dyn SessionObserver>,
    stats: Arc<RwLock<PuttingStats>>,
    settings: Arc<RwLock<Settings>>,
}

impl LifecycleCoordinator {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            backend,
            transport,
            config,
            observer: Arc::new(NullObserver),
            stats: Arc::new(RwLock::new(PuttingStats::default())),
            settings: Arc::new(RwLock::new(Settings::default())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Share the putt read and golfer settings with the caller.
    ///
    /// Tool calls update `stats` in place. `settings` is read at the moment
    /// each tool call is answered, so changes apply to the next update.
    pub fn with_shared_state(
        mut self,
        stats: Arc<RwLock<PuttingStats>>,
        settings: Arc<RwLock<Settings>>,
    ) -> Self {
        self.stats = stats;
        self.settings = settings;
        self
    }

    /// Spawn the coordinator on the current runtime.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let handle = CoordinatorHandle {
            commands: commands_tx,
            stats: Arc::clone(&self.stats),
            settings: Arc::clone(&self.settings),
        };
        let coordinator = Coordinator {
            backend: self.backend,
            transport: self.transport,
            config: self.config,
            observer: self.observer,
            stats: self.stats,
            settings: self.settings,
            commands: Some(commands_rx),
            internal_tx,
            internal_rx,
            phase: Phase::Idle,
            pipeline: None,
            inbound: None,
            capture: None,
            completions: None,
            transcript: Transcript::default(),
            shutdown: None,
        };
        (handle, tokio::spawn(coordinator.run()))
    }
}

/// Cheap handle for driving the coordinator from anywhere.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    stats: Arc<RwLock<PuttingStats>>,
    settings: Arc<RwLock<Settings>>,
}

impl CoordinatorHandle {
    /// Start when inactive, stop when active, ignore while a transition runs.
    ///
    /// A start returns once devices are held and the session is connecting.
    /// Failures up to that point are returned here and leave the coordinator
    /// inactive. Later failures go to the observer and stop the pipeline. A
    /// toggle while the session is still opening stops it.
    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Toggle(tx))
            .await
            .map_err(|_| GreenlightError::PipelineStopped)?;
        rx.await.map_err(|_| GreenlightError::PipelineStopped)?
    }

    pub async fn status(&self) -> Result<PipelineStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .await
            .map_err(|_| GreenlightError::PipelineStopped)?;
        rx.await.map_err(|_| GreenlightError::PipelineStopped)
    }

    /// Stop any running pipeline and end the coordinator task.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| GreenlightError::PipelineStopped)?;
        rx.await.map_err(|_| GreenlightError::PipelineStopped)
    }

    pub fn stats(&self) -> PuttingStats {
        *self.stats.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }
}

enum Event {
    Command(Option<Command>),
    Internal(Internal),
    Inbound(Option<InboundEvent>),
    Capture(Option<CaptureEvent>),
    Completed(Option<SourceId>),
    SilenceDeadline,
}

async fn recv_from<T>(receiver: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_command(receiver: &mut Option<mpsc::Receiver<Command>>) -> Option<Command> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

struct Coordinator {
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    config: CoordinatorConfig,
    observer: Arc<dyn SessionObserver>,
    stats: Arc<RwLock<PuttingStats>>,
    settings: Arc<RwLock<Settings>>,
    commands: Option<mpsc::Receiver<Command>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    phase: Phase,
    pipeline: Option<PipelineHandle>,
    inbound: Option<InboundReceiver>,
    capture: Option<CaptureReceiver>,
    completions: Option<CompletionReceiver>,
    transcript: Transcript,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Coordinator {
    async fn run(mut self) {
        tracing::debug!("coordinator started");
        loop {
            let deadline = self.pipeline.as_ref().and_then(|p| p.watchdog.deadline());
            let event = tokio::select! {
                biased;
                Some(internal) = self.internal_rx.recv() => Event::Internal(internal),
                inbound = recv_from(&mut self.inbound) => Event::Inbound(inbound),
                capture = recv_from(&mut self.capture) => Event::Capture(capture),
                completed = recv_from(&mut self.completions) => Event::Completed(completed),
                command = recv_command(&mut self.commands) => Event::Command(command),
                _ = sleep_until_opt(deadline) => Event::SilenceDeadline,
            };

            match event {
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Command(None) => {
                    tracing::debug!("all coordinator handles dropped");
                    self.commands = None;
                    self.begin_shutdown(None);
                }
                Event::Internal(internal) => self.handle_internal(internal),
                Event::Inbound(Some(inbound)) => self.handle_inbound(inbound),
                Event::Inbound(None) => {
                    self.inbound = None;
                    self.handle_inbound(InboundEvent::Closed);
                }
                Event::Capture(Some(capture)) => self.handle_capture(capture),
                Event::Capture(None) => self.capture = None,
                Event::Completed(Some(id)) => {
                    if let Some(scheduler) = self.pipeline.as_mut().and_then(|p| p.scheduler.as_mut()) {
                        scheduler.on_completed(id);
                    }
                }
                Event::Completed(None) => self.completions = None,
                Event::SilenceDeadline => self.handle_silence_deadline(),
            }

            if matches!(self.phase, Phase::Idle) && self.shutdown_requested() {
                break;
            }
        }

        if let Some(reply) = self.shutdown.take() {
            let _ = reply.send(());
        }
        tracing::debug!("coordinator stopped");
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.is_some() || self.commands.is_none()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Toggle(reply) => self.toggle(reply),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(reply) => self.begin_shutdown(Some(reply)),
        }
    }

    fn toggle(&mut self, reply: Reply) {
        match self.phase {
            Phase::Idle => self.start(reply),
            Phase::Active => self.stop(StopReason::User, Some(reply), Ok(ToggleOutcome::Stopped)),
            _ => {
                tracing::debug!(phase = self.phase.name(), "toggle ignored while in transition");
                let _ = reply.send(Ok(ToggleOutcome::Ignored));
            }
        }
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        if let Some(reply) = reply {
            self.shutdown = Some(reply);
        }
        // Acquiring and Releasing finish on their own; the run loop exits once idle.
        self.stop(StopReason::Shutdown, None, Ok(ToggleOutcome::Stopped));
    }

    fn start(&mut self, reply: Reply) {
        tracing::info!("starting voice session");
        self.phase = Phase::Acquiring(reply);
        self.observer.on_state_changed(SessionState::Opening);

        let deps = StartDeps {
            backend: Arc::clone(&self.backend),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            stats: *self.stats.read().unwrap_or_else(|e| e.into_inner()),
            settings: *self.settings.read().unwrap_or_else(|e| e.into_inner()),
        };
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let message = match prepare(deps).await {
                Ok((handle, links)) => Internal::Prepared(Box::new(handle), links),
                Err(e) => Internal::PrepareFailed(e),
            };
            let _ = internal.send(message);
        });
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Prepared(handle, links) => {
                let reply = match std::mem::replace(&mut self.phase, Phase::Idle) {
                    Phase::Acquiring(reply) => reply,
                    other => {
                        self.phase = other;
                        tracing::warn!("discarding pipeline prepared outside a start");
                        release_detached(*handle);
                        return;
                    }
                };
                self.pipeline = Some(*handle);
                self.inbound = Some(links.inbound);
                self.capture = Some(links.capture);
                self.completions = Some(links.completions);
                self.phase = Phase::Active;

                if self.shutdown_requested() {
                    self.stop(
                        StopReason::Shutdown,
                        Some(reply),
                        Err(GreenlightError::PipelineStopped),
                    );
                    return;
                }
                tracing::debug!("devices acquired, waiting for session to open");
                let _ = reply.send(Ok(ToggleOutcome::Started));
            }
            Internal::PrepareFailed(error) => {
                if let Phase::Acquiring(reply) = std::mem::replace(&mut self.phase, Phase::Idle) {
                    tracing::error!(error = %error, "voice session failed to start");
                    self.observer.on_error(&error.to_string());
                    self.observer.on_state_changed(SessionState::Idle);
                    let _ = reply.send(Err(error));
                }
            }
            Internal::Released => {
                if let Phase::Releasing { reply, outcome } =
                    std::mem::replace(&mut self.phase, Phase::Idle)
                {
                    self.transcript.clear();
                    self.observer.on_state_changed(SessionState::Idle);
                    tracing::debug!("pipeline released");
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
    }

    /// The agent acknowledged setup: start streaming the microphone.
    fn complete_open(&mut self) {
        let sample_rate = self.config.capture.sample_rate;
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        if !pipeline.session.on_opened() {
            return;
        }
        match pipeline.connect_capture(sample_rate) {
            Ok(()) => {
                self.observer.on_state_changed(SessionState::Open);
                tracing::info!("voice session active");
            }
            Err(e) => {
                tracing::error!(error = %e, "microphone failed to start");
                self.observer.on_error(&e.to_string());
                self.stop(StopReason::StartFailed, None, Ok(ToggleOutcome::Stopped));
            }
        }
    }

    /// Run the stop sequence. Held resources are released off-task; the reply
    /// is sent once they have been.
    fn stop(&mut self, reason: StopReason, reply: Option<Reply>, outcome: Result<ToggleOutcome>) {
        if !matches!(self.phase, Phase::Active) {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(ToggleOutcome::Ignored));
            }
            return;
        }
        let Some(mut pipeline) = self.pipeline.take() else {
            self.phase = Phase::Idle;
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
            return;
        };

        tracing::info!(reason = ?reason, "stopping voice session");
        self.phase = Phase::Releasing { reply, outcome };

        let frames_sent = pipeline.encoder.sent();
        let teardown = pipeline.detach();
        self.observer.on_state_changed(SessionState::Closed);

        self.inbound = None;
        self.capture = None;
        self.completions = None;
        drop(pipeline);
        tracing::debug!(frames_sent, "capture disconnected");

        let internal = self.internal_tx.clone();
        tokio::task::spawn_blocking(move || {
            teardown.run();
            let _ = internal.send(Internal::Released);
        });
    }

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Opened => {
                if matches!(self.phase, Phase::Active) {
                    self.complete_open();
                }
            }
            InboundEvent::Audio(buffer) => {
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                if !pipeline.session.is_open() {
                    return;
                }
                self.observer.on_audio(&buffer);
                if let Some(scheduler) = pipeline.scheduler.as_mut()
                    && let Err(e) = scheduler.enqueue(buffer)
                {
                    tracing::warn!(error = %e, "dropping inbound audio");
                }
            }
            InboundEvent::Transcript { channel, text } => {
                if self.pipeline.is_none() {
                    return;
                }
                self.transcript.apply(channel, &text);
                self.observer.on_transcript(channel, &text);
            }
            InboundEvent::ToolInvocation { name, args, id } => self.handle_tool_call(name, args, id),
            InboundEvent::Interrupted => {
                if let Some(scheduler) = self.pipeline.as_mut().and_then(|p| p.scheduler.as_mut()) {
                    scheduler.interrupt();
                    self.observer.on_interrupted();
                }
            }
            InboundEvent::TurnComplete => tracing::trace!("turn complete"),
            InboundEvent::Error { reason } => {
                if self.pipeline.is_none() {
                    return;
                }
                tracing::error!(reason = %reason, "remote session error");
                self.observer.on_error(&reason);
                self.stop(StopReason::RemoteError, None, Ok(ToggleOutcome::Stopped));
            }
            InboundEvent::Closed => {
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                pipeline.session.on_remote_closed();
                self.observer.on_closed();
                self.stop(StopReason::RemoteClosed, None, Ok(ToggleOutcome::Stopped));
            }
        }
    }

    fn handle_tool_call(&mut self, name: String, args: serde_json::Value, id: String) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        if !pipeline.session.is_open() {
            tracing::debug!(name = %name, "ignoring tool call on a session that is not open");
            return;
        }
        self.observer.on_tool_invocation(&name, &args, &id);
        if name != defaults::TOOL_UPDATE_STATS {
            tracing::warn!(name = %name, "ignoring unknown tool");
            return;
        }

        let update = StatsUpdate::from_args(&args);
        let stats = {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            *stats = stats.merge(&update);
            *stats
        };
        let settings = *self.settings.read().unwrap_or_else(|e| e.into_inner());
        let result = calculate_break(&stats, &settings);
        tracing::info!(
            distance = stats.distance,
            slope_side = stats.slope_side,
            slope_vertical = stats.slope_vertical,
            stimp = stats.stimp,
            aim = %result.aim_point(),
            "putt read updated"
        );
        self.observer.on_stats_updated(&stats, &result);

        pipeline.session.send_tool_result(ToolResult {
            id,
            name,
            response: ToolResponsePayload {
                result: "ok".to_string(),
                aim_point: result.aim_point(),
                distance: stats.distance,
                slope: stats.slope_side,
            },
        });
    }

    fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Samples(samples) => {
                if !matches!(self.phase, Phase::Active) {
                    return;
                }
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                let Some(station) = pipeline.station.as_mut() else {
                    return;
                };
                for captured in station.push(&samples) {
                    match captured.classification.transition {
                        Some(SpeechTransition::SpeechStarted) => {
                            tracing::debug!(level = captured.classification.level, "speech started");
                            pipeline.watchdog.on_speech_started();
                        }
                        Some(SpeechTransition::SpeechEnded) => {
                            tracing::debug!("speech ended");
                            pipeline.watchdog.on_speech_ended();
                        }
                        None => {}
                    }
                    pipeline.encoder.send(&captured.frame, &mut pipeline.session);
                }
            }
            CaptureEvent::Ended { reason } => {
                if self.pipeline.is_none() {
                    return;
                }
                let error = GreenlightError::DeviceDropout { message: reason };
                tracing::error!(error = %error, "microphone stream ended");
                self.observer.on_error(&error.to_string());
                self.stop(StopReason::DeviceDropout, None, Ok(ToggleOutcome::Stopped));
            }
        }
    }

    fn handle_silence_deadline(&mut self) {
        let expired = self
            .pipeline
            .as_mut()
            .is_some_and(|p| p.watchdog.poll_expired(tokio::time::Instant::now()));
        if expired && matches!(self.phase, Phase::Active) {
            tracing::info!("no speech before the silence deadline");
            self.stop(StopReason::SilenceTimeout, None, Ok(ToggleOutcome::Stopped));
        }
    }

    fn status(&self) -> PipelineStatus {
        let pipeline = self.pipeline.as_ref();
        PipelineStatus {
            active: matches!(self.phase, Phase::Active),
            toggle_in_progress: matches!(
                self.phase,
                Phase::Acquiring(_) | Phase::Releasing { .. }
            ),
            session_state: pipeline.map_or(SessionState::Idle, |p| p.session.state()),
            microphone_held: pipeline.is_some_and(|p| p.microphone.is_some()),
            capture_context_held: pipeline.is_some_and(|p| p.capture_context.is_some()),
            playback_held: pipeline.is_some_and(|p| p.scheduler.is_some()),
            watchdog_armed: pipeline.is_some_and(|p| p.watchdog.is_armed()),
            speaking: pipeline
                .and_then(|p| p.station.as_ref())
                .is_some_and(|s| s.analyzer().is_speaking()),
            pending_playback: pipeline
                .and_then(|p| p.scheduler.as_ref())
                .map_or(0, |s| s.pending_len()),
            frames_captured: pipeline
                .and_then(|p| p.station.as_ref())
                .map_or(0, |s| s.frames_emitted()),
            frames_sent: pipeline.map_or(0, |p| p.encoder.sent()),
            transcript: self.transcript.clone(),
            stats: *self.stats.read().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

fn release_detached(mut handle: PipelineHandle) {
    let teardown = handle.detach();
    tokio::task::spawn_blocking(move || teardown.run());
}
