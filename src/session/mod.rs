//! Device session engine.
//!
//! One task owns everything about the connection: the serial link, the
//! framer, capture state, liveness bookkeeping, and the observer. Commands
//! from the handle, bytes from the link, timer ticks, and results from
//! spawned pipeline work all funnel into that task's select loop, so
//! handlers never interleave and nothing in here needs a lock.
//!
//! The task moves through phases. Each phase's timers are locals of its own
//! function, so leaving a phase provably cancels them; a heartbeat timer
//! from one connection cannot tick into the next. Work that outlives a
//! phase (the speech pipeline, the deferred ack tone) is tagged with the
//! connection generation and its results are dropped if the connection has
//! changed underneath it.

pub mod capture;
pub mod events;
pub mod heartbeat;

pub use events::{SessionEvent, SessionObserver};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::chat::ChatClient;
use crate::config::{DockConfig, SessionTiming};
use crate::framer::LineFramer;
use crate::history::HistorySink;
use crate::link::{Link, LinkEvent, LinkOpener, SerialOpener};
use crate::protocol::{self, ConfigUpdate, DeviceStatus, InboundMessage, OutboundCommand};
use crate::transcribe::Transcriber;

use capture::{AppendOutcome, CapturePipeline, StartOutcome, StopOutcome, Utterance};
use heartbeat::{HealthVerdict, HeartbeatRecord};

const COMMAND_QUEUE_DEPTH: usize = 16;
const INTERNAL_QUEUE_DEPTH: usize = 32;
/// Pause between the farewell frame and dropping the port, long enough for
/// the worker to drain its write queue.
const CLOSE_DRAIN: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session task is gone")]
    TaskGone,
}

/// Connection lifecycle as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Something went wrong. The reason sticks until the next connect or an
    /// explicit disconnect; the link behind it is already closed.
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Point-in-time view of the session, published through a watch channel.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Latest self-reported device status. Cleared whenever the connection
    /// is not up, so callers never render stale hardware state.
    pub status: Option<DeviceStatus>,
}

#[derive(Debug)]
enum SessionCommand {
    Connect { path: String },
    Disconnect,
    SendConfig(ConfigUpdate),
    RequestStatus,
    Shutdown,
}

/// Optional services the session hands utterances to. All absent by
/// default, which leaves the session observe-only.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub chat: Option<Arc<dyn ChatClient>>,
    pub history: Option<Arc<dyn HistorySink>>,
}

/// Results reported back into the session task by work it spawned. Every
/// variant carries the generation of the connection that spawned it.
enum InternalEvent {
    AckToneDue {
        generation: u64,
    },
    Transcript {
        generation: u64,
        text: String,
    },
    Response {
        generation: u64,
        text: String,
    },
    PipelineFailed {
        generation: u64,
        stage: &'static str,
        error: String,
    },
}

impl InternalEvent {
    fn generation(&self) -> u64 {
        match self {
            InternalEvent::AckToneDue { generation }
            | InternalEvent::Transcript { generation, .. }
            | InternalEvent::Response { generation, .. }
            | InternalEvent::PipelineFailed { generation, .. } => *generation,
        }
    }
}

/// Builder for a session. `spawn` hands back the handle the rest of the
/// program talks through.
pub struct DeviceSession {
    config: DockConfig,
    collaborators: Collaborators,
    observer: SessionObserver,
    opener: Arc<dyn LinkOpener>,
}

impl DeviceSession {
    pub fn new(config: DockConfig) -> Self {
        Self {
            config,
            collaborators: Collaborators::default(),
            observer: Box::new(|_| {}),
            opener: Arc::new(SerialOpener),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_observer(mut self, observer: SessionObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Swap out how links get opened, for exercising the session against a
    /// fake peripheral.
    pub fn with_opener(mut self, opener: Arc<dyn LinkOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn spawn(self) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE_DEPTH);

        let capture = CapturePipeline::new(self.config.capture.clone());
        let task = SessionTask {
            config: self.config,
            collaborators: self.collaborators,
            observer: self.observer,
            opener: self.opener,
            commands: command_rx,
            snapshot_tx,
            internal_tx,
            internal_rx,
            capture,
            generation: 0,
        };

        SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            task: tokio::spawn(task.run()),
        }
    }
}

/// Caller-side handle. All methods queue a command for the session task;
/// effects show up through the snapshot watch and the observer.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn connect(&self, path: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect {
            path: path.to_string(),
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect).await
    }

    pub async fn send_config(&self, update: ConfigUpdate) -> Result<(), SessionError> {
        self.send(SessionCommand::SendConfig(update)).await
    }

    pub async fn request_status(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RequestStatus).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch receiver for callers that want to await changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Disconnect if needed, stop the task, and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        let _ = self.task.await;
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::TaskGone)
    }
}

enum Phase {
    Idle,
    Connecting(String),
    Connected(Link, LineFramer),
    Exit,
}

struct SessionTask {
    config: DockConfig,
    collaborators: Collaborators,
    observer: SessionObserver,
    opener: Arc<dyn LinkOpener>,
    commands: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    capture: CapturePipeline,
    /// Bumped when a connection comes up and again when it goes away, so
    /// deferred work can tell whether its connection still exists.
    generation: u64,
}

impl SessionTask {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.run_idle().await,
                Phase::Connecting(path) => self.run_connecting(path).await,
                Phase::Connected(link, framer) => self.run_connected(link, framer).await,
                Phase::Exit => break,
            };
        }
        log::info!("🔌 Session task stopped");
    }

    /// No link. Wait for a connect, drain leftovers from previous
    /// connections.
    async fn run_idle(&mut self) -> Phase {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Connect { path }) => return Phase::Connecting(path),
                    Some(SessionCommand::Shutdown) | None => return Phase::Exit,
                    Some(SessionCommand::Disconnect) => {
                        // Clears a sticky error; otherwise nothing to do.
                        let state = self.snapshot_tx.borrow().state.clone();
                        if state != ConnectionState::Disconnected {
                            self.set_state(ConnectionState::Disconnected);
                        }
                    }
                    Some(SessionCommand::SendConfig(_)) => {
                        log::warn!("⚠️ Not connected; dropping config push");
                    }
                    Some(SessionCommand::RequestStatus) => {
                        log::warn!("⚠️ Not connected; dropping status request");
                    }
                },
                Some(event) = self.internal_rx.recv() => {
                    log::debug!(
                        "📥 Dropping pipeline event from closed connection (generation {})",
                        event.generation()
                    );
                }
            }
        }
    }

    /// Open the port and wait for the peripheral to answer its first
    /// heartbeat. The whole phase is bounded by `establish_timeout`.
    async fn run_connecting(&mut self, path: String) -> Phase {
        self.set_state(ConnectionState::Connecting);
        log::info!("🔌 Connecting to {}", path);

        let opener = Arc::clone(&self.opener);
        let timing = self.config.timing.clone();
        let target = path.clone();
        let establish = async move { establish_link(opener.as_ref(), &target, &timing).await };
        tokio::pin!(establish);

        let deadline = Instant::now() + self.config.timing.establish_timeout;

        loop {
            tokio::select! {
                outcome = &mut establish => {
                    return match outcome {
                        Ok((link, framer)) => Phase::Connected(link, framer),
                        Err(reason) => {
                            self.enter_error(reason);
                            Phase::Idle
                        }
                    };
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.enter_error("device not responding".to_string());
                    return Phase::Idle;
                }
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Disconnect) => {
                        log::info!("🔌 Connect to {} cancelled", path);
                        self.set_state(ConnectionState::Disconnected);
                        return Phase::Idle;
                    }
                    Some(SessionCommand::Connect { path }) => return Phase::Connecting(path),
                    Some(SessionCommand::Shutdown) | None => return Phase::Exit,
                    Some(SessionCommand::SendConfig(_)) => {
                        log::warn!("⚠️ Still connecting; dropping config push");
                    }
                    Some(SessionCommand::RequestStatus) => {
                        log::warn!("⚠️ Still connecting; dropping status request");
                    }
                },
            }
        }
    }

    /// The steady state: dispatch frames, probe liveness, relay commands.
    async fn run_connected(&mut self, mut link: Link, mut framer: LineFramer) -> Phase {
        self.generation = self.generation.wrapping_add(1);
        self.set_state(ConnectionState::Connected);
        log::info!("✅ Connection established");

        let mut heartbeats = HeartbeatRecord::new();
        // The establishment handshake just acked, which is what proved the
        // device alive in the first place.
        heartbeats.record_ack(Instant::now());

        // Prime callers with fresh device state.
        self.send_frame(&link, &OutboundCommand::GetStatus);
        self.send_frame(&link, &OutboundCommand::GetWakeWordOptions);

        let timing = self.config.timing.clone();
        let start = Instant::now();
        let mut heartbeat_tick =
            tokio::time::interval_at(start + timing.heartbeat_interval, timing.heartbeat_interval);
        let mut health_tick = tokio::time::interval_at(
            start + timing.health_check_interval,
            timing.health_check_interval,
        );

        loop {
            tokio::select! {
                event = link.next_event() => match event {
                    Some(LinkEvent::Data(bytes)) => {
                        framer.push(&bytes);
                        loop {
                            match framer.next_line() {
                                Ok(Some(line)) => self.handle_frame(&mut heartbeats, &line),
                                Ok(None) => break,
                                Err(e) => log::debug!("📥 Dropping frame: {}", e),
                            }
                        }
                    }
                    Some(LinkEvent::Closed { reason }) => {
                        let reason = reason.unwrap_or_else(|| "worker stopped".to_string());
                        self.enter_error(format!("link closed: {}", reason));
                        return Phase::Idle;
                    }
                    None => {
                        self.enter_error("link closed".to_string());
                        return Phase::Idle;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Disconnect) => {
                        self.close_link(link).await;
                        self.set_state(ConnectionState::Disconnected);
                        return Phase::Idle;
                    }
                    Some(SessionCommand::Shutdown) | None => {
                        self.close_link(link).await;
                        self.set_state(ConnectionState::Disconnected);
                        return Phase::Exit;
                    }
                    Some(SessionCommand::Connect { path }) => {
                        log::info!("🔌 Reconnect requested; closing current link first");
                        self.close_link(link).await;
                        return Phase::Connecting(path);
                    }
                    Some(SessionCommand::SendConfig(update)) => {
                        log::info!("📤 Pushing config update");
                        self.send_frame(&link, &OutboundCommand::Config(update));
                    }
                    Some(SessionCommand::RequestStatus) => {
                        self.send_frame(&link, &OutboundCommand::GetStatus);
                    }
                },
                _ = heartbeat_tick.tick() => {
                    heartbeats.record_sent(Instant::now());
                    self.send_frame(&link, &OutboundCommand::Heartbeat);
                }
                _ = health_tick.tick() => {
                    let verdict = heartbeats.verdict(
                        Instant::now(),
                        timing.soft_ack_threshold,
                        timing.hard_ack_threshold,
                    );
                    match verdict {
                        HealthVerdict::Healthy => {}
                        HealthVerdict::Degraded(age) => {
                            log::warn!(
                                "⚠️ Heartbeat acks delayed: last ack {:.1}s ago, {} probes unanswered",
                                age.as_secs_f32(),
                                heartbeats.consecutive_misses() + 1
                            );
                        }
                        HealthVerdict::Failed(age) => {
                            log::error!(
                                "❌ Peripheral silent for {:.1}s; giving up on this link",
                                age.as_secs_f32()
                            );
                            drop(link);
                            self.enter_error("device not responding".to_string());
                            return Phase::Idle;
                        }
                    }
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(&link, event);
                }
            }
        }
    }

    /// Dispatch one decoded frame. Noise has already been filtered out by
    /// `protocol::decode`.
    fn handle_frame(&mut self, heartbeats: &mut HeartbeatRecord, line: &str) {
        let Some(message) = protocol::decode(line) else {
            return;
        };
        match message {
            InboundMessage::HeartbeatAck => {
                log::trace!("💓 Heartbeat acknowledged");
                heartbeats.record_ack(Instant::now());
            }
            InboundMessage::Status(status) => {
                log::debug!(
                    "📥 Status: phase={}, wake_word={:?}, wifi={}",
                    status.voice_assistant_phase,
                    status.wake_word,
                    status.wifi_connected
                );
                self.snapshot_tx
                    .send_modify(|snap| snap.status = Some(status.clone()));
                (self.observer)(SessionEvent::StatusUpdated(status));
            }
            InboundMessage::WakeWordOptions(options) => {
                log::info!("👂 Device offers {} wake words", options.len());
                (self.observer)(SessionEvent::WakeWordOptions(options));
            }
            InboundMessage::ConfigApplied => {
                log::info!("✅ Peripheral applied config");
                (self.observer)(SessionEvent::ConfigApplied);
            }
            InboundMessage::WakeWordDetected => {
                log::info!("🎯 Wake word detected");
                (self.observer)(SessionEvent::WakeWordDetected);
            }
            InboundMessage::ButtonPressed => {
                log::info!("🎯 Button pressed");
                (self.observer)(SessionEvent::ButtonPressed);
            }
            InboundMessage::StartAudioRecording => {
                match self.capture.start() {
                    StartOutcome::Fresh => log::info!("🎤 Capture started"),
                    StartOutcome::Restarted { discarded_samples } => log::warn!(
                        "🎤 Capture restarted; discarded {} buffered samples",
                        discarded_samples
                    ),
                }
                (self.observer)(SessionEvent::CaptureStarted);
            }
            InboundMessage::AudioData(samples) => match self.capture.append(&samples) {
                AppendOutcome::Accepted {
                    chunk_samples,
                    total_samples,
                } => log::trace!("🎤 +{} samples ({} total)", chunk_samples, total_samples),
                AppendOutcome::IgnoredIdle => log::debug!(
                    "🎤 Dropping {} samples outside a capture",
                    samples.len()
                ),
            },
            InboundMessage::StopAudioRecording => match self.capture.stop() {
                StopOutcome::NotRecording => {
                    log::debug!("🎤 Stop without an active capture; ignoring")
                }
                StopOutcome::TooShort { samples } => {
                    log::info!(
                        "🎤 Discarding {}-sample capture (minimum is {})",
                        samples,
                        self.config.capture.min_utterance_samples
                    );
                    (self.observer)(SessionEvent::CaptureDiscarded { samples });
                }
                StopOutcome::Complete(utterance) => {
                    log::info!(
                        "🎤 Captured {} samples ({} ms)",
                        utterance.samples.len(),
                        utterance.duration_ms()
                    );
                    (self.observer)(SessionEvent::UtteranceCaptured {
                        samples: utterance.samples.len(),
                        duration_ms: utterance.duration_ms(),
                    });
                    self.schedule_ack_tone();
                    self.spawn_utterance_pipeline(utterance);
                }
            },
            InboundMessage::VadStart => {
                log::debug!("👂 Voice activity started");
                (self.observer)(SessionEvent::VadStart);
            }
            InboundMessage::VadEnd => {
                log::debug!("👂 Voice activity ended");
                (self.observer)(SessionEvent::VadEnd);
            }
            InboundMessage::Timeout(kind) => {
                log::info!("⚠️ Device reported {}", kind);
                (self.observer)(SessionEvent::DeviceTimeout(kind));
            }
        }
    }

    /// Results from deferred work. Anything from a previous generation is
    /// history by definition and gets dropped.
    fn handle_internal(&mut self, link: &Link, event: InternalEvent) {
        if event.generation() != self.generation {
            log::debug!(
                "📥 Dropping pipeline event from closed connection (generation {})",
                event.generation()
            );
            return;
        }
        match event {
            InternalEvent::AckToneDue { .. } => {
                log::debug!("📤 Playing capture ack tone");
                let tone = OutboundCommand::play_tone(
                    self.config.capture.ack_tone_frequency,
                    self.config.capture.ack_tone_duration_ms,
                );
                self.send_frame(link, &tone);
            }
            InternalEvent::Transcript { text, .. } => {
                log::info!("💬 Transcript: {:?}", text);
                (self.observer)(SessionEvent::TranscriptReady(text));
            }
            InternalEvent::Response { text, .. } => {
                log::info!("💬 Response: {:?}", text);
                (self.observer)(SessionEvent::ResponseReady(text));
            }
            InternalEvent::PipelineFailed { stage, error, .. } => {
                log::error!("❌ Speech pipeline failed at {}: {}", stage, error);
                (self.observer)(SessionEvent::PipelineError { stage, error });
            }
        }
    }

    /// Queue the tone confirming a captured utterance, delayed so it lands
    /// after the peripheral has wrapped up its own end-of-capture handling.
    fn schedule_ack_tone(&self) {
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let delay = self.config.capture.ack_tone_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InternalEvent::AckToneDue { generation }).await;
        });
    }

    /// Run transcription, chat, and archiving off the session task. Results
    /// come back as internal events. The archive write runs even when the
    /// earlier stages are absent or failed, and even if the connection is
    /// gone by then: captured speech is never thrown away here.
    fn spawn_utterance_pipeline(&self, utterance: Utterance) {
        let transcriber = self.collaborators.transcriber.clone();
        let chat = self.collaborators.chat.clone();
        let history = self.collaborators.history.clone();
        let tx = self.internal_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            let mut transcript = String::new();
            let mut response = None;

            match &transcriber {
                None => log::debug!("💬 No transcriber configured; archiving capture only"),
                Some(transcriber) => {
                    match transcriber
                        .submit(&utterance.samples, utterance.sample_rate)
                        .await
                    {
                        Ok(text) => {
                            let _ = tx
                                .send(InternalEvent::Transcript {
                                    generation,
                                    text: text.clone(),
                                })
                                .await;
                            transcript = text;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(InternalEvent::PipelineFailed {
                                    generation,
                                    stage: "transcription",
                                    error: e.to_string(),
                                })
                                .await;
                        }
                    }

                    if transcript.is_empty() {
                        log::info!("💬 Nothing transcribed; skipping chat");
                    } else if let Some(chat) = &chat {
                        match chat.complete(&transcript).await {
                            Ok(text) => {
                                let _ = tx
                                    .send(InternalEvent::Response {
                                        generation,
                                        text: text.clone(),
                                    })
                                    .await;
                                response = Some(text);
                            }
                            Err(e) => {
                                let _ = tx
                                    .send(InternalEvent::PipelineFailed {
                                        generation,
                                        stage: "chat",
                                        error: e.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                }
            }

            if let Some(history) = &history {
                let outcome = history
                    .record(
                        &utterance.samples,
                        utterance.sample_rate,
                        &transcript,
                        response.as_deref().unwrap_or(""),
                    )
                    .await;
                if let Err(e) = outcome {
                    let _ = tx
                        .send(InternalEvent::PipelineFailed {
                            generation,
                            stage: "history",
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    /// Orderly teardown: tell the peripheral goodbye, give the worker a
    /// moment to drain, then drop the port.
    async fn close_link(&mut self, link: Link) {
        log::info!("🔌 Closing connection");
        self.send_frame(&link, &OutboundCommand::Disconnect);
        tokio::time::sleep(CLOSE_DRAIN).await;
        link.shutdown();
        drop(link);
        self.reset_after_close();
    }

    /// Common bookkeeping once a link is gone, however it went.
    fn reset_after_close(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.capture.is_recording() {
            log::warn!("⚠️ Connection closed mid-capture; partial utterance discarded");
        }
        self.capture.reset();
    }

    fn enter_error(&mut self, reason: String) {
        log::error!("❌ Session error: {}", reason);
        self.reset_after_close();
        self.set_state(ConnectionState::Error(reason));
    }

    fn set_state(&self, state: ConnectionState) {
        log::debug!("🔌 State: {}", state);
        self.snapshot_tx.send_modify(|snap| {
            snap.state = state.clone();
            if state != ConnectionState::Connected {
                snap.status = None;
            }
        });
        (self.observer)(SessionEvent::StateChanged(state));
    }

    /// Encode and queue one command. Failures are logged, not fatal: if the
    /// link is truly gone its Closed event is already on its way to us.
    fn send_frame(&self, link: &Link, command: &OutboundCommand) {
        match command.encode() {
            Ok(frame) => {
                if let Err(e) = link.send(&frame) {
                    log::warn!("📤 Could not queue {:?}: {}", command, e);
                }
            }
            Err(e) => log::error!("📤 Could not encode {:?}: {}", command, e),
        }
    }
}

/// Open the port and probe until the peripheral answers.
///
/// The grace pause lets the firmware finish its boot chatter; frames sent
/// too early land in the boot console and vanish. Everything the device
/// says before its first heartbeat ack is ignored.
async fn establish_link(
    opener: &dyn LinkOpener,
    path: &str,
    timing: &SessionTiming,
) -> Result<(Link, LineFramer), String> {
    let mut link = opener.open(path).await.map_err(|e| e.to_string())?;

    tokio::time::sleep(timing.init_grace).await;

    let probe = OutboundCommand::Heartbeat
        .encode()
        .map_err(|e| e.to_string())?;
    link.send(&probe).map_err(|e| e.to_string())?;
    log::debug!("📤 Sent first heartbeat, waiting for ack");

    let mut framer = LineFramer::new();
    let ack_deadline = Instant::now() + timing.first_ack_window;

    loop {
        let event = match tokio::time::timeout_at(ack_deadline, link.next_event()).await {
            Ok(event) => event,
            Err(_) => return Err("device not responding".to_string()),
        };
        match event {
            Some(LinkEvent::Data(bytes)) => {
                framer.push(&bytes);
                loop {
                    match framer.next_line() {
                        Ok(Some(line)) => {
                            if let Some(InboundMessage::HeartbeatAck) = protocol::decode(&line) {
                                return Ok((link, framer));
                            }
                        }
                        Ok(None) => break,
                        Err(e) => log::debug!("📥 Dropping boot-time frame: {}", e),
                    }
                }
            }
            Some(LinkEvent::Closed { reason }) => {
                return Err(reason.unwrap_or_else(|| "link closed".to_string()));
            }
            None => return Err("link closed".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Error("device not responding".to_string()).to_string(),
            "error: device not responding"
        );
    }

    #[test]
    fn test_snapshot_defaults_to_disconnected() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert!(snapshot.status.is_none());
    }

    #[tokio::test]
    async fn test_handle_commands_fail_after_shutdown() {
        let handle = DeviceSession::new(DockConfig::default()).spawn();
        let commands = handle.commands.clone();
        handle.shutdown().await;

        assert!(commands.send(SessionCommand::RequestStatus).await.is_err());
    }
}
