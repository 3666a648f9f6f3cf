use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::SessionEvent;
use super::mode::{DropReason, FrameContext, FrameRoute, SessionMode};
use super::state::TurnState;
use super::stats::{SessionStats, Speaker, TranscriptSegment};
use crate::audio::{
    AudioFrame, CaptureEvent, CapturedFrame, InputDevice, MicrophoneCapture, OutputDevice,
    PlaybackEvent, PlaybackPayload, PlaybackQueue,
};
use crate::barge_in::BargeInGate;
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, Connector, InboundMessage,
    OutboundMessage,
};
use crate::error::{DeviceError, SessionError};

/// The collaborators a session drives
pub struct SessionParts {
    pub connector: Box<dyn Connector>,
    pub input: Box<dyn InputDevice>,
    pub output: Box<dyn OutputDevice>,
}

enum Command {
    Stop { done: Option<oneshot::Sender<()>> },
    SetMuted(bool),
    SetTalkHeld(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Acquire {
    Started,
    Failed(DeviceError),
    Interrupted,
}

struct Snapshot {
    turn: TurnState,
    connection: ConnectionState,
    muted: bool,
    reconnect_attempts: u32,
    last_error: Option<String>,
}

/// State readable from handles while the actor runs
struct Telemetry {
    session_id: String,
    started_at: DateTime<Utc>,
    frames_sent: AtomicUsize,
    frames_dropped: AtomicUsize,
    turns_completed: AtomicUsize,
    snapshot: StdMutex<Snapshot>,
    transcript: Mutex<Vec<TranscriptSegment>>,
}

impl Telemetry {
    fn update(&self, f: impl FnOnce(&mut Snapshot)) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut snapshot);
    }

    async fn record(&self, speaker: Speaker, text: &str) {
        self.transcript.lock().await.push(TranscriptSegment {
            speaker,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn turn(&self) -> TurnState {
        self.snapshot.lock().unwrap_or_else(|p| p.into_inner()).turn
    }

    async fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let transcript_count = self.transcript.lock().await.len();
        let snapshot = self.snapshot.lock().unwrap_or_else(|p| p.into_inner());

        SessionStats {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            turn_state: snapshot.turn,
            connection_state: snapshot.connection,
            muted: snapshot.muted,
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            turns_completed: self.turns_completed.load(Ordering::SeqCst),
            reconnect_attempts: snapshot.reconnect_attempts,
            transcript_segments_count: transcript_count,
            last_error: snapshot.last_error.clone(),
        }
    }
}

/// A voice conversation: one connection, one microphone, one speaker
///
/// Construct with [`ConversationSession::new`], subscribe to events, then
/// [`spawn`](ConversationSession::spawn) it. All state changes happen on the
/// spawned task; the returned [`SessionHandle`] only sends commands.
pub struct ConversationSession {
    config: SessionConfig,
    turn: TurnState,
    connection: ConnectionManager,
    microphone: MicrophoneCapture,
    playback: PlaybackQueue,
    gate: BargeInGate,
    mode: SessionMode,
    talk_held: bool,
    /// The server has finished sending audio for the current response
    response_audio_complete: bool,
    /// Latest transcript of the user utterance in progress
    current_utterance: String,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    deferred: VecDeque<Command>,
    stop_waiters: Vec<oneshot::Sender<()>>,
    events: broadcast::Sender<SessionEvent>,
    telemetry: Arc<Telemetry>,
}

impl ConversationSession {
    /// Create a session. Must be called inside a Tokio runtime.
    pub fn new(config: SessionConfig, parts: SessionParts) -> Self {
        info!("Creating voice session: {}", config.session_id);

        let connection = ConnectionManager::new(
            config.server_url.clone(),
            parts.connector,
            config.reconnect.clone(),
        );
        let microphone = MicrophoneCapture::new(parts.input, config.capture.clone());
        microphone.set_muted(config.start_muted);
        let playback = PlaybackQueue::new(parts.output, config.playback_sample_rate);

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events, _) = broadcast::channel(256);

        let telemetry = Arc::new(Telemetry {
            session_id: config.session_id.clone(),
            started_at: Utc::now(),
            frames_sent: AtomicUsize::new(0),
            frames_dropped: AtomicUsize::new(0),
            turns_completed: AtomicUsize::new(0),
            snapshot: StdMutex::new(Snapshot {
                turn: TurnState::Connecting,
                connection: ConnectionState::Disconnected,
                muted: config.start_muted,
                reconnect_attempts: 0,
                last_error: None,
            }),
            transcript: Mutex::new(Vec::new()),
        });

        Self {
            gate: BargeInGate::new(config.barge_in_threshold),
            mode: config.mode,
            config,
            turn: TurnState::Connecting,
            connection,
            microphone,
            playback,
            talk_held: false,
            response_audio_complete: false,
            current_utterance: String::new(),
            commands_tx,
            commands_rx,
            deferred: VecDeque::new(),
            stop_waiters: Vec::new(),
            events,
            telemetry,
        }
    }

    /// Receive events from the moment of subscription
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start the session on its own task
    pub fn spawn(self) -> SessionHandle {
        let session_id = self.config.session_id.clone();
        let commands = self.commands_tx.clone();
        let events = self.events.clone();
        let telemetry = Arc::clone(&self.telemetry);

        let task = tokio::spawn(self.run());

        SessionHandle {
            session_id,
            commands,
            events,
            telemetry,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        info!("Voice session {} connecting to {}", self.config.session_id, self.connection.url());

        // Only handles may keep the command channel open
        let (closed_tx, _) = mpsc::channel(1);
        self.commands_tx = closed_tx;

        self.status(TurnState::Connecting.label());
        self.connection.start();
        self.sync_connection_state();

        loop {
            if let Some(command) = self.deferred.pop_front() {
                if self.handle_command(command) == Flow::Stop {
                    break;
                }
                continue;
            }

            let flow = tokio::select! {
                biased;

                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All session handles dropped");
                        self.handle_command(Command::Stop { done: None })
                    }
                },

                event = self.playback.next_event() => self.on_playback_event(event),

                captured = self.microphone.next_frame() => self.on_capture(captured),

                event = self.connection.next_event() => self.on_connection_event(event).await,
            };

            if flow == Flow::Stop {
                break;
            }
        }

        // Late stop requests are answered too
        self.commands_rx.close();
        while let Ok(command) = self.commands_rx.try_recv() {
            if let Command::Stop { done: Some(done) } = command {
                self.stop_waiters.push(done);
            }
        }
        for done in self.stop_waiters.drain(..) {
            let _ = done.send(());
        }

        info!("Voice session {} finished", self.config.session_id);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Stop { done } => {
                if let Some(done) = done {
                    self.stop_waiters.push(done);
                }
                self.teardown();
                Flow::Stop
            }
            Command::SetMuted(muted) => {
                self.microphone.set_muted(muted);
                self.telemetry.update(|s| s.muted = muted);
                self.emit(SessionEvent::MuteChanged { muted });
                Flow::Continue
            }
            Command::SetTalkHeld(held) => {
                if self.mode != SessionMode::PushToTalk {
                    debug!("Talk control ignored outside push-to-talk mode");
                }
                self.talk_held = held;
                Flow::Continue
            }
        }
    }

    /// Full shutdown sequence; runs at most once
    fn teardown(&mut self) {
        if self.turn == TurnState::Stopped {
            return;
        }

        info!("Stopping voice session: {}", self.config.session_id);

        if self.connection.is_connected() {
            if let Err(e) = self.connection.send(&OutboundMessage::Stop) {
                warn!("Failed to send stop notice: {}", e);
            }
        }

        self.playback.flush();
        self.microphone.stop();
        self.connection.disconnect();

        self.sync_connection_state();
        self.set_turn(TurnState::Stopped);
        self.status(TurnState::Stopped.label());
        self.emit(SessionEvent::Stopped);
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    async fn on_connection_event(&mut self, event: ConnectionEvent) -> Flow {
        match event {
            ConnectionEvent::Opened => {
                self.sync_connection_state();
                self.status("Connected, waiting for the assistant…");
                Flow::Continue
            }
            ConnectionEvent::Message(text) => match InboundMessage::parse(&text) {
                Ok(message) => self.on_inbound(message).await,
                Err(e) => {
                    warn!("Ignoring malformed message: {}", e);
                    Flow::Continue
                }
            },
            other => self.on_link_change(other),
        }
    }

    /// Reconnect scheduling and terminal failure
    fn on_link_change(&mut self, event: ConnectionEvent) -> Flow {
        match event {
            ConnectionEvent::Reconnecting { attempt, delay } => {
                self.playback.flush();
                self.reset_response();
                self.current_utterance.clear();
                self.set_turn(TurnState::Connecting);
                self.sync_connection_state();
                self.status(&format!(
                    "Connection lost, retrying in {}s (attempt {})",
                    delay.as_secs_f32().ceil(),
                    attempt
                ));
                Flow::Continue
            }
            ConnectionEvent::Failed(e) => {
                error!("Voice session {} failed: {}", self.config.session_id, e);
                self.fail(SessionError::from(e).to_string());
                Flow::Stop
            }
            ConnectionEvent::Opened | ConnectionEvent::Message(_) => Flow::Continue,
        }
    }

    async fn on_inbound(&mut self, message: InboundMessage) -> Flow {
        debug!("Inbound {} in {:?}", message.kind(), self.turn);

        match message {
            InboundMessage::Ready => {
                if self.turn != TurnState::Connecting {
                    debug!("Ignoring ready outside Connecting");
                    return Flow::Continue;
                }

                match self.acquire_microphone().await {
                    Acquire::Started => {
                        self.set_turn(TurnState::Listening);
                        self.status(TurnState::Listening.label());
                    }
                    Acquire::Failed(e) => {
                        self.notice(&format!("Microphone unavailable ({})", e.cause()));
                        self.fail(SessionError::from(e).to_string());
                        return Flow::Stop;
                    }
                    Acquire::Interrupted => {}
                }
            }

            InboundMessage::UserSpeaking => {
                if self.turn.accepts_user_speech() {
                    // Barge-in: cut the assistant off before anything else is queued
                    self.playback.flush();
                    self.reset_response();
                    self.current_utterance.clear();
                    self.set_turn(TurnState::UserSpeaking);
                    self.status(TurnState::UserSpeaking.label());
                }
            }

            InboundMessage::UserStopped => {
                if self.turn == TurnState::UserSpeaking {
                    self.set_turn(TurnState::Processing);
                    self.status(TurnState::Processing.label());
                }
            }

            InboundMessage::Interim { text } => {
                self.current_utterance = text.clone();
                self.emit(SessionEvent::Transcript {
                    text,
                    partial: true,
                });
            }

            InboundMessage::Transcript { text } => {
                self.current_utterance = text.clone();
                self.telemetry.record(Speaker::User, &text).await;
                self.emit(SessionEvent::Transcript {
                    text,
                    partial: false,
                });
            }

            InboundMessage::Processing { message } => {
                if matches!(self.turn, TurnState::Listening | TurnState::UserSpeaking) {
                    self.set_turn(TurnState::Processing);
                }
                let text = message.unwrap_or_else(|| TurnState::Processing.label().to_string());
                self.status(&text);
            }

            InboundMessage::TextDelta { delta } => {
                self.emit(SessionEvent::ResponseDelta { delta });
            }

            InboundMessage::Text { content } => {
                self.begin_response();
                self.telemetry.record(Speaker::Assistant, &content).await;
                self.emit(SessionEvent::ResponseText { content });
            }

            InboundMessage::TtsStart => {
                self.response_audio_complete = false;
                self.playback.begin_utterance();
            }

            InboundMessage::AudioChunk { data } => {
                self.begin_response();
                self.playback.push_fragment(&data);
            }

            InboundMessage::AudioDelta { data } => {
                self.begin_response();
                match AudioFrame::from_transport(&data, self.config.playback_sample_rate, 1) {
                    Ok(frame) => {
                        if let Err(e) = self.playback.enqueue(PlaybackPayload::Streamed(frame)) {
                            warn!("Dropping streamed audio: {}", e);
                        }
                    }
                    Err(e) => warn!("Dropping undecodable audio delta: {}", e),
                }
            }

            InboundMessage::AudioDone => {
                self.response_audio_complete = true;
                self.complete_utterance();
                if self.turn == TurnState::Speaking && !self.playback.is_playing() {
                    self.finish_turn();
                }
            }

            InboundMessage::ToolCall { name } => {
                info!("Assistant is using tool: {}", name);
                self.emit(SessionEvent::ToolCall { name });
            }

            InboundMessage::Done => {
                // An unfinished chunked utterance is complete once the turn is
                if self.playback.has_open_utterance() {
                    self.complete_utterance();
                }
                self.response_audio_complete = true;
                self.finish_turn();
            }

            InboundMessage::Error { message } => {
                warn!("Server reported error: {}", message);
                let message = if message.is_empty() {
                    "The assistant reported an error".to_string()
                } else {
                    message
                };
                self.notice(&message);
                self.playback.flush();
                self.reset_response();
                if self.connection.is_connected() && self.turn != TurnState::Connecting {
                    self.set_turn(TurnState::Listening);
                    self.status(TurnState::Listening.label());
                }
            }

            InboundMessage::Disconnected => {
                let event = self.connection.drop_and_retry("server reported disconnect");
                return self.on_link_change(event);
            }
        }

        Flow::Continue
    }

    /// Start the microphone, giving way to a stop request meanwhile
    async fn acquire_microphone(&mut self) -> Acquire {
        if self.microphone.is_capturing() {
            return Acquire::Started;
        }

        self.status("Requesting microphone…");

        let start = self.microphone.start();
        tokio::pin!(start);

        let result = loop {
            tokio::select! {
                result = &mut start => break Some(result),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Stop { done }) => {
                        self.deferred.push_back(Command::Stop { done });
                        break None;
                    }
                    None => {
                        self.deferred.push_back(Command::Stop { done: None });
                        break None;
                    }
                    Some(other) => self.deferred.push_back(other),
                },
            }
        };

        match result {
            Some(Ok(())) => Acquire::Started,
            Some(Err(e)) => Acquire::Failed(e),
            None => {
                info!("Microphone acquisition cancelled");
                Acquire::Interrupted
            }
        }
    }

    // ------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------

    fn on_capture(&mut self, captured: CaptureEvent) -> Flow {
        match captured {
            CaptureEvent::Frame(frame) => self.route_frame(frame),
            CaptureEvent::Ended => {
                self.notice("Microphone disconnected");
            }
        }
        Flow::Continue
    }

    fn route_frame(&mut self, captured: CapturedFrame) {
        let ctx = FrameContext {
            turn: self.turn,
            playback_active: self.playback.is_playing(),
            rms: captured.rms,
            talk_held: self.talk_held,
        };

        match self.mode.route(&self.gate, &ctx) {
            FrameRoute::Send => {
                let message = OutboundMessage::Audio {
                    data: captured.frame.to_transport(),
                };
                match self.connection.send(&message) {
                    Ok(()) => {
                        self.telemetry.frames_sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        debug!("Frame {} not sent: {}", captured.frame.sequence, e);
                        self.telemetry.frames_dropped.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            FrameRoute::Drop(reason) => {
                if reason == DropReason::Echo {
                    debug!(
                        "Dropped frame {} as echo (rms {:.3})",
                        captured.frame.sequence, captured.rms
                    );
                }
                self.telemetry.frames_dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) -> Flow {
        match event {
            PlaybackEvent::Drained { notify_server } => {
                self.emit(SessionEvent::PlaybackDrained);

                if notify_server {
                    if let Err(e) = self.connection.send(&OutboundMessage::PlaybackDone) {
                        warn!("Failed to report playback completion: {}", e);
                    }
                }

                if self.turn == TurnState::Speaking && self.response_audio_complete {
                    self.finish_turn();
                }
            }
            PlaybackEvent::DeviceError(e) => {
                self.notice(&format!("Playback failed ({})", e.cause()));
            }
        }
        Flow::Continue
    }

    fn complete_utterance(&mut self) {
        if let Err(e) = self.playback.complete_utterance() {
            warn!("Dropping undecodable synthesized clip: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Turn bookkeeping
    // ------------------------------------------------------------------

    /// First response payload moves Processing to Speaking
    fn begin_response(&mut self) {
        if self.turn == TurnState::Processing {
            self.response_audio_complete = false;
            self.set_turn(TurnState::Speaking);
            self.status(TurnState::Speaking.label());
        }
    }

    fn finish_turn(&mut self) {
        if !self.turn.in_response() {
            return;
        }

        self.telemetry.turns_completed.fetch_add(1, Ordering::SeqCst);
        self.reset_response();
        self.set_turn(TurnState::Listening);
        self.status(TurnState::Listening.label());
    }

    fn reset_response(&mut self) {
        self.response_audio_complete = false;
    }

    fn set_turn(&mut self, to: TurnState) {
        if self.turn == to {
            return;
        }

        let from = self.turn;
        self.turn = to;
        info!("Turn {:?} -> {:?}", from, to);
        self.telemetry.update(|s| s.turn = to);
        self.emit(SessionEvent::TurnChanged { from, to });
    }

    fn fail(&mut self, reason: String) {
        self.telemetry.update(|s| s.last_error = Some(reason.clone()));
        self.emit(SessionEvent::Failed { reason });
        self.teardown();
    }

    fn sync_connection_state(&mut self) {
        let state = self.connection.state();
        let attempts = self.connection.attempts();
        let changed = {
            let mut changed = false;
            self.telemetry.update(|s| {
                changed = s.connection != state;
                s.connection = state;
                s.reconnect_attempts = attempts;
            });
            changed
        };

        if changed {
            self.emit(SessionEvent::ConnectionChanged { state });
        }
    }

    fn status(&self, text: &str) {
        self.emit(SessionEvent::Status {
            text: text.to_string(),
        });
    }

    fn notice(&self, message: &str) {
        self.emit(SessionEvent::Notice {
            message: message.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Cheap, cloneable control surface for a running session
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    telemetry: Arc<Telemetry>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn turn_state(&self) -> TurnState {
        self.telemetry.turn()
    }

    pub fn is_stopped(&self) -> bool {
        self.turn_state() == TurnState::Stopped || self.commands.is_closed()
    }

    /// Stop the session and wait for teardown. Safe to call repeatedly.
    pub async fn stop(&self) -> SessionStats {
        let (done_tx, done_rx) = oneshot::channel();

        if self
            .commands
            .send(Command::Stop {
                done: Some(done_tx),
            })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }

        self.join().await;
        self.stats().await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        self.commands
            .send(Command::SetMuted(muted))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    /// Hold or release the talk control (push-to-talk mode)
    pub async fn set_talk_held(&self, held: bool) -> Result<(), SessionError> {
        self.commands
            .send(Command::SetTalkHeld(held))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    /// Wait until the session task has finished
    pub async fn join(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Session task panicked: {}", e);
            }
        }
    }

    pub async fn stats(&self) -> SessionStats {
        self.telemetry.stats().await
    }

    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        self.telemetry.transcript.lock().await.clone()
    }
}
