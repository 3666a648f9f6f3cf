// Shared fakes for integration tests
//
// FakeConnector hands each connection's server side to the test, FakeMic is
// an input device fed from the test, FakeSpeaker records what it rendered.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc};
use voice_session::audio::{codec, CaptureConfig, InputDevice, OutputDevice};
use voice_session::connection::{Connector, Incoming, Link, Outgoing};
use voice_session::session::{SessionFactory, SessionParts};
use voice_session::{
    ConnectionError, ConversationSession, DeviceError, InboundMessage, OutboundMessage,
    ReconnectPolicy, SessionConfig, SessionEvent, TurnState,
};

pub const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Connection
// ============================================================================

/// Server side of one fake connection
pub struct FakeServer {
    pub incoming: mpsc::Sender<Incoming>,
    pub outgoing: mpsc::Receiver<Outgoing>,
}

impl FakeServer {
    pub async fn send(&self, message: &InboundMessage) -> Result<()> {
        self.send_raw(&serde_json::to_string(message)?).await
    }

    pub async fn send_raw(&self, text: &str) -> Result<()> {
        self.incoming
            .send(Incoming::Text(text.to_string()))
            .await
            .map_err(|_| anyhow!("client side of the connection is gone"))
    }

    /// Close from the server side
    pub async fn close(&self) -> Result<()> {
        self.incoming
            .send(Incoming::Closed {
                reason: Some("server restart".to_string()),
            })
            .await
            .map_err(|_| anyhow!("client side of the connection is gone"))
    }

    /// Next message written by the client
    pub async fn next_message(&mut self) -> Result<OutboundMessage> {
        loop {
            match tokio::time::timeout(WAIT, self.outgoing.recv()).await? {
                Some(Outgoing::Text(text)) => return Ok(serde_json::from_str(&text)?),
                Some(Outgoing::Close) => continue,
                None => return Err(anyhow!("connection closed")),
            }
        }
    }

    /// Everything the client has written so far
    pub fn drain(&mut self) -> Vec<Outgoing> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outgoing.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Default)]
struct ConnectorState {
    failures_left: u32,
    attempts: usize,
    /// Handshake time for every attempt after the first
    reconnect_delay: Option<Duration>,
}

/// Connector whose connections are driven by the test
#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
    servers_tx: mpsc::UnboundedSender<FakeServer>,
    servers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            servers_tx,
            servers_rx: Arc::new(tokio::sync::Mutex::new(servers_rx)),
        }
    }

    /// Fail the next `n` connection attempts
    pub fn failing(n: u32) -> Self {
        let connector = Self::new();
        connector.state.lock().unwrap().failures_left = n;
        connector
    }

    /// Reconnects take `delay` to complete; the first connect is immediate
    pub fn slow_reconnects(delay: Duration) -> Self {
        let connector = Self::new();
        connector.state.lock().unwrap().reconnect_delay = Some(delay);
        connector
    }

    /// Connect calls started so far
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Wait for the client to open the next connection
    pub async fn next_server(&self) -> Result<FakeServer> {
        let mut rx = self.servers_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await?
            .ok_or_else(|| anyhow!("connector dropped"))
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(ConnectionError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            if state.attempts > 1 {
                state.reconnect_delay
            } else {
                None
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (outbound, outgoing) = mpsc::channel(64);
        let (incoming, inbound) = mpsc::channel(64);
        let _ = self.servers_tx.send(FakeServer { incoming, outgoing });

        Ok(Link { outbound, inbound })
    }
}

// ============================================================================
// Microphone
// ============================================================================

#[derive(Default)]
struct MicState {
    feed: Option<mpsc::Sender<Vec<f32>>>,
    opens: usize,
    closes: usize,
    fail_with: Option<DeviceError>,
    hang: bool,
}

/// Input device fed by the test
#[derive(Clone, Default)]
pub struct FakeMic {
    state: Arc<Mutex<MicState>>,
}

impl FakeMic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DeviceError) -> Self {
        let mic = Self::new();
        mic.state.lock().unwrap().fail_with = Some(error);
        mic
    }

    /// `open` never resolves
    pub fn hanging() -> Self {
        let mic = Self::new();
        mic.state.lock().unwrap().hang = true;
        mic
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    /// Closes of an open device
    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().feed.is_some()
    }

    /// Push one raw block as if the hardware delivered it
    pub async fn push(&self, samples: Vec<f32>) -> Result<()> {
        let feed = self
            .state
            .lock()
            .unwrap()
            .feed
            .clone()
            .ok_or_else(|| anyhow!("microphone is not open"))?;
        feed.send(samples)
            .await
            .map_err(|_| anyhow!("microphone stream closed"))
    }

    /// Simulate the device disappearing
    pub fn unplug(&self) {
        self.state.lock().unwrap().feed = None;
    }
}

#[async_trait::async_trait]
impl InputDevice for FakeMic {
    async fn open(&mut self, _config: &CaptureConfig) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            if let Some(e) = state.fail_with.clone() {
                return Err(e);
            }
            state.hang
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::channel(64);
        self.state.lock().unwrap().feed = Some(tx);
        Ok(rx)
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.feed.take().is_some() {
            state.closes += 1;
        }
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

// ============================================================================
// Speaker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// A clip of this many samples started
    Started(usize),
    Finished(usize),
    Halted,
}

/// Output device that takes `clip_time` per clip and logs what it rendered
#[derive(Clone)]
pub struct FakeSpeaker {
    log: Arc<Mutex<Vec<Render>>>,
    clip_time: Duration,
    rates: Arc<Mutex<Vec<u32>>>,
}

impl FakeSpeaker {
    pub fn new(clip_time: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            clip_time,
            rates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Vec<Render> {
        self.log.lock().unwrap().clone()
    }

    pub fn rates(&self) -> Vec<u32> {
        self.rates.lock().unwrap().clone()
    }

    /// Wait until the log satisfies `done`
    pub async fn wait_for(&self, done: impl Fn(&[Render]) -> bool) -> Result<Vec<Render>> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let log = self.log();
            if done(&log) {
                return Ok(log);
            }
            if tokio::time::Instant::now() > deadline {
                return Err(anyhow!("speaker never reached the expected state: {:?}", log));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl OutputDevice for FakeSpeaker {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError> {
        self.log.lock().unwrap().push(Render::Started(samples.len()));
        self.rates.lock().unwrap().push(sample_rate);
        tokio::time::sleep(self.clip_time).await;
        self.log.lock().unwrap().push(Render::Finished(samples.len()));
        Ok(())
    }

    fn halt(&mut self) {
        self.log.lock().unwrap().push(Render::Halted);
    }

    fn name(&self) -> &str {
        "fake speaker"
    }
}

// ============================================================================
// Sessions
// ============================================================================

pub struct Fakes {
    pub connector: FakeConnector,
    pub mic: FakeMic,
    pub speaker: FakeSpeaker,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            connector: FakeConnector::new(),
            mic: FakeMic::new(),
            speaker: FakeSpeaker::new(Duration::from_millis(30)),
        }
    }

    pub fn parts(&self) -> SessionParts {
        SessionParts {
            connector: Box::new(self.connector.clone()),
            input: Box::new(self.mic.clone()),
            output: Box::new(self.speaker.clone()),
        }
    }
}

/// Fast retries so reconnect tests run in milliseconds
pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(40),
        max_attempts,
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        session_id: "voice-test".to_string(),
        server_url: "ws://localhost:8000/ws/voice".to_string(),
        capture: CaptureConfig {
            sample_rate: 16000,
            channels: 1,
            frame_samples: 160,
        },
        playback_sample_rate: 24000,
        reconnect: fast_policy(3),
        ..SessionConfig::default()
    }
}

pub fn new_session(
    config: SessionConfig,
    fakes: &Fakes,
) -> (ConversationSession, broadcast::Receiver<SessionEvent>) {
    let session = ConversationSession::new(config, fakes.parts());
    let events = session.subscribe();
    (session, events)
}

/// Wait for an event matching `pred`, returning it
pub async fn wait_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv()).await??;
        if pred(&event) {
            return Ok(event);
        }
    }
}

pub async fn wait_turn(
    events: &mut broadcast::Receiver<SessionEvent>,
    turn: TurnState,
) -> Result<()> {
    wait_event(events, |e| matches!(e, SessionEvent::TurnChanged { to, .. } if *to == turn)).await?;
    Ok(())
}

/// Base64 PCM16 frame of `len` samples at `level`
pub fn pcm_frame(len: usize, level: f32) -> String {
    codec::encode(&vec![level; len])
}

/// Factory for the HTTP API that records the fakes it built
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub built: Arc<Mutex<Vec<(FakeConnector, FakeMic)>>>,
    pub fail: bool,
    pub created: Arc<AtomicUsize>,
}

impl SessionFactory for FakeFactory {
    fn create(&self, _config: &SessionConfig) -> Result<SessionParts> {
        if self.fail {
            return Err(anyhow!("no audio devices"));
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        let fakes = Fakes::new();
        self.built
            .lock()
            .unwrap()
            .push((fakes.connector.clone(), fakes.mic.clone()));
        Ok(fakes.parts())
    }
}
