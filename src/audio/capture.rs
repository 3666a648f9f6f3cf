use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureConfig, InputDevice};
use super::codec;
use crate::error::DeviceError;

/// Capture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// A fixed-size microphone frame and its RMS energy
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    pub rms: f32,
}

/// What the capture produced next
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Frame(CapturedFrame),
    /// The device stream ended on its own; capture is `Idle` again
    Ended,
}

/// Microphone capture that emits fixed-size frames
///
/// Owns the input device exclusively. Frames are delivered through a bounded
/// channel read with [`MicrophoneCapture::next_frame`].
pub struct MicrophoneCapture {
    device: Box<dyn InputDevice>,
    config: CaptureConfig,
    muted: Arc<AtomicBool>,
    frames_rx: Option<mpsc::Receiver<CapturedFrame>>,
    window_task: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    pub fn new(device: Box<dyn InputDevice>, config: CaptureConfig) -> Self {
        Self {
            device,
            config,
            muted: Arc::new(AtomicBool::new(false)),
            frames_rx: None,
            window_task: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.frames_rx.is_some() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Acquire the input device and start emitting frames
    ///
    /// On failure the device is released again and the capture stays `Idle`.
    pub async fn start(&mut self) -> Result<(), DeviceError> {
        if self.is_capturing() {
            debug!("Microphone already capturing");
            return Ok(());
        }

        info!(
            "Starting microphone capture on {} ({}Hz, {} channels, {} samples/frame)",
            self.device.name(),
            self.config.sample_rate,
            self.config.channels,
            self.config.frame_samples
        );

        let raw_rx = match self.device.open(&self.config).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to acquire microphone ({}): {}", e.cause(), e);
                self.device.close();
                return Err(e);
            }
        };

        let (frames_tx, frames_rx) = mpsc::channel(32);
        let config = self.config.clone();
        let muted = Arc::clone(&self.muted);

        self.window_task = Some(tokio::spawn(async move {
            window_frames(raw_rx, frames_tx, config, muted).await;
        }));
        self.frames_rx = Some(frames_rx);

        info!("Microphone capture started");

        Ok(())
    }

    /// Next captured frame, or `Ended` if the device stream stopped
    ///
    /// Pending forever while idle. Cancel-safe.
    pub async fn next_frame(&mut self) -> CaptureEvent {
        let Some(rx) = self.frames_rx.as_mut() else {
            return std::future::pending().await;
        };

        match rx.recv().await {
            Some(frame) => CaptureEvent::Frame(frame),
            None => {
                warn!("Microphone stream ended");
                self.release();
                CaptureEvent::Ended
            }
        }
    }

    /// Release the device. Returns `false` if already idle.
    pub fn stop(&mut self) -> bool {
        if !self.is_capturing() {
            return false;
        }

        self.release();
        info!("Microphone capture stopped");
        true
    }

    /// Mute without tearing down the device; muted frames are discarded
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        info!("Microphone {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn release(&mut self) {
        if let Some(task) = self.window_task.take() {
            task.abort();
        }
        self.frames_rx = None;
        self.device.close();
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        if self.is_capturing() {
            self.release();
        }
    }
}

/// Re-window raw device blocks into fixed-size frames
async fn window_frames(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    frames_tx: mpsc::Sender<CapturedFrame>,
    config: CaptureConfig,
    muted: Arc<AtomicBool>,
) {
    let window = config.frame_samples.max(1) * usize::from(config.channels.max(1));
    let frame_ms = config.frame_samples as u64 * 1000 / u64::from(config.sample_rate.max(1));
    let mut pending: Vec<f32> = Vec::with_capacity(window * 2);
    let mut sequence: u64 = 0;

    while let Some(block) = raw_rx.recv().await {
        pending.extend_from_slice(&block);

        while pending.len() >= window {
            let samples: Vec<f32> = pending.drain(..window).collect();
            let seq = sequence;
            sequence += 1;

            if muted.load(Ordering::SeqCst) {
                continue;
            }

            let rms = codec::rms(&samples);
            let frame = AudioFrame::from_f32(&samples, config.sample_rate, config.channels)
                .with_position(seq, seq * frame_ms);

            if frames_tx.send(CapturedFrame { frame, rms }).await.is_err() {
                debug!("Frame receiver dropped, stopping windowing");
                return;
            }
        }
    }

    debug!("Raw microphone stream closed after {} frames", sequence);
}
