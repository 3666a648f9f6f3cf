//! Microphone and speaker access through cpal
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its
//! own thread and is dropped there when the device is released.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BackendSpecificError, SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::backend::{CaptureConfig, InputDevice, OutputDevice};
use super::codec;
use super::device_thread::DeviceThread;
use super::render::{low_water_mark, RenderBuffer};
use crate::error::DeviceError;

/// Default system microphone
#[derive(Default)]
pub struct CpalInput {
    thread: DeviceThread,
}

impl CpalInput {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InputDevice for CpalInput {
    async fn open(&mut self, config: &CaptureConfig) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError> {
        let (samples_tx, samples_rx) = mpsc::channel(64);
        let config = config.clone();

        self.thread
            .spawn("mic-capture", move || build_input_stream(&config, samples_tx))
            .await?;

        Ok(samples_rx)
    }

    fn close(&mut self) {
        if self.thread.is_running() {
            self.thread.stop();
            debug!("Microphone released");
        }
    }

    fn name(&self) -> &str {
        "cpal default input"
    }
}

fn build_input_stream(
    config: &CaptureConfig,
    samples_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(DeviceError::DeviceNotFound)?;
    let rate = SampleRate(config.sample_rate);

    let supported = device
        .supported_input_configs()
        .map_err(|e| map_device_error(&e.to_string()))?
        .find(|c| {
            c.channels() == config.channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .ok_or_else(|| {
            DeviceError::Other(format!(
                "no input config for {}Hz {} channels",
                config.sample_rate, config.channels
            ))
        })?
        .with_sample_rate(rate);

    let format = supported.sample_format();
    let stream_config: StreamConfig = supported.config();

    info!(
        "Opening microphone {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_default(),
        config.sample_rate,
        config.channels,
        format
    );

    let on_error = |err| error!("Microphone stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| forward(&samples_tx, data.to_vec()),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                forward(&samples_tx, data.iter().map(|&s| codec::dequantize(s)).collect())
            },
            on_error,
            None,
        ),
        other => {
            return Err(DeviceError::Other(format!(
                "unsupported input sample format {other:?}"
            )))
        }
    }
    .map_err(map_build_error)?;

    stream.play().map_err(|e| map_device_error(&e.to_string()))?;

    Ok(stream)
}

fn forward(tx: &mpsc::Sender<Vec<f32>>, block: Vec<f32>) {
    if block.is_empty() {
        return;
    }
    // Never block the device callback; a full channel drops the block
    let _ = tx.try_send(block);
}

/// Default system speaker
pub struct CpalOutput {
    buffer: RenderBuffer,
    stream_rate: Option<u32>,
    thread: DeviceThread,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            buffer: RenderBuffer::new(),
            stream_rate: None,
            thread: DeviceThread::new(),
        }
    }

    async fn ensure_stream(&mut self, sample_rate: u32) -> Result<(), DeviceError> {
        if self.stream_rate == Some(sample_rate) && self.thread.is_running() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        self.thread
            .spawn("speaker", move || build_output_stream(sample_rate, buffer))
            .await?;
        self.stream_rate = Some(sample_rate);

        Ok(())
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OutputDevice for CpalOutput {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError> {
        self.ensure_stream(sample_rate).await?;

        self.buffer.push(samples);
        // Hand back early so the next clip is queued before the speaker runs dry
        self.buffer.drain_to(low_water_mark(sample_rate)).await;

        Ok(())
    }

    fn halt(&mut self) {
        self.buffer.clear();
    }

    fn name(&self) -> &str {
        "cpal default output"
    }
}

fn build_output_stream(
    sample_rate: u32,
    buffer: RenderBuffer,
) -> Result<Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::DeviceNotFound)?;
    let rate = SampleRate(sample_rate);

    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| DeviceError::Other(format!("no output config for {sample_rate}Hz")))?
        .with_sample_rate(rate);

    let format = supported.sample_format();
    let stream_config: StreamConfig = supported.config();
    let channels = usize::from(stream_config.channels);

    info!(
        "Opening speaker {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_default(),
        sample_rate,
        channels,
        format
    );

    let on_error = |err| error!("Speaker stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                buffer.fill(data, channels, |s| s);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                buffer.fill(data, channels, codec::quantize);
            },
            on_error,
            None,
        ),
        other => {
            return Err(DeviceError::Other(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    }
    .map_err(map_build_error)?;

    stream.play().map_err(|e| map_device_error(&e.to_string()))?;

    Ok(stream)
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::DeviceNotFound,
        cpal::BuildStreamError::BackendSpecific {
            err: BackendSpecificError { description },
        } => map_device_error(&description),
        other => DeviceError::Other(other.to_string()),
    }
}

/// Classify a backend message; cpal has no dedicated permission variant
fn map_device_error(description: &str) -> DeviceError {
    let lower = description.to_lowercase();

    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        DeviceError::PermissionDenied
    } else if lower.contains("busy") || lower.contains("in use") {
        DeviceError::Busy
    } else if lower.contains("not available") || lower.contains("no such device") {
        DeviceError::DeviceNotFound
    } else {
        DeviceError::Other(description.to_string())
    }
}
