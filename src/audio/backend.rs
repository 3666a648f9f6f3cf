use std::sync::Arc;

use tokio::sync::mpsc;

use super::codec;
use crate::error::DeviceError;

/// An immutable block of 16-bit PCM audio
///
/// Produced by the microphone at a steady cadence or decoded from an inbound
/// streamed payload. Frames are cheap to clone; the sample buffer is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    samples: Arc<[i16]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Position of this frame in its stream (capture order or arrival order)
    pub sequence: u64,
    /// Milliseconds since the stream started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence: 0,
            timestamp_ms: 0,
        }
    }

    /// Build a frame by quantizing normalized samples
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        let pcm: Vec<i16> = samples.iter().map(|&s| codec::quantize(s)).collect();
        Self::new(pcm, sample_rate, channels)
    }

    /// Decode a frame from base64 PCM16 transport text
    pub fn from_transport(
        text: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, crate::error::CodecError> {
        Ok(Self::new(codec::decode_pcm16(text)?, sample_rate, channels))
    }

    pub fn with_position(mut self, sequence: u64, timestamp_ms: u64) -> Self {
        self.sequence = sequence;
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in the normalized [-1, 1] range
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| codec::dequantize(s)).collect()
    }

    /// Base64 PCM16 transport text for this frame
    pub fn to_transport(&self) -> String {
        codec::encode_pcm16(&self.samples)
    }

    pub fn rms(&self) -> f32 {
        codec::rms_pcm16(&self.samples)
    }

    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / u64::from(self.channels.max(1));
        per_channel * 1000 / u64::from(self.sample_rate.max(1))
    }
}

/// Capture device configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Requested channel count
    pub channels: u16,
    /// Samples per emitted frame (per channel)
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            frame_samples: 4096, // ~170ms at 24kHz
        }
    }
}

/// Audio input device
///
/// Implementations push raw sample blocks of any size into the returned
/// channel; `MicrophoneCapture` re-windows them into fixed frames.
#[async_trait::async_trait]
pub trait InputDevice: Send {
    /// Acquire the device and start streaming normalized samples
    async fn open(&mut self, config: &CaptureConfig) -> Result<mpsc::Receiver<Vec<f32>>, DeviceError>;

    /// Release the device. Must be safe to call when not open.
    fn close(&mut self);

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Audio output device
///
/// Owned by the playback queue's consumer task; only one clip is rendered at a
/// time.
#[async_trait::async_trait]
pub trait OutputDevice: Send {
    /// Render a clip, resolving once it has finished playing.
    ///
    /// Buffered devices may resolve while the tail is still queued, as long
    /// as enough remains for the next clip to follow without a gap. The
    /// future may be dropped mid-render; `halt` is called right after.
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError>;

    /// Silence any audio still being rendered
    fn halt(&mut self);

    /// Device name for logging
    fn name(&self) -> &str;
}
