//! Sample queue between the playback task and a device output callback

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Audio kept queued ahead of the speaker so the next clip lands before an underrun
pub const LOW_WATER_MS: u64 = 40;

/// Samples still buffered when a render hands back to the caller
pub fn low_water_mark(sample_rate: u32) -> usize {
    (u64::from(sample_rate) * LOW_WATER_MS / 1000) as usize
}

/// Mono samples waiting for the output callback
#[derive(Clone, Default)]
pub struct RenderBuffer {
    samples: Arc<Mutex<VecDeque<f32>>>,
    /// Output frames padded with silence because nothing was queued
    underruns: Arc<AtomicUsize>,
}

impl RenderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.extend(samples.iter().copied());
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
    }

    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Wait until at most `low_water` samples are left
    pub async fn drain_to(&self, low_water: usize) {
        while self.len() > low_water {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Copy queued mono samples into every output channel, padding with silence
    ///
    /// Called from the device callback; never waits on the producer.
    pub fn fill<T: Copy>(&self, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        let mut queued = self.samples.lock().ok();
        let mut padded = 0;

        for frame in data.chunks_mut(channels.max(1)) {
            let sample = match queued.as_mut().and_then(|buf| buf.pop_front()) {
                Some(sample) => sample,
                None => {
                    padded += 1;
                    0.0
                }
            };
            let value = convert(sample);
            for out in frame.iter_mut() {
                *out = value;
            }
        }

        if padded > 0 {
            self.underruns.fetch_add(padded, Ordering::Relaxed);
        }
    }
}
