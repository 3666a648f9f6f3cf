//! Barge-in gate
//!
//! While the assistant is speaking, the microphone also hears the speaker.
//! Echo of the assistant's own voice typically lands around 0.01-0.03 RMS,
//! direct speech at 0.05 and above. Frames below the threshold are dropped
//! while playback is active; everything passes once playback stops.
//!
//! The decision is recomputed per frame with no hysteresis, so a quiet frame
//! right at the playback/silence boundary can be dropped, but no delay is
//! added to the first words of an interruption.

use serde::{Deserialize, Serialize};

/// Default RMS threshold separating echo from direct speech
pub const DEFAULT_THRESHOLD: f32 = 0.04;

/// Outcome for one microphone frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BargeInGate {
    /// Minimum RMS energy for a frame to pass while playback is active
    pub threshold: f32,
}

impl BargeInGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn admit(&self, playback_active: bool, rms: f32) -> GateDecision {
        if playback_active && rms < self.threshold {
            GateDecision::Drop
        } else {
            GateDecision::Pass
        }
    }
}

impl Default for BargeInGate {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
