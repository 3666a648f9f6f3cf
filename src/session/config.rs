use crate::audio::CaptureConfig;
use crate::barge_in::DEFAULT_THRESHOLD;
use crate::connection::{ReconnectPolicy, VOICE_PATH};

use super::mode::SessionMode;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-6f1c…")
    pub session_id: String,

    /// WebSocket address of the voice endpoint
    pub server_url: String,

    /// Microphone format and frame size
    pub capture: CaptureConfig,

    /// Sample rate of streamed assistant audio (and container-less clips)
    pub playback_sample_rate: u32,

    /// RMS below which frames are treated as echo during playback
    pub barge_in_threshold: f32,

    pub reconnect: ReconnectPolicy,

    pub mode: SessionMode,

    /// Start with the microphone muted
    pub start_muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            server_url: format!("ws://localhost:8000{VOICE_PATH}"),
            capture: CaptureConfig::default(),
            playback_sample_rate: 24000,
            barge_in_threshold: DEFAULT_THRESHOLD,
            reconnect: ReconnectPolicy::default(),
            mode: SessionMode::HandsFree,
            start_muted: false,
        }
    }
}
