use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::TurnState;
use crate::connection::ConnectionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    pub turn_state: TurnState,

    pub connection_state: ConnectionState,

    pub muted: bool,

    /// Microphone frames sent to the server
    pub frames_sent: usize,

    /// Microphone frames held back (echo gate, wrong turn, not connected)
    pub frames_dropped: usize,

    /// Completed listen → respond cycles
    pub turns_completed: usize,

    /// Consecutive reconnect attempts in progress
    pub reconnect_attempts: u32,

    pub transcript_segments_count: usize,

    /// Why the session failed, if it did
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One finished utterance of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Speaker,

    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}
