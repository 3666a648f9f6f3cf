use serde::{Deserialize, Serialize};

/// Messages sent to the voice server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// One microphone frame, base64 PCM16 LE
    Audio { data: String },
    /// The user ended voice mode
    Stop,
    /// A chunked synthesis turn finished playing; the server may listen again
    PlaybackDone,
}

/// Messages received from the voice server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ready,
    UserSpeaking,
    UserStopped,
    /// Partial transcript of the current utterance
    Interim { text: String },
    /// Final transcript of the current utterance
    Transcript { text: String },
    Processing {
        #[serde(default)]
        message: Option<String>,
    },
    TextDelta { delta: String },
    Text { content: String },
    TtsStart,
    /// Fragment of a chunked clip
    AudioChunk { data: String },
    /// One streamed PCM16 frame
    AudioDelta { data: String },
    AudioDone,
    ToolCall { name: String },
    Done,
    Error {
        #[serde(default)]
        message: String,
    },
    Disconnected,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::UserSpeaking => "user_speaking",
            Self::UserStopped => "user_stopped",
            Self::Interim { .. } => "interim",
            Self::Transcript { .. } => "transcript",
            Self::Processing { .. } => "processing",
            Self::TextDelta { .. } => "text_delta",
            Self::Text { .. } => "text",
            Self::TtsStart => "tts_start",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::AudioDelta { .. } => "audio_delta",
            Self::AudioDone => "audio_done",
            Self::ToolCall { .. } => "tool_call",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Disconnected => "disconnected",
        }
    }
}
