use serde::{Deserialize, Serialize};

/// Where the conversation is in its listen → think → respond cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for the server to report it is ready
    Connecting,
    Listening,
    UserSpeaking,
    /// The server is working on a response; no audio is sent
    Processing,
    Speaking,
    Stopped,
}

impl TurnState {
    /// Whether microphone frames may be sent in this state
    pub fn sends_audio(self) -> bool {
        matches!(self, Self::Listening | Self::UserSpeaking | Self::Speaking)
    }

    /// Whether a `user_speaking` event starts a new user utterance
    pub fn accepts_user_speech(self) -> bool {
        matches!(self, Self::Listening | Self::Processing | Self::Speaking)
    }

    /// Whether the server is producing a response
    pub fn in_response(self) -> bool {
        matches!(self, Self::Processing | Self::Speaking)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting…",
            Self::Listening => "Listening…",
            Self::UserSpeaking => "Hearing you…",
            Self::Processing => "Thinking…",
            Self::Speaking => "Speaking…",
            Self::Stopped => "Voice mode off",
        }
    }
}
