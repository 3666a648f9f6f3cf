use thiserror::Error;

/// Why an audio device could not be acquired or kept open
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission to use the audio device was denied")]
    PermissionDenied,

    #[error("no audio device found")]
    DeviceNotFound,

    #[error("audio device is busy")]
    Busy,

    #[error("audio device error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Short machine-readable cause, used in notices and the HTTP API
    pub fn cause(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::DeviceNotFound => "device_not_found",
            Self::Busy => "device_busy",
            Self::Other(_) => "other",
        }
    }
}

/// Errors from the duplex connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("outbound channel is full")]
    Backpressure,

    #[error("failed to encode outbound message: {0}")]
    Encode(String),

    #[error("connection failed after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Errors from audio payload decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),

    #[error("failed to decode WAV clip: {0}")]
    Wav(#[from] hound::Error),

    #[error("failed to decode audio clip: {0}")]
    Clip(String),

    #[error("audio clip is empty")]
    Empty,
}

/// Errors surfaced by a conversation session to its owner
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("session has already stopped")]
    Stopped,
}
