pub mod audio;
pub mod barge_in;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod session;

pub use audio::{
    AudioFrame, CaptureConfig, InputDevice, MicrophoneCapture, OutputDevice, PlaybackPayload,
    PlaybackQueue,
};
pub use barge_in::{BargeInGate, GateDecision};
pub use config::Config;
pub use connection::{
    ConnectionManager, ConnectionState, Connector, InboundMessage, OutboundMessage,
    ReconnectPolicy, WebSocketConnector,
};
pub use error::{CodecError, ConnectionError, DeviceError, SessionError};
pub use http::{create_router, AppState};
pub use session::{
    ConversationSession, SessionConfig, SessionEvent, SessionHandle, SessionMode, SessionParts,
    SessionStats, TranscriptSegment, TurnState,
};
