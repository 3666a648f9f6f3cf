use serde::Serialize;

use super::state::TurnState;
use crate::connection::ConnectionState;

/// UI-facing notifications from a conversation session
///
/// Observers only react to these; they never change turn state themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    TurnChanged { from: TurnState, to: TurnState },
    /// Short status line ("Listening…", "Thinking…")
    Status { text: String },
    /// Current user utterance; `partial` updates overwrite, never append
    Transcript { text: String, partial: bool },
    ResponseDelta { delta: String },
    ResponseText { content: String },
    ToolCall { name: String },
    /// Transient, non-blocking notice such as an upstream error
    Notice { message: String },
    ConnectionChanged { state: ConnectionState },
    MuteChanged { muted: bool },
    PlaybackDrained,
    /// The session could not continue and is shutting down
    Failed { reason: String },
    Stopped,
}
