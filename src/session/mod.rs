//! Conversation session management
//!
//! This module provides the `ConversationSession` actor that ties together:
//! - The duplex connection to the voice server, with reconnects
//! - Microphone capture and echo gating
//! - Ordered playback of assistant audio, with barge-in flushes
//! - The turn state machine and UI events
//! - Session statistics and transcript collection

mod config;
mod events;
mod factory;
mod mode;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use events::SessionEvent;
pub use factory::{SessionFactory, SystemSessionFactory};
pub use mode::{DropReason, FrameContext, FrameRoute, SessionMode};
pub use session::{ConversationSession, SessionHandle, SessionParts};
pub use state::TurnState;
pub use stats::{SessionStats, Speaker, TranscriptSegment};
