//! HTTP API server for external control (editor plugins, hotkeys)
//!
//! This module provides a REST API for controlling the voice session:
//! - POST /voice/start - Start a voice session
//! - POST /voice/stop - Stop it and return final stats
//! - POST /voice/mute - Mute or unmute the microphone
//! - POST /voice/talk - Hold or release push-to-talk
//! - GET /voice/status - Query session stats
//! - GET /voice/transcript - Get the conversation so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
