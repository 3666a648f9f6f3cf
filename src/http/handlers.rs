use super::state::AppState;
use crate::error::SessionError;
use crate::session::{ConversationSession, SessionMode, SessionStats, TranscriptSegment};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartVoiceRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Server origin overriding `server.url`
    pub url: Option<String>,

    pub mode: Option<SessionMode>,

    /// Start with the microphone muted
    pub muted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StartVoiceResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopVoiceResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub session_id: String,
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct TalkRequest {
    pub held: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn no_session() -> Response {
    error_response(StatusCode::NOT_FOUND, "No voice session".to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/start
/// Start a new voice session
pub async fn start_voice(
    State(state): State<AppState>,
    Json(req): Json<StartVoiceRequest>,
) -> impl IntoResponse {
    // Hold the write lock so two starts cannot race
    let mut slot = state.session.write().await;

    if let Some(existing) = slot.as_ref() {
        if !existing.is_stopped() {
            return error_response(
                StatusCode::CONFLICT,
                format!("Voice session {} is already active", existing.session_id()),
            );
        }
    }

    let mut config = match state.config.session_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid session configuration: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Invalid session configuration: {:#}", e),
            );
        }
    };

    if let Some(id) = req.session_id {
        config.session_id = id;
    }
    if let Some(url) = req.url {
        match crate::connection::endpoint(&url, &state.config.server.path) {
            Ok(endpoint) => config.server_url = endpoint,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid url: {}", e));
            }
        }
    }
    if let Some(mode) = req.mode {
        config.mode = mode;
    }
    if let Some(muted) = req.muted {
        config.start_muted = muted;
    }

    info!("Starting voice session: {}", config.session_id);

    let parts = match state.factory.create(&config) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create session: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create session: {:#}", e),
            );
        }
    };

    let session_id = config.session_id.clone();
    let handle = ConversationSession::new(config, parts).spawn();
    *slot = Some(handle);

    (
        StatusCode::OK,
        Json(StartVoiceResponse {
            session_id: session_id.clone(),
            status: "connecting".to_string(),
            message: format!("Voice session {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /voice/stop
/// Stop the voice session and return its final stats
pub async fn stop_voice(State(state): State<AppState>) -> impl IntoResponse {
    let session = {
        let mut slot = state.session.write().await;
        slot.take()
    };

    match session {
        Some(session) => {
            info!("Stopping voice session: {}", session.session_id());
            let stats = session.stop().await;
            (
                StatusCode::OK,
                Json(StopVoiceResponse {
                    session_id: session.session_id().to_string(),
                    status: "stopped".to_string(),
                    message: "Voice session stopped".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        None => no_session(),
    }
}

/// POST /voice/mute
/// Mute or unmute the microphone without releasing it
pub async fn set_mute(
    State(state): State<AppState>,
    Json(req): Json<MuteRequest>,
) -> impl IntoResponse {
    let slot = state.session.read().await;

    let Some(session) = slot.as_ref() else {
        return no_session();
    };

    match session.set_muted(req.muted).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MuteResponse {
                session_id: session.session_id().to_string(),
                muted: req.muted,
            }),
        )
            .into_response(),
        Err(e @ SessionError::Stopped) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /voice/talk
/// Hold or release the talk control in push-to-talk mode
pub async fn set_talk(
    State(state): State<AppState>,
    Json(req): Json<TalkRequest>,
) -> impl IntoResponse {
    let slot = state.session.read().await;

    let Some(session) = slot.as_ref() else {
        return no_session();
    };

    match session.set_talk_held(req.held).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

/// GET /voice/status
/// Get stats of the current voice session
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let slot = state.session.read().await;

    match slot.as_ref() {
        Some(session) => {
            let stats: SessionStats = session.stats().await;
            (StatusCode::OK, Json(stats)).into_response()
        }
        None => no_session(),
    }
}

/// GET /voice/transcript
/// Get the conversation transcript so far
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let slot = state.session.read().await;

    match slot.as_ref() {
        Some(session) => {
            let transcript: Vec<TranscriptSegment> = session.transcript().await;
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => no_session(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
