//! Per-mode routing of outbound microphone frames
//!
//! The mode is fixed when the session is created and the matching route is
//! looked up once per frame.

use serde::{Deserialize, Serialize};

use super::state::TurnState;
use crate::barge_in::{BargeInGate, GateDecision};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// The server detects speech; frames stream continuously, echo-gated
    #[default]
    HandsFree,
    /// Frames are only sent while the user holds the talk control
    PushToTalk,
}

/// What one captured frame looks like to the router
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub turn: TurnState,
    pub playback_active: bool,
    pub rms: f32,
    pub talk_held: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The turn state does not send audio
    NotListening,
    /// Quiet frame during playback, most likely speaker echo
    Echo,
    /// Push-to-talk released
    TalkReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRoute {
    Send,
    Drop(DropReason),
}

type RouteFn = fn(&BargeInGate, &FrameContext) -> FrameRoute;

impl SessionMode {
    fn route_fn(self) -> RouteFn {
        match self {
            Self::HandsFree => route_hands_free,
            Self::PushToTalk => route_push_to_talk,
        }
    }

    pub fn route(self, gate: &BargeInGate, ctx: &FrameContext) -> FrameRoute {
        (self.route_fn())(gate, ctx)
    }
}

fn route_hands_free(gate: &BargeInGate, ctx: &FrameContext) -> FrameRoute {
    if !ctx.turn.sends_audio() {
        return FrameRoute::Drop(DropReason::NotListening);
    }

    match gate.admit(ctx.playback_active, ctx.rms) {
        GateDecision::Pass => FrameRoute::Send,
        GateDecision::Drop => FrameRoute::Drop(DropReason::Echo),
    }
}

// Holding the talk control is an explicit interruption, so no echo gate
fn route_push_to_talk(_gate: &BargeInGate, ctx: &FrameContext) -> FrameRoute {
    if !ctx.talk_held {
        FrameRoute::Drop(DropReason::TalkReleased)
    } else if !ctx.turn.sends_audio() {
        FrameRoute::Drop(DropReason::NotListening)
    } else {
        FrameRoute::Send
    }
}
