// Integration tests for the conversation session
//
// These tests drive a full session through fake connection and audio devices
// and check the turn state machine, barge-in, teardown and reconnects.

mod common;

use anyhow::Result;
use common::*;
use std::time::Duration;
use voice_session::audio::codec;
use voice_session::connection::Outgoing;
use voice_session::{
    DeviceError, InboundMessage, OutboundMessage, SessionEvent, SessionHandle, SessionMode,
    TurnState,
};

/// Spawn a session and complete the `ready` handshake
async fn listening_session(
    fakes: &Fakes,
) -> Result<(
    SessionHandle,
    FakeServer,
    tokio::sync::broadcast::Receiver<SessionEvent>,
)> {
    let (session, mut events) = new_session(test_config(), fakes);
    let handle = session.spawn();

    let server = fakes.connector.next_server().await?;
    server.send(&InboundMessage::Ready).await?;
    wait_turn(&mut events, TurnState::Listening).await?;

    Ok((handle, server, events))
}

/// Drive a listening session to `target`
async fn drive_to(
    target: TurnState,
    server: &FakeServer,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    let steps = [
        (TurnState::UserSpeaking, InboundMessage::UserSpeaking),
        (TurnState::Processing, InboundMessage::UserStopped),
        (
            TurnState::Speaking,
            InboundMessage::Text {
                content: "hello".to_string(),
            },
        ),
    ];

    for (state, message) in steps {
        if target == TurnState::Listening {
            break;
        }
        server.send(&message).await?;
        wait_turn(events, state).await?;
        if state == target {
            break;
        }
    }

    Ok(())
}

fn turn_path(events: &[SessionEvent]) -> Vec<TurnState> {
    let mut path = vec![TurnState::Connecting];
    path.extend(events.iter().filter_map(|e| match e {
        SessionEvent::TurnChanged { to, .. } => Some(*to),
        _ => None,
    }));
    path
}

#[tokio::test]
async fn test_full_turn_visits_each_state_once() -> Result<()> {
    let fakes = Fakes::new();
    let (session, mut events) = new_session(test_config(), &fakes);
    let handle = session.spawn();
    let server = fakes.connector.next_server().await?;

    let script = vec![
        InboundMessage::Ready,
        InboundMessage::UserSpeaking,
        InboundMessage::Transcript {
            text: "hi".to_string(),
        },
        InboundMessage::UserStopped,
        InboundMessage::Processing { message: None },
        InboundMessage::Text {
            content: "hello".to_string(),
        },
        InboundMessage::AudioDelta {
            data: pcm_frame(240, 0.25),
        },
        InboundMessage::AudioDelta {
            data: pcm_frame(480, -0.25),
        },
        InboundMessage::Done,
    ];
    for message in &script {
        server.send(message).await?;
    }

    let mut seen = Vec::new();
    loop {
        let event = wait_event(&mut events, |_| true).await?;
        let back_to_listening = matches!(
            event,
            SessionEvent::TurnChanged { from: TurnState::Speaking, to: TurnState::Listening }
        );
        seen.push(event);
        if back_to_listening {
            break;
        }
    }

    assert_eq!(
        turn_path(&seen),
        vec![
            TurnState::Connecting,
            TurnState::Listening,
            TurnState::UserSpeaking,
            TurnState::Processing,
            TurnState::Speaking,
            TurnState::Listening,
        ]
    );

    let log = fakes
        .speaker
        .wait_for(|log| log.contains(&Render::Finished(480)))
        .await?;
    assert_eq!(
        log,
        vec![
            Render::Started(240),
            Render::Finished(240),
            Render::Started(480),
            Render::Finished(480),
        ],
        "frame1 must finish before frame2 starts"
    );

    let stats = handle.stop().await;
    assert_eq!(stats.turns_completed, 1);
    assert_eq!(stats.transcript_segments_count, 2);

    let transcript = handle.transcript().await;
    assert_eq!(transcript[0].text, "hi");
    assert_eq!(transcript[1].text, "hello");

    Ok(())
}

#[tokio::test]
async fn test_stop_from_each_active_state_tears_down_once() -> Result<()> {
    for target in [
        TurnState::Listening,
        TurnState::UserSpeaking,
        TurnState::Processing,
        TurnState::Speaking,
    ] {
        let fakes = Fakes::new();
        let (handle, mut server, mut events) = listening_session(&fakes).await?;
        drive_to(target, &server, &mut events).await?;
        assert_eq!(handle.turn_state(), target);

        let stats = handle.stop().await;
        assert_eq!(stats.turn_state, TurnState::Stopped);
        assert_eq!(handle.turn_state(), TurnState::Stopped);
        assert!(handle.is_stopped());

        // Second stop is a no-op
        handle.stop().await;

        assert_eq!(fakes.mic.opens(), 1, "{:?}", target);
        assert_eq!(fakes.mic.closes(), 1, "microphone stopped once from {:?}", target);

        let written = server.drain();
        let stops = written
            .iter()
            .filter(|f| matches!(f, Outgoing::Text(t) if t.contains("\"stop\"")))
            .count();
        let closes = written.iter().filter(|f| **f == Outgoing::Close).count();
        assert_eq!(stops, 1, "stop notice sent once from {:?}", target);
        assert_eq!(closes, 1, "connection closed once from {:?}", target);

        let mut stopped = 0;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::Stopped {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1);
    }

    Ok(())
}

#[tokio::test]
async fn test_barge_in_flushes_playback() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.speaker = FakeSpeaker::new(Duration::from_millis(300));
    let (handle, server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::Processing, &server, &mut events).await?;

    for len in [100, 200, 300] {
        server
            .send(&InboundMessage::AudioDelta {
                data: pcm_frame(len, 0.3),
            })
            .await?;
    }
    wait_turn(&mut events, TurnState::Speaking).await?;
    fakes
        .speaker
        .wait_for(|log| log.contains(&Render::Started(100)))
        .await?;

    server.send(&InboundMessage::UserSpeaking).await?;
    wait_turn(&mut events, TurnState::UserSpeaking).await?;

    fakes
        .speaker
        .wait_for(|log| log.contains(&Render::Halted))
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        fakes.speaker.log(),
        vec![Render::Started(100), Render::Halted],
        "queued clips must never start after a barge-in"
    );

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_upstream_error_returns_to_listening() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::Processing, &server, &mut events).await?;

    server
        .send(&InboundMessage::Error {
            message: "model overloaded".to_string(),
        })
        .await?;

    let notice = wait_event(&mut events, |e| matches!(e, SessionEvent::Notice { .. })).await?;
    assert_eq!(
        notice,
        SessionEvent::Notice {
            message: "model overloaded".to_string()
        }
    );
    wait_turn(&mut events, TurnState::Listening).await?;

    // Next turn works normally
    server.send(&InboundMessage::UserSpeaking).await?;
    wait_turn(&mut events, TurnState::UserSpeaking).await?;

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_messages_are_ignored() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;

    server.send_raw("not json at all").await?;
    server.send_raw(r#"{"type":"mystery","data":1}"#).await?;
    server.send_raw(r#"{"type":"text"}"#).await?;
    server.send(&InboundMessage::UserSpeaking).await?;

    wait_turn(&mut events, TurnState::UserSpeaking).await?;
    assert_eq!(handle.turn_state(), TurnState::UserSpeaking);

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_interim_transcripts_overwrite() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::UserSpeaking, &server, &mut events).await?;

    for text in ["wha", "what is", "what is the time"] {
        server
            .send(&InboundMessage::Interim {
                text: text.to_string(),
            })
            .await?;
        let event = wait_event(&mut events, |e| matches!(e, SessionEvent::Transcript { .. })).await?;
        assert_eq!(
            event,
            SessionEvent::Transcript {
                text: text.to_string(),
                partial: true
            }
        );
    }

    // Interim updates are not transcript segments
    assert!(handle.transcript().await.is_empty());
    assert_eq!(handle.turn_state(), TurnState::UserSpeaking);

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_processing_surfaces_events_without_transition() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::Processing, &server, &mut events).await?;

    server
        .send(&InboundMessage::TextDelta {
            delta: "Hel".to_string(),
        })
        .await?;
    server
        .send(&InboundMessage::ToolCall {
            name: "search".to_string(),
        })
        .await?;
    server.send(&InboundMessage::TtsStart).await?;

    wait_event(&mut events, |e| matches!(e, SessionEvent::ResponseDelta { .. })).await?;
    let tool = wait_event(&mut events, |e| matches!(e, SessionEvent::ToolCall { .. })).await?;
    assert_eq!(
        tool,
        SessionEvent::ToolCall {
            name: "search".to_string()
        }
    );
    assert_eq!(handle.turn_state(), TurnState::Processing);

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_chunked_turn_plays_once_and_reports_done() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, mut server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::Processing, &server, &mut events).await?;

    // 300 samples of PCM16, split at arbitrary non-aligned points
    let payload = pcm_frame(300, 0.2);
    let (a, rest) = payload.split_at(7);
    let (b, c) = rest.split_at(13);

    server.send(&InboundMessage::TtsStart).await?;
    for fragment in [a, b, c] {
        server
            .send(&InboundMessage::AudioChunk {
                data: fragment.to_string(),
            })
            .await?;
    }
    wait_turn(&mut events, TurnState::Speaking).await?;
    server.send(&InboundMessage::AudioDone).await?;

    wait_event(&mut events, |e| *e == SessionEvent::PlaybackDrained).await?;
    wait_turn(&mut events, TurnState::Listening).await?;

    assert_eq!(
        fakes.speaker.log(),
        vec![Render::Started(300), Render::Finished(300)]
    );
    assert_eq!(server.next_message().await?, OutboundMessage::PlaybackDone);

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_listening_frames_are_streamed_in_order() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, mut server, _events) = listening_session(&fakes).await?;

    // Two 160-sample frames from three uneven device blocks
    fakes.mic.push(vec![0.1; 100]).await?;
    fakes.mic.push(vec![0.1; 100]).await?;
    fakes.mic.push(vec![-0.2; 120]).await?;

    let first = server.next_message().await?;
    let second = server.next_message().await?;

    let OutboundMessage::Audio { data } = first else {
        panic!("expected audio, got {:?}", first);
    };
    let samples = codec::decode(&data)?;
    assert_eq!(samples.len(), 160);
    assert!((samples[0] - 0.1).abs() < 1.0 / 32768.0 + f32::EPSILON);

    let OutboundMessage::Audio { data } = second else {
        panic!("expected audio, got {:?}", second);
    };
    let samples = codec::decode(&data)?;
    assert_eq!(samples.len(), 160);
    assert!((samples[159] + 0.2).abs() < 1.0 / 32768.0 + f32::EPSILON);

    let stats = handle.stop().await;
    assert_eq!(stats.frames_sent, 2);
    Ok(())
}

#[tokio::test]
async fn test_echo_frames_dropped_while_speaking() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.speaker = FakeSpeaker::new(Duration::from_millis(500));
    let (handle, mut server, mut events) = listening_session(&fakes).await?;
    drive_to(TurnState::Processing, &server, &mut events).await?;

    server
        .send(&InboundMessage::AudioDelta {
            data: pcm_frame(2400, 0.3),
        })
        .await?;
    wait_turn(&mut events, TurnState::Speaking).await?;
    fakes
        .speaker
        .wait_for(|log| log.contains(&Render::Started(2400)))
        .await?;

    // Quiet echo first, then a real interruption
    fakes.mic.push(vec![0.01; 160]).await?;
    fakes.mic.push(vec![0.5; 160]).await?;

    let OutboundMessage::Audio { data } = server.next_message().await? else {
        panic!("expected audio");
    };
    let rms = codec::rms(&codec::decode(&data)?);
    assert!(rms > 0.4, "only the loud frame passes, got rms {}", rms);

    let stats = handle.stop().await;
    assert_eq!(stats.frames_sent, 1);
    assert!(stats.frames_dropped >= 1);
    Ok(())
}

#[tokio::test]
async fn test_muted_session_sends_nothing() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, mut server, mut events) = listening_session(&fakes).await?;

    handle.set_muted(true).await?;
    wait_event(&mut events, |e| *e == SessionEvent::MuteChanged { muted: true }).await?;
    fakes.mic.push(vec![0.5; 320]).await?;
    // Let the muted blocks be windowed before unmuting
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.set_muted(false).await?;
    wait_event(&mut events, |e| *e == SessionEvent::MuteChanged { muted: false }).await?;
    fakes.mic.push(vec![-0.5; 160]).await?;

    let OutboundMessage::Audio { data } = server.next_message().await? else {
        panic!("expected audio");
    };
    assert!(codec::decode(&data)?[0] < 0.0, "muted frames were sent");
    assert!(fakes.mic.is_open(), "mute must not release the device");

    let stats = handle.stop().await;
    assert!(!stats.muted);
    Ok(())
}

#[tokio::test]
async fn test_push_to_talk_sends_only_while_held() -> Result<()> {
    let fakes = Fakes::new();
    let mut config = test_config();
    config.mode = SessionMode::PushToTalk;
    let (session, mut events) = new_session(config, &fakes);
    let handle = session.spawn();
    let mut server = fakes.connector.next_server().await?;
    server.send(&InboundMessage::Ready).await?;
    wait_turn(&mut events, TurnState::Listening).await?;

    fakes.mic.push(vec![0.5; 160]).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.set_talk_held(true).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    fakes.mic.push(vec![-0.5; 160]).await?;

    let OutboundMessage::Audio { data } = server.next_message().await? else {
        panic!("no frame sent while talk was held");
    };
    assert!(codec::decode(&data)?[0] < 0.0, "frame from before the hold was sent");

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_reconnects_after_unexpected_close() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;

    server.close().await?;
    wait_turn(&mut events, TurnState::Connecting).await?;

    let second = fakes.connector.next_server().await?;
    second.send(&InboundMessage::Ready).await?;
    wait_turn(&mut events, TurnState::Listening).await?;

    assert_eq!(fakes.connector.attempts(), 2);
    assert_eq!(fakes.mic.opens(), 1, "microphone kept across reconnects");

    let stats = handle.stats().await;
    assert_eq!(stats.reconnect_attempts, 0, "attempts reset after a successful connect");

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_slow_reconnect_completes_while_microphone_streams() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.connector = FakeConnector::slow_reconnects(Duration::from_millis(200));
    let (handle, server, mut events) = listening_session(&fakes).await?;

    let mic = fakes.mic.clone();
    let feeder = tokio::spawn(async move {
        loop {
            let _ = mic.push(vec![0.1; 160]).await;
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
    });

    server.close().await?;
    wait_turn(&mut events, TurnState::Connecting).await?;

    let second = fakes.connector.next_server().await?;
    second.send(&InboundMessage::Ready).await?;
    wait_turn(&mut events, TurnState::Listening).await?;

    feeder.abort();
    assert_eq!(fakes.connector.attempts(), 2, "the handshake was never restarted");
    assert!(handle.stats().await.frames_dropped > 0, "frames kept flowing meanwhile");

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_server_disconnect_message_triggers_reconnect() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, server, mut events) = listening_session(&fakes).await?;

    server.send(&InboundMessage::Disconnected).await?;
    wait_turn(&mut events, TurnState::Connecting).await?;
    fakes.connector.next_server().await?;

    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_fails_session() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.connector = FakeConnector::failing(u32::MAX);
    let mut config = test_config();
    config.reconnect = fast_policy(2);
    let (session, mut events) = new_session(config, &fakes);
    let handle = session.spawn();

    let failed = wait_event(&mut events, |e| matches!(e, SessionEvent::Failed { .. })).await?;
    let SessionEvent::Failed { reason } = failed else {
        unreachable!()
    };
    assert!(reason.contains("2 reconnect attempts"), "{}", reason);
    wait_event(&mut events, |e| *e == SessionEvent::Stopped).await?;

    handle.join().await;
    assert_eq!(fakes.connector.attempts(), 3);
    assert!(handle.is_stopped());

    let stats = handle.stats().await;
    assert!(stats.last_error.is_some());
    assert_eq!(fakes.mic.opens(), 0);
    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_aborts_startup() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.mic = FakeMic::failing(DeviceError::PermissionDenied);
    let (session, mut events) = new_session(test_config(), &fakes);
    let handle = session.spawn();

    let server = fakes.connector.next_server().await?;
    server.send(&InboundMessage::Ready).await?;

    let notice = wait_event(&mut events, |e| matches!(e, SessionEvent::Notice { .. })).await?;
    assert_eq!(
        notice,
        SessionEvent::Notice {
            message: "Microphone unavailable (permission_denied)".to_string()
        }
    );
    wait_event(&mut events, |e| matches!(e, SessionEvent::Failed { .. })).await?;
    wait_event(&mut events, |e| *e == SessionEvent::Stopped).await?;

    handle.join().await;
    assert_eq!(handle.turn_state(), TurnState::Stopped);
    assert!(!fakes.mic.is_open(), "no half-open device left behind");
    Ok(())
}

#[tokio::test]
async fn test_stop_cancels_device_acquisition() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.mic = FakeMic::hanging();
    let (session, mut events) = new_session(test_config(), &fakes);
    let handle = session.spawn();

    let server = fakes.connector.next_server().await?;
    server.send(&InboundMessage::Ready).await?;
    wait_event(&mut events, |e| {
        matches!(e, SessionEvent::Status { text } if text.starts_with("Requesting microphone"))
    })
    .await?;

    let stats = tokio::time::timeout(WAIT, handle.stop()).await?;
    assert_eq!(stats.turn_state, TurnState::Stopped);
    assert_eq!(fakes.mic.opens(), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_cancels_pending_reconnect() -> Result<()> {
    let mut fakes = Fakes::new();
    fakes.connector = FakeConnector::failing(u32::MAX);
    let mut config = test_config();
    config.reconnect.base_delay = Duration::from_secs(60);
    config.reconnect.max_delay = Duration::from_secs(60);
    let (session, mut events) = new_session(config, &fakes);
    let handle = session.spawn();

    wait_event(&mut events, |e| matches!(e, SessionEvent::Status { text } if text.starts_with("Connection lost"))).await?;

    let stats = tokio::time::timeout(WAIT, handle.stop()).await?;
    assert_eq!(stats.turn_state, TurnState::Stopped);
    assert_eq!(fakes.connector.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dropping_all_handles_stops_session() -> Result<()> {
    let fakes = Fakes::new();
    let (handle, _server, mut events) = listening_session(&fakes).await?;

    drop(handle);

    wait_event(&mut events, |e| *e == SessionEvent::Stopped).await?;
    Ok(())
}

#[tokio::test]
async fn test_sessions_are_independent() -> Result<()> {
    let first = Fakes::new();
    let second = Fakes::new();
    let (a, _server_a, _events_a) = listening_session(&first).await?;
    let (b, _server_b, _events_b) = listening_session(&second).await?;

    a.stop().await;

    assert_eq!(a.turn_state(), TurnState::Stopped);
    assert_eq!(b.turn_state(), TurnState::Listening);
    assert!(second.mic.is_open());

    b.stop().await;
    Ok(())
}
