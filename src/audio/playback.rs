//! Ordered playback of assistant audio
//!
//! One consumer task owns the output device and renders clips strictly in
//! arrival order. `flush()` never awaits: it clears the queue under a short
//! lock and bumps a generation counter that interrupts the clip currently
//! being rendered.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, OutputDevice};
use super::chunk::ChunkAssembler;
use super::clip::{self, Clip};
use super::codec;
use crate::error::{CodecError, DeviceError};

/// One inbound unit of assistant audio
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackPayload {
    /// A single PCM16 frame, played as soon as possible
    Streamed(AudioFrame),
    /// Fragments of one complete clip, concatenated before decoding
    Chunked(Vec<String>),
}

impl PlaybackPayload {
    /// Decode into the queue's internal sample format
    pub fn into_clip(self, raw_sample_rate: u32) -> Result<Clip, CodecError> {
        match self {
            Self::Streamed(frame) => {
                let channels = usize::from(frame.channels.max(1));
                let samples = frame.to_f32();
                let mono = if channels == 1 {
                    samples
                } else {
                    samples
                        .chunks(channels)
                        .map(|f| f.iter().sum::<f32>() / f.len() as f32)
                        .collect()
                };
                Ok(Clip::new(mono, frame.sample_rate))
            }
            Self::Chunked(fragments) => {
                let joined = fragments.concat();
                let bytes = codec::decode_bytes(&joined)?;
                clip::decode_clip(&bytes, raw_sample_rate)
            }
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunked(_))
    }
}

/// Notifications from the playback consumer
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The last queued clip finished playing
    ///
    /// `notify_server` is set when the drained run contained a chunked clip,
    /// meaning the server is waiting to hear that synthesis playback ended.
    Drained { notify_server: bool },
    /// The output device failed while rendering a clip
    DeviceError(DeviceError),
}

struct QueuedClip {
    clip: Clip,
    generation: u64,
    chunked: bool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedClip>,
    playing: bool,
    generation: u64,
    chunked_in_run: bool,
}

/// Playback queue with a single background consumer
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
    generation_tx: watch::Sender<u64>,
    assembler: ChunkAssembler,
    events_rx: mpsc::Receiver<PlaybackEvent>,
    consumer: JoinHandle<()>,
    raw_sample_rate: u32,
}

impl PlaybackQueue {
    /// Create the queue and spawn its consumer task
    ///
    /// `raw_sample_rate` is used for chunked clips that carry no container.
    pub fn new(device: Box<dyn OutputDevice>, raw_sample_rate: u32) -> Self {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let wake = Arc::new(Notify::new());
        let (generation_tx, generation_rx) = watch::channel(0);
        let (events_tx, events_rx) = mpsc::channel(32);

        info!("Playback queue ready on {}", device.name());

        let consumer = tokio::spawn(render_loop(
            device,
            Arc::clone(&state),
            Arc::clone(&wake),
            generation_rx,
            events_tx,
        ));

        Self {
            state,
            wake,
            generation_tx,
            assembler: ChunkAssembler::new(),
            events_rx,
            consumer,
            raw_sample_rate,
        }
    }

    /// Decode a payload and append it to the queue
    pub fn enqueue(&mut self, payload: PlaybackPayload) -> Result<(), CodecError> {
        let chunked = payload.is_chunked();
        let clip = payload.into_clip(self.raw_sample_rate)?;

        if clip.is_empty() {
            debug!("Ignoring empty playback payload");
            return Ok(());
        }

        {
            let mut state = self.lock();
            let generation = state.generation;
            debug!(
                "Queued {} clip ({}ms, {} pending)",
                if chunked { "chunked" } else { "streamed" },
                clip.duration_ms(),
                state.pending.len() + 1
            );
            state.pending.push_back(QueuedClip {
                clip,
                generation,
                chunked,
            });
        }

        self.wake.notify_one();
        Ok(())
    }

    /// Open a new chunked utterance, discarding a stale partial one
    pub fn begin_utterance(&mut self) {
        self.assembler.begin_utterance();
    }

    /// Buffer one chunked fragment
    pub fn push_fragment(&mut self, fragment: &str) {
        self.assembler.push_fragment(fragment);
    }

    pub fn has_open_utterance(&self) -> bool {
        self.assembler.fragment_count() > 0
    }

    /// Decode the buffered utterance as one clip and queue it
    ///
    /// Returns `Ok(false)` if nothing was buffered.
    pub fn complete_utterance(&mut self) -> Result<bool, CodecError> {
        match self.assembler.complete_utterance() {
            Some(fragments) => {
                self.enqueue(PlaybackPayload::Chunked(fragments))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Discard pending and partial payloads and stop the current clip
    ///
    /// Returns the number of queued clips that were dropped.
    pub fn flush(&mut self) -> usize {
        let (dropped, generation) = {
            let mut state = self.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            state.playing = false;
            state.chunked_in_run = false;
            state.generation += 1;
            (dropped, state.generation)
        };

        self.generation_tx.send_replace(generation);
        self.assembler.clear();

        if dropped > 0 {
            info!("Playback flushed ({} clips dropped)", dropped);
        }

        dropped
    }

    /// Whether audio is rendering or queued to render next
    pub fn is_playing(&self) -> bool {
        let state = self.lock();
        state.playing || !state.pending.is_empty()
    }

    /// Clips waiting to be rendered (excludes the one playing)
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next consumer notification. Cancel-safe.
    pub async fn next_event(&mut self) -> PlaybackEvent {
        match self.events_rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_state(&self.state)
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn render_loop(
    mut device: Box<dyn OutputDevice>,
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
    mut generation_rx: watch::Receiver<u64>,
    events_tx: mpsc::Sender<PlaybackEvent>,
) {
    loop {
        let next = {
            let mut guard = lock_state(&state);
            let next = guard.pending.pop_front();
            if next.is_some() {
                guard.playing = true;
            }
            next
        };

        let Some(item) = next else {
            wake.notified().await;
            continue;
        };

        // A flush between pop and here already made this clip stale
        if *generation_rx.borrow_and_update() != item.generation {
            continue;
        }

        let interrupted = tokio::select! {
            result = device.play(&item.clip.samples, item.clip.sample_rate) => {
                if let Err(e) = result {
                    warn!("Playback device error: {}", e);
                    let _ = events_tx.send(PlaybackEvent::DeviceError(e)).await;
                }
                false
            }
            changed = generation_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                true
            }
        };

        if interrupted {
            device.halt();
            debug!("Clip interrupted by flush");
            continue;
        }

        let drained = {
            let mut guard = lock_state(&state);
            if guard.generation != item.generation {
                None
            } else {
                guard.chunked_in_run |= item.chunked;
                if guard.pending.is_empty() {
                    guard.playing = false;
                    Some(std::mem::take(&mut guard.chunked_in_run))
                } else {
                    None
                }
            }
        };

        if let Some(notify_server) = drained {
            debug!("Playback drained");
            if events_tx
                .send(PlaybackEvent::Drained { notify_server })
                .await
                .is_err()
            {
                return;
            }
        }
    }
}
