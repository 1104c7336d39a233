//! Outbound audio delivery.
//!
//! Clips are base64-encoded, split into frames of at most `frame_chars`
//! characters and sent one media message per frame, followed by a single
//! completion mark. A background player plays clips strictly one after the
//! other so frames of different clips never interleave.
//!
//! Cancellation is cooperative: every clip carries the epoch that was current
//! when it was handed to the player, and the player re-checks the epoch before
//! each frame. [`OutboundAudio::interrupt`] bumps the epoch, which aborts the
//! clip being played and every clip queued behind it. The `clear` that follows
//! goes through the player too, so it always lands after the last frame of an
//! aborted clip.
//!
//! Each scheduled clip is tagged with the turn that produced it. The transport
//! acknowledges marks in the order they were sent, so popping the oldest tag
//! on every acknowledgement tells the session which turn the mark belongs to.

use crate::protocol::OutboundMessage;
use callbridge_voice::codec::{encode_payload, frame_payload};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One clip scheduled on the player.
#[derive(Debug)]
struct Clip {
    stream_id: String,
    audio: Vec<u8>,
    epoch: u64,
}

/// Work items for the player, handled strictly in order.
#[derive(Debug)]
enum PlayerCommand {
    Play(Clip),
    Clear { stream_id: String },
}

/// How a clip left the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { frames: usize },
    Aborted { frames_sent: usize },
    /// The transport writer is gone; nothing more can be sent.
    Disconnected,
}

/// Outbound audio queue for one call.
#[derive(Debug)]
pub struct OutboundAudio {
    stream_id: Option<String>,
    pending: VecDeque<(u64, Vec<u8>)>,
    /// Turn tags of clips handed to the player whose mark is not yet acknowledged.
    in_flight: VecDeque<u64>,
    epoch: Arc<AtomicU64>,
    player: mpsc::UnboundedSender<PlayerCommand>,
}

impl OutboundAudio {
    /// Creates the queue and spawns its player. Must be called inside a
    /// tokio runtime.
    pub fn new(
        out: mpsc::Sender<OutboundMessage>,
        frame_chars: usize,
        frame_interval: Duration,
    ) -> Self {
        let epoch = Arc::new(AtomicU64::new(0));
        let (player, commands) = mpsc::unbounded_channel();
        tokio::spawn(run_player(
            commands,
            out,
            epoch.clone(),
            frame_chars.max(1),
            frame_interval,
        ));
        Self {
            stream_id: None,
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            epoch,
            player,
        }
    }

    /// `true` once the transport has announced its stream id.
    pub fn is_ready(&self) -> bool {
        self.stream_id.is_some()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Number of clips waiting for the transport to become ready.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Marks sent (or still to be sent) that the transport has not acknowledged.
    pub fn outstanding_marks(&self) -> usize {
        self.in_flight.len()
    }

    /// `true` while any clip of `turn` still awaits its acknowledgement.
    pub fn awaits_marks_for(&self, turn: u64) -> bool {
        self.in_flight.contains(&turn)
    }

    /// Settles the oldest outstanding mark and returns the turn it was sent
    /// for, or `None` if no mark was outstanding.
    pub fn acknowledge(&mut self) -> Option<u64> {
        self.in_flight.pop_front()
    }

    /// Records the stream id and releases queued clips in the order they
    /// were queued. Returns how many clips were released.
    pub fn mark_ready(&mut self, stream_id: impl Into<String>) -> usize {
        self.stream_id = Some(stream_id.into());
        let mut released = 0;
        while let Some((turn, audio)) = self.pending.pop_front() {
            self.schedule(turn, audio);
            released += 1;
        }
        released
    }

    /// Plays `audio` for `turn` once the transport is ready, queueing it
    /// until then.
    pub fn deliver(&mut self, turn: u64, audio: Vec<u8>) {
        if self.is_ready() {
            self.schedule(turn, audio);
        } else {
            debug!(turn, bytes = audio.len(), "transport not ready, queueing clip");
            self.pending.push_back((turn, audio));
        }
    }

    fn schedule(&mut self, turn: u64, audio: Vec<u8>) {
        let Some(stream_id) = self.stream_id.clone() else {
            return;
        };
        let clip = Clip {
            stream_id,
            audio,
            epoch: self.epoch.load(Ordering::SeqCst),
        };
        if self.player.send(PlayerCommand::Play(clip)).is_err() {
            debug!("audio player has stopped, dropping clip");
            return;
        }
        self.in_flight.push_back(turn);
    }

    /// Stops everything in flight: the clip being played stops at its next
    /// frame, scheduled and queued clips are dropped, and the far end is told
    /// to discard whatever it has buffered.
    ///
    /// Aborted clips still send their mark, so outstanding marks are kept.
    pub fn interrupt(&mut self) {
        self.cancel();
        if let Some(stream_id) = self.stream_id.clone() {
            if self.player.send(PlayerCommand::Clear { stream_id }).is_err() {
                debug!("audio player has stopped, clear not sent");
            }
        }
    }

    /// Like [`interrupt`](Self::interrupt) but without signalling the far end.
    /// Used when the call is ending.
    pub fn cancel(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.pending.clear();
    }
}

async fn run_player(
    mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
    out: mpsc::Sender<OutboundMessage>,
    epoch: Arc<AtomicU64>,
    frame_chars: usize,
    frame_interval: Duration,
) {
    while let Some(command) = commands.recv().await {
        match command {
            PlayerCommand::Play(clip) => {
                let outcome = play_clip(&clip, &out, &epoch, frame_chars, frame_interval).await;
                debug!(stream_id = %clip.stream_id, ?outcome, "clip finished");
                if outcome == PlaybackOutcome::Disconnected {
                    break;
                }
            }
            PlayerCommand::Clear { stream_id } => {
                if out.send(OutboundMessage::clear(&stream_id)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn play_clip(
    clip: &Clip,
    out: &mpsc::Sender<OutboundMessage>,
    epoch: &AtomicU64,
    frame_chars: usize,
    frame_interval: Duration,
) -> PlaybackOutcome {
    let encoded = encode_payload(&clip.audio);
    let frames = frame_payload(&encoded, frame_chars);
    let total = frames.len();
    let mut sent = 0;

    for frame in frames {
        if epoch.load(Ordering::SeqCst) != clip.epoch {
            break;
        }
        if out
            .send(OutboundMessage::media(&clip.stream_id, frame))
            .await
            .is_err()
        {
            return PlaybackOutcome::Disconnected;
        }
        sent += 1;
        if !frame_interval.is_zero() && sent < total {
            tokio::time::sleep(frame_interval).await;
        }
    }

    if out
        .send(OutboundMessage::audio_complete(&clip.stream_id))
        .await
        .is_err()
    {
        return PlaybackOutcome::Disconnected;
    }

    if sent == total {
        PlaybackOutcome::Completed { frames: total }
    } else {
        PlaybackOutcome::Aborted { frames_sent: sent }
    }
}
