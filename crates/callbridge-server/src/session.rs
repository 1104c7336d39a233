//! Per-call conversation state machine.
//!
//! Each call runs as one tokio task that owns all of the call's state. The
//! transport, the recognizer and the spawned generator/synthesizer requests
//! talk to it only through its mailbox, so events for a call are handled one
//! at a time in the order they arrive and nothing needs a lock.
//!
//! ```text
//! AwaitingStart -> Listening <-> Generating -> Speaking -> Listening
//!                                              Speaking -> Interrupted -> Listening
//! any -> Ended
//! ```

use crate::config::CallConfig;
use crate::delivery::OutboundAudio;
use crate::protocol::{OutboundMessage, AUDIO_COMPLETE_MARK};
use callbridge_types::{AgentProfile, ConversationState, Role, Turn, VoiceConfig};
use callbridge_voice::codec::to_recognizer_audio;
use callbridge_voice::{
    generate_or_fallback, synthesize_or_none, AudioEncoding, RecognitionConfig, RecognitionStream,
    TranscriptEvent, VoicePorts,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Call behaviour shared by every session.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub greeting_delay: Duration,
    pub barge_in_min_chars: usize,
    pub frame_chars: usize,
    pub frame_interval: Duration,
    pub fallback_reply: String,
    pub mailbox_capacity: usize,
    pub recognition: RecognitionConfig,
}

impl CallSettings {
    pub fn from_config(call: &CallConfig, encoding: AudioEncoding) -> Self {
        Self {
            greeting_delay: call.greeting_delay(),
            barge_in_min_chars: call.barge_in_min_chars,
            frame_chars: call.frame_chars,
            frame_interval: call.frame_interval(),
            fallback_reply: call.fallback_reply.clone(),
            mailbox_capacity: call.mailbox_capacity,
            recognition: RecognitionConfig {
                encoding,
                ..RecognitionConfig::default()
            },
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from_config(&CallConfig::default(), AudioEncoding::default())
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub call_id: String,
    pub agent_id: String,
    pub state: ConversationState,
    pub stream_id: Option<String>,
    pub ready: bool,
    pub history: Vec<Turn>,
    pub pending_clips: usize,
    pub outstanding_marks: usize,
    pub interim_transcript: Option<String>,
    pub queued_finals: usize,
}

#[derive(Debug)]
enum SessionEvent {
    Start { stream_id: String },
    Media(Vec<u8>),
    Mark(String),
    Stop,
    Greet,
    ReplyText { turn: u64, text: String },
    ReplyAudio { turn: u64, audio: Option<Vec<u8>> },
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Cheap, cloneable reference to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    call_id: String,
    session_id: Uuid,
    tx: mpsc::Sender<SessionEvent>,
    state: watch::Receiver<ConversationState>,
}

impl SessionHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Distinguishes two sessions that reused the same call id.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Transport start signal.
    pub async fn start(&self, stream_id: impl Into<String>) {
        self.post(SessionEvent::Start {
            stream_id: stream_id.into(),
        })
        .await;
    }

    /// One decoded inbound audio frame.
    pub async fn media(&self, audio: Vec<u8>) {
        self.post(SessionEvent::Media(audio)).await;
    }

    /// Transport acknowledgement of an outbound mark.
    pub async fn mark(&self, name: impl Into<String>) {
        self.post(SessionEvent::Mark(name.into())).await;
    }

    /// Ends the session. Safe to call after it has already ended.
    pub async fn stop(&self) {
        self.post(SessionEvent::Stop).await;
    }

    /// Returns `None` if the session has ended.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(SessionEvent::Snapshot(tx)).await.is_err() {
            return None;
        }
        rx.await.ok()
    }

    /// Waits until the session reaches `target`. Returns `false` if the
    /// session ended first.
    pub async fn wait_for_state(&self, target: ConversationState) -> bool {
        let mut state = self.state.clone();
        let reached = match state
            .wait_for(|s| *s == target || *s == ConversationState::Ended)
            .await
        {
            Ok(reached) => *reached == target,
            Err(_) => target == ConversationState::Ended,
        };
        reached
    }

    async fn post(&self, event: SessionEvent) {
        if self.tx.send(event).await.is_err() {
            debug!(call_id = %self.call_id, "session already ended, dropping event");
        }
    }
}

/// State owned by one call's task.
pub struct CallSession {
    call_id: String,
    agent_id: String,
    voice: VoiceConfig,
    greeting: Option<String>,
    ports: VoicePorts,
    settings: Arc<CallSettings>,

    state: ConversationState,
    state_tx: watch::Sender<ConversationState>,
    history: Vec<Turn>,
    outbound: OutboundAudio,
    recognition: Option<RecognitionStream>,
    interim: Option<String>,
    queued_finals: VecDeque<String>,
    turn_seq: u64,
    active_turn: Option<u64>,

    mailbox: mpsc::Receiver<SessionEvent>,
    self_tx: mpsc::WeakSender<SessionEvent>,
}

impl CallSession {
    /// Spawns the task for one call. Outbound transport messages are written
    /// to `out`. The session stops when told to, or when every handle to it
    /// has been dropped.
    pub fn spawn(
        call_id: impl Into<String>,
        profile: AgentProfile,
        ports: VoicePorts,
        settings: Arc<CallSettings>,
        out: mpsc::Sender<OutboundMessage>,
    ) -> SessionHandle {
        let call_id = call_id.into();
        let (tx, mailbox) = mpsc::channel(settings.mailbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConversationState::AwaitingStart);
        let outbound = OutboundAudio::new(out, settings.frame_chars, settings.frame_interval);

        let session = CallSession {
            call_id: call_id.clone(),
            agent_id: profile.id.clone(),
            voice: profile.voice_config(),
            greeting: profile.greeting().map(str::to_string),
            ports,
            settings,
            state: ConversationState::AwaitingStart,
            state_tx,
            history: Vec::new(),
            outbound,
            recognition: None,
            interim: None,
            queued_finals: VecDeque::new(),
            turn_seq: 0,
            active_turn: None,
            mailbox,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(session.run());

        SessionHandle {
            call_id,
            session_id: Uuid::new_v4(),
            tx,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        info!(call_id = %self.call_id, agent_id = %self.agent_id, "call session created");
        loop {
            let event = tokio::select! {
                event = self.mailbox.recv() => event,
                transcript = next_transcript(&mut self.recognition) => {
                    match transcript {
                        Some(t) => self.on_transcript(t),
                        None => {
                            warn!(call_id = %self.call_id, "recognizer stream ended, no further transcripts");
                            self.recognition = None;
                        }
                    }
                    continue;
                }
            };
            match event {
                Some(SessionEvent::Stop) | None => break,
                Some(event) => self.handle(event).await,
            }
        }
        self.end();
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start { stream_id } => self.on_start(stream_id).await,
            SessionEvent::Media(audio) => self.on_media(audio),
            SessionEvent::Mark(name) => self.on_mark(&name),
            SessionEvent::Greet => self.on_greet(),
            SessionEvent::ReplyText { turn, text } => self.on_reply_text(turn, text),
            SessionEvent::ReplyAudio { turn, audio } => self.on_reply_audio(turn, audio),
            SessionEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionEvent::Stop => {}
        }
    }

    fn set_state(&mut self, next: ConversationState) {
        if self.state != next {
            debug!(call_id = %self.call_id, from = %self.state, to = %next, "state transition");
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    async fn on_start(&mut self, stream_id: String) {
        if self.state != ConversationState::AwaitingStart {
            warn!(call_id = %self.call_id, stream_id = %stream_id, "duplicate start signal ignored");
            return;
        }
        info!(call_id = %self.call_id, stream_id = %stream_id, "media stream started");
        let released = self.outbound.mark_ready(stream_id);
        if released > 0 {
            debug!(call_id = %self.call_id, released, "released clips queued before start");
        }

        match self.ports.recognizer.open(self.settings.recognition).await {
            Ok(stream) => self.recognition = Some(stream),
            Err(e) => {
                warn!(call_id = %self.call_id, "failed to open recognizer stream: {}", e);
            }
        }
        self.set_state(ConversationState::Listening);

        if self.greeting.is_some() {
            let delay = self.settings.greeting_delay;
            self.post_later(delay, SessionEvent::Greet);
        }
    }

    fn on_media(&mut self, audio: Vec<u8>) {
        if let Some(stream) = &self.recognition {
            stream.send(to_recognizer_audio(audio, self.settings.recognition.encoding));
        }
    }

    fn on_mark(&mut self, name: &str) {
        if name != AUDIO_COMPLETE_MARK {
            debug!(call_id = %self.call_id, mark = %name, "ignoring unrelated mark");
            return;
        }
        let Some(turn) = self.outbound.acknowledge() else {
            debug!(call_id = %self.call_id, "mark acknowledged with no clip outstanding");
            return;
        };
        // Acks of interrupted clips belong to an earlier turn and must not
        // end the one being spoken now, even before its audio exists.
        if !self.is_current(turn, ConversationState::Speaking) {
            debug!(call_id = %self.call_id, turn, "acknowledged clip of a superseded turn");
            return;
        }
        if !self.outbound.awaits_marks_for(turn) {
            self.finish_turn();
        }
    }

    fn on_greet(&mut self) {
        let caller_started = !self.history.is_empty()
            || self.interim.is_some()
            || !self.queued_finals.is_empty();
        if self.state != ConversationState::Listening || caller_started {
            debug!(call_id = %self.call_id, "caller already speaking, greeting skipped");
            return;
        }
        let Some(text) = self.greeting.clone() else {
            return;
        };
        let turn = self.next_turn();
        self.set_state(ConversationState::Generating);
        self.on_reply_text(turn, text);
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        if matches!(
            self.state,
            ConversationState::AwaitingStart | ConversationState::Ended
        ) {
            return;
        }

        let text = event.text.trim();
        if !event.is_final {
            if text.is_empty() {
                return;
            }
            self.interim = Some(text.to_string());
            if self.state == ConversationState::Speaking
                && text.chars().count() > self.settings.barge_in_min_chars
            {
                info!(call_id = %self.call_id, interim = %text, "caller barged in");
                self.interrupt();
            }
            return;
        }

        self.interim = None;
        if text.is_empty() {
            debug!(call_id = %self.call_id, "dropping empty final transcript");
            return;
        }
        let text = text.to_string();
        match self.state {
            ConversationState::Generating => {
                debug!(call_id = %self.call_id, "reply in progress, queueing final transcript");
                self.queued_finals.push_back(text);
            }
            ConversationState::Speaking => {
                info!(call_id = %self.call_id, "caller spoke over the agent");
                self.interrupt();
                self.begin_caller_turn(text);
            }
            _ => self.begin_caller_turn(text),
        }
    }

    /// Cuts off the agent and returns to listening.
    fn interrupt(&mut self) {
        self.set_state(ConversationState::Interrupted);
        self.outbound.interrupt();
        self.active_turn = None;
        self.set_state(ConversationState::Listening);
    }

    fn next_turn(&mut self) -> u64 {
        self.turn_seq += 1;
        self.active_turn = Some(self.turn_seq);
        self.turn_seq
    }

    fn begin_caller_turn(&mut self, text: String) {
        info!(call_id = %self.call_id, transcript = %text, "caller turn");
        self.history.push(Turn::caller(text));
        let turn = self.next_turn();
        self.set_state(ConversationState::Generating);

        let generator = self.ports.generator.clone();
        let history = self.history.clone();
        let prompt = self.voice.prompt_text.clone();
        let fallback = self.settings.fallback_reply.clone();
        self.spawn_request(async move {
            let text = generate_or_fallback(generator.as_ref(), &history, &prompt, &fallback).await;
            SessionEvent::ReplyText { turn, text }
        });
    }

    fn on_reply_text(&mut self, turn: u64, text: String) {
        if !self.is_current(turn, ConversationState::Generating) {
            debug!(call_id = %self.call_id, turn, "discarding reply for superseded turn");
            return;
        }
        info!(call_id = %self.call_id, reply = %text, "agent turn");
        self.history.push(Turn::agent(text.clone()));
        self.set_state(ConversationState::Speaking);

        let synthesizer = self.ports.synthesizer.clone();
        let voice_id = self.voice.voice_id.clone();
        self.spawn_request(async move {
            let audio = synthesize_or_none(synthesizer.as_ref(), &text, &voice_id).await;
            SessionEvent::ReplyAudio { turn, audio }
        });
    }

    fn on_reply_audio(&mut self, turn: u64, audio: Option<Vec<u8>>) {
        if !self.is_current(turn, ConversationState::Speaking) {
            debug!(call_id = %self.call_id, turn, "discarding audio for superseded turn");
            return;
        }
        match audio {
            Some(clip) => {
                debug!(call_id = %self.call_id, bytes = clip.len(), "delivering reply audio");
                self.outbound.deliver(turn, clip);
            }
            None => {
                warn!(call_id = %self.call_id, "no audio synthesized, returning to listening");
                self.finish_turn();
            }
        }
    }

    fn is_current(&self, turn: u64, expected: ConversationState) -> bool {
        self.active_turn == Some(turn) && self.state == expected
    }

    /// Back to listening; picks up the next queued final, if any.
    fn finish_turn(&mut self) {
        self.active_turn = None;
        self.set_state(ConversationState::Listening);
        if let Some(text) = self.queued_finals.pop_front() {
            self.begin_caller_turn(text);
        }
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: std::future::Future<Output = SessionEvent> + Send + 'static,
    {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let event = request.await;
            let _ = tx.send(event).await;
        });
    }

    fn post_later(&self, delay: Duration, event: SessionEvent) {
        self.spawn_request(async move {
            tokio::time::sleep(delay).await;
            event
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            agent_id: self.agent_id.clone(),
            state: self.state,
            stream_id: self.outbound.stream_id().map(str::to_string),
            ready: self.outbound.is_ready(),
            history: self.history.clone(),
            pending_clips: self.outbound.pending_len(),
            outstanding_marks: self.outbound.outstanding_marks(),
            interim_transcript: self.interim.clone(),
            queued_finals: self.queued_finals.len(),
        }
    }

    fn end(&mut self) {
        if self.state == ConversationState::Ended {
            return;
        }
        self.outbound.cancel();
        if let Some(mut stream) = self.recognition.take() {
            stream.close();
        }
        self.queued_finals.clear();
        self.interim = None;
        self.active_turn = None;
        self.set_state(ConversationState::Ended);
        self.mailbox.close();
        let caller_turns = self
            .history
            .iter()
            .filter(|t| t.role == Role::Caller)
            .count();
        info!(
            call_id = %self.call_id,
            turns = self.history.len(),
            caller_turns,
            "call session ended"
        );
    }
}

async fn next_transcript(stream: &mut Option<RecognitionStream>) -> Option<TranscriptEvent> {
    match stream {
        Some(stream) => stream.next_transcript().await,
        None => std::future::pending().await,
    }
}
