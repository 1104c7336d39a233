#![allow(dead_code)]

use async_trait::async_trait;
use callbridge_server::protocol::OutboundMessage;
use callbridge_server::session::{CallSession, CallSettings, SessionHandle, SessionSnapshot};
use callbridge_types::{AgentProfile, Turn};
use callbridge_voice::{
    RecognitionConfig, RecognitionStream, ResponseGenerator, SpeechRecognizer, SpeechSynthesizer,
    TranscriptEvent, VoiceError, VoicePorts,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Recognizer whose transcripts are pushed by the test.
#[derive(Default)]
pub struct FakeRecognizer {
    fail: bool,
    opened: Mutex<Vec<RecognitionConfig>>,
    transcripts: Mutex<Option<mpsc::Sender<TranscriptEvent>>>,
    audio: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl FakeRecognizer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Waits for the most recently opened stream and returns its transcript side.
    pub async fn transcripts(&self) -> mpsc::Sender<TranscriptEvent> {
        for _ in 0..500 {
            if let Some(tx) = self.transcripts.lock().unwrap().clone() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("recognizer stream was never opened");
    }

    /// Waits for the most recently opened stream and takes its audio side.
    pub async fn take_audio(&self) -> mpsc::Receiver<Vec<u8>> {
        for _ in 0..500 {
            if let Some(audio) = self.audio.lock().unwrap().take() {
                return audio;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("recognizer stream was never opened");
    }

    pub async fn push(&self, event: TranscriptEvent) {
        self.transcripts().await.send(event).await.unwrap();
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn open(&self, config: RecognitionConfig) -> Result<RecognitionStream, VoiceError> {
        self.opened.lock().unwrap().push(config);
        if self.fail {
            return Err(VoiceError::Stt("engine unavailable".to_string()));
        }
        let (stream, audio, transcripts) = RecognitionStream::channel();
        *self.transcripts.lock().unwrap() = Some(transcripts);
        *self.audio.lock().unwrap() = Some(audio);
        Ok(stream)
    }
}

/// Generator that answers from a script and records every history it saw.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, VoiceError>>>,
    delay: Duration,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedGenerator {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(VoiceError::Llm(
                "HTTP 503: overloaded".to_string(),
            ))])),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, history: &[Turn], _system_prompt: &str) -> Result<String, VoiceError> {
        self.seen.lock().unwrap().push(history.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Okay.".to_string()))
    }
}

/// Synthesizer that returns a fixed-size clip, or nothing.
pub struct FakeSynthesizer {
    clip_bytes: Option<usize>,
    slow_from: Option<(usize, Duration)>,
    texts: Mutex<Vec<(String, String)>>,
}

impl FakeSynthesizer {
    pub fn with_clip(bytes: usize) -> Self {
        Self {
            clip_bytes: Some(bytes),
            slow_from: None,
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Delays every request from the `call`-th one (0-based) onwards.
    pub fn slow_from(mut self, call: usize, delay: Duration) -> Self {
        self.slow_from = Some((call, delay));
        self
    }

    pub fn silent() -> Self {
        Self {
            clip_bytes: None,
            slow_from: None,
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Texts requested so far.
    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn voices(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, voice)| voice.clone())
            .collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, VoiceError> {
        let call = {
            let mut texts = self.texts.lock().unwrap();
            texts.push((text.to_string(), voice_id.to_string()));
            texts.len() - 1
        };
        if let Some((from, delay)) = self.slow_from {
            if call >= from {
                tokio::time::sleep(delay).await;
            }
        }
        match self.clip_bytes {
            Some(bytes) => Ok(vec![0x7F; bytes]),
            None => Err(VoiceError::Tts("HTTP 500: engine down".to_string())),
        }
    }
}

pub struct Harness {
    pub recognizer: Arc<FakeRecognizer>,
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl Harness {
    pub fn new(
        recognizer: FakeRecognizer,
        generator: ScriptedGenerator,
        synthesizer: FakeSynthesizer,
    ) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
        }
    }

    pub fn ports(&self) -> VoicePorts {
        VoicePorts {
            recognizer: self.recognizer.clone(),
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
        }
    }

    pub fn spawn(
        &self,
        profile: AgentProfile,
        settings: CallSettings,
    ) -> (SessionHandle, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(512);
        let handle = CallSession::spawn("CA-test", profile, self.ports(), Arc::new(settings), tx);
        (handle, rx)
    }
}

pub fn quiet_profile() -> AgentProfile {
    AgentProfile {
        id: "support".to_string(),
        prompt_text: "You are a helpful phone agent.".to_string(),
        voice_id: "voice-1".to_string(),
        greeting_text: None,
    }
}

pub fn instant_settings() -> CallSettings {
    CallSettings {
        frame_interval: Duration::ZERO,
        ..CallSettings::default()
    }
}

/// Polls snapshots until `pred` holds.
pub async fn wait_snapshot(
    handle: &SessionHandle,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    for _ in 0..1000 {
        if let Some(snapshot) = handle.snapshot().await {
            if pred(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("session never reached the expected snapshot");
}

pub async fn next_outbound(rx: &mut mpsc::Receiver<OutboundMessage>) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("outbound message should arrive")
        .expect("outbound channel open")
}

/// Reads outbound messages up to and including the next mark.
pub async fn read_clip(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    loop {
        let msg = next_outbound(rx).await;
        let done = matches!(msg, OutboundMessage::Mark { .. });
        messages.push(msg);
        if done {
            return messages;
        }
    }
}

pub fn media_count(messages: &[OutboundMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::Media { .. }))
        .count()
}

pub fn mark_count(messages: &[OutboundMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::Mark { .. }))
        .count()
}

/// Everything currently buffered, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}
