use crate::config::{AudioEncoding, RecognizerConfig};
use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Inbound audio frames buffered toward the engine before new frames are dropped.
/// 256 frames is roughly five seconds of 20 ms telephony audio.
const AUDIO_BUFFER_FRAMES: usize = 256;

/// Transcript events buffered toward the session.
const TRANSCRIPT_BUFFER: usize = 64;

/// One recognition result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    /// `true` once the engine considers this utterance segment stable.
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Per-call stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionConfig {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub interim_results: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Mulaw,
            sample_rate: crate::codec::SAMPLE_RATE_HZ,
            interim_results: true,
        }
    }
}

/// Handle to an open recognition stream.
///
/// Audio goes in through [`RecognitionStream::send`]; transcripts come out of
/// [`RecognitionStream::next_transcript`] in the order the engine produced
/// them. Closing drops the audio side, which tells the backend to flush and
/// hang up; it is safe to call any number of times.
#[derive(Debug)]
pub struct RecognitionStream {
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    transcripts: mpsc::Receiver<TranscriptEvent>,
    task: Option<JoinHandle<()>>,
}

impl RecognitionStream {
    /// Builds a stream from its two channel ends. `task` is the backend
    /// worker, if any, and is detached on close rather than aborted so it can
    /// finish its own shutdown handshake.
    pub fn new(
        audio_tx: mpsc::Sender<Vec<u8>>,
        transcripts: mpsc::Receiver<TranscriptEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            audio_tx: Some(audio_tx),
            transcripts,
            task,
        }
    }

    /// Creates a connected pair of channels for in-process backends.
    pub fn channel() -> (
        Self,
        mpsc::Receiver<Vec<u8>>,
        mpsc::Sender<TranscriptEvent>,
    ) {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER_FRAMES);
        let (transcript_tx, transcript_rx) = mpsc::channel(TRANSCRIPT_BUFFER);
        (
            Self::new(audio_tx, transcript_rx, None),
            audio_rx,
            transcript_tx,
        )
    }

    /// Forwards audio to the engine without waiting. Audio is real-time, so a
    /// backed-up engine loses frames instead of stalling the call.
    pub fn send(&self, audio: Vec<u8>) {
        let Some(tx) = &self.audio_tx else {
            return;
        };
        if let Err(e) = tx.try_send(audio) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    debug!("recognizer backlog full, dropping audio frame");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("recognizer stream closed, dropping audio frame");
                }
            }
        }
    }

    /// Waits for the next transcript. Returns `None` once the backend has
    /// stopped producing results.
    pub async fn next_transcript(&mut self) -> Option<TranscriptEvent> {
        self.transcripts.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.audio_tx.is_none()
    }

    pub fn close(&mut self) {
        if self.audio_tx.take().is_some() {
            self.transcripts.close();
            drop(self.task.take());
        }
    }
}

impl Drop for RecognitionStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// A streaming speech-to-text engine.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Opens a recognition stream for one call.
    async fn open(&self, config: RecognitionConfig) -> Result<RecognitionStream, VoiceError>;
}

/// Result frame sent by the engine.
#[derive(Debug, Deserialize)]
struct ResultsFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    is_final: bool,
    channel: Option<ResultsChannel>,
}

#[derive(Debug, Deserialize)]
struct ResultsChannel {
    #[serde(default)]
    alternatives: Vec<ResultsAlternative>,
}

#[derive(Debug, Deserialize)]
struct ResultsAlternative {
    #[serde(default)]
    transcript: String,
}

/// Maps one engine text frame to a transcript, if it carries one.
///
/// Empty interim results are noise and are skipped. Empty finals are kept so
/// the session can see the utterance boundary; it drops them itself.
fn parse_results(text: &str) -> Option<TranscriptEvent> {
    let frame: ResultsFrame = serde_json::from_str(text).ok()?;
    if frame.kind.as_deref().is_some_and(|k| k != "Results") {
        return None;
    }
    let transcript = frame
        .channel?
        .alternatives
        .into_iter()
        .next()
        .map(|alt| alt.transcript)
        .unwrap_or_default();
    if !frame.is_final && transcript.trim().is_empty() {
        return None;
    }
    Some(TranscriptEvent {
        text: transcript,
        is_final: frame.is_final,
    })
}

/// Deepgram-compatible streaming recognizer over a WebSocket.
#[derive(Debug, Clone)]
pub struct StreamingRecognizer {
    config: RecognizerConfig,
}

impl StreamingRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    fn stream_url(&self, stream: RecognitionConfig) -> String {
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}encoding={}&sample_rate={}&channels=1&model={}&language={}&interim_results={}&endpointing={}&punctuate=true",
            self.config.url,
            separator,
            stream.encoding.as_str(),
            stream.sample_rate,
            self.config.model,
            self.config.language,
            stream.interim_results && self.config.interim_results,
            self.config.endpointing_ms,
        )
    }
}

#[async_trait]
impl SpeechRecognizer for StreamingRecognizer {
    async fn open(&self, config: RecognitionConfig) -> Result<RecognitionStream, VoiceError> {
        let url = self.stream_url(config);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Config(format!("invalid recognizer url: {}", e)))?;
        if !self.config.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
                .map_err(|e| VoiceError::Config(format!("invalid recognizer api key: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Stt(format!("failed to connect to recognizer: {}", e)))?;
        info!(model = %self.config.model, "recognizer stream opened");

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_BUFFER_FRAMES);
        let (transcript_tx, transcript_rx) = mpsc::channel(TRANSCRIPT_BUFFER);
        let (mut sink, mut source) = socket.split();

        let task = tokio::spawn(async move {
            let mut audio_open = true;
            loop {
                tokio::select! {
                    audio = audio_rx.recv(), if audio_open => match audio {
                        Some(bytes) => {
                            if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                                warn!("recognizer send failed, stream stops producing transcripts: {}", e);
                                break;
                            }
                        }
                        None => {
                            audio_open = false;
                            let close = Message::Text(r#"{"type":"CloseStream"}"#.into());
                            if sink.send(close).await.is_err() {
                                break;
                            }
                        }
                    },
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = parse_results(text.as_str()) {
                                if transcript_tx.send(event).await.is_err() && !audio_open {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("recognizer connection error: {}", e);
                            break;
                        }
                    },
                }
            }
            let _ = sink.close().await;
            debug!("recognizer stream task finished");
        });

        Ok(RecognitionStream::new(audio_tx, transcript_rx, Some(task)))
    }
}
