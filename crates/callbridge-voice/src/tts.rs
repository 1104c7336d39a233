use crate::codec::linear16_le_to_ulaw;
use crate::config::SynthesizerConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Output formats playable on an 8 kHz μ-law line.
const ULAW_8000: &str = "ulaw_8000";
const PCM_8000: &str = "pcm_8000";

/// A request/response text-to-speech engine.
///
/// Implementations return one complete clip in the telephony wire encoding
/// (8 kHz μ-law), ready to be framed onto the transport.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, VoiceError>;
}

/// Runs `synthesizer` and collapses failures and empty clips to `None`.
///
/// `None` means "nothing to play"; callers move on without retrying.
pub async fn synthesize_or_none(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    voice_id: &str,
) -> Option<Vec<u8>> {
    match synthesizer.synthesize(text, voice_id).await {
        Ok(audio) if audio.is_empty() => {
            warn!(voice_id = %voice_id, "synthesizer returned an empty clip");
            None
        }
        Ok(audio) => {
            debug!(voice_id = %voice_id, bytes = audio.len(), "synthesized clip");
            Some(audio)
        }
        Err(e) => {
            warn!(voice_id = %voice_id, "speech synthesis failed: {}", e);
            None
        }
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// ElevenLabs-compatible HTTP synthesizer.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    config: SynthesizerConfig,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self, VoiceError> {
        if config.output_format != ULAW_8000 && config.output_format != PCM_8000 {
            return Err(VoiceError::Config(format!(
                "unsupported synthesizer output format {}, expected {} or {}",
                config.output_format, ULAW_8000, PCM_8000
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.url.trim_end_matches('/'),
            voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if voice_id.trim().is_empty() {
            return Err(VoiceError::Config("voice id must not be empty".to_string()));
        }

        let response = self
            .client
            .post(self.endpoint(voice_id))
            .query(&[("output_format", self.config.output_format.as_str())])
            .header("xi-api-key", &self.config.api_key)
            .header("accept", "audio/basic")
            .json(&SynthesisRequest {
                text,
                model_id: &self.config.model_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "synthesizer returned {}: {}",
                status, detail
            )));
        }

        let body = response.bytes().await?;
        if self.config.output_format == PCM_8000 {
            return Ok(linear16_le_to_ulaw(&body));
        }
        Ok(body.to_vec())
    }
}
