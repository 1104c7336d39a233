use serde::{Deserialize, Serialize};
use std::fmt;

fn default_recognizer_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_recognizer_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_true() -> bool {
    true
}

fn default_endpointing_ms() -> u64 {
    300
}

fn default_generator_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_generator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_synthesizer_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_synthesizer_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Byte layout of the audio fed to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// 8-bit G.711 μ-law, exactly as the telephony transport carries it.
    #[default]
    Mulaw,
    /// 16-bit little-endian linear PCM, expanded from the μ-law wire audio.
    Linear16,
}

impl AudioEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mulaw => "mulaw",
            Self::Linear16 => "linear16",
        }
    }
}

/// Streaming speech-to-text engine settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_recognizer_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Whether the engine should emit interim (non-final) transcripts.
    /// Barge-in detection depends on them.
    #[serde(default = "default_true")]
    pub interim_results: bool,
    /// Trailing silence, in milliseconds, before the engine finalizes an utterance.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u64,
    #[serde(default)]
    pub encoding: AudioEncoding,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            url: default_recognizer_url(),
            api_key: String::new(),
            model: default_recognizer_model(),
            language: default_language(),
            interim_results: true,
            endpointing_ms: default_endpointing_ms(),
            encoding: AudioEncoding::default(),
        }
    }
}

impl fmt::Debug for RecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("interim_results", &self.interim_results)
            .field("endpointing_ms", &self.endpointing_ms)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Chat-completion engine settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: default_generator_url(),
            api_key: String::new(),
            model: default_generator_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Text-to-speech engine settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    #[serde(default = "default_synthesizer_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_synthesizer_model")]
    pub model_id: String,
    /// `ulaw_8000` clips are framed onto the wire as-is; `pcm_8000` clips are
    /// compressed to μ-law first. Other formats are rejected.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            url: default_synthesizer_url(),
            api_key: String::new(),
            model_id: default_synthesizer_model(),
            output_format: default_output_format(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for SynthesizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizerConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
