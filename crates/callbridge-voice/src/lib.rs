//! Voice engines for the callbridge telephony agent.
//!
//! Three capability interfaces sit between a phone call and the outside
//! world: a streaming [`SpeechRecognizer`], a [`ResponseGenerator`] that turns
//! conversation history into the next reply, and a request/response
//! [`SpeechSynthesizer`]. Each has one network-backed implementation here;
//! tests swap in fakes through the same traits.
//!
//! The [`codec`] module converts between the telephony wire encoding
//! (base64-framed 8 kHz μ-law) and the raw bytes the engines exchange.

pub mod codec;
pub mod config;
pub mod error;
pub mod llm;
pub mod stt;
pub mod tts;

pub use config::{AudioEncoding, GeneratorConfig, RecognizerConfig, SynthesizerConfig};
pub use error::VoiceError;
pub use llm::{generate_or_fallback, ChatCompletionGenerator, ResponseGenerator, FALLBACK_REPLY};
pub use stt::{
    RecognitionConfig, RecognitionStream, SpeechRecognizer, StreamingRecognizer, TranscriptEvent,
};
pub use tts::{synthesize_or_none, HttpSynthesizer, SpeechSynthesizer};

use std::sync::Arc;

/// The three engines one call talks to.
#[derive(Clone)]
pub struct VoicePorts {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl VoicePorts {
    /// Builds the production engines from their configuration.
    pub fn from_config(
        recognizer: RecognizerConfig,
        generator: GeneratorConfig,
        synthesizer: SynthesizerConfig,
    ) -> Result<Self, VoiceError> {
        Ok(Self {
            recognizer: Arc::new(StreamingRecognizer::new(recognizer)),
            generator: Arc::new(ChatCompletionGenerator::new(generator)?),
            synthesizer: Arc::new(HttpSynthesizer::new(synthesizer)?),
        })
    }
}

impl std::fmt::Debug for VoicePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePorts").finish_non_exhaustive()
    }
}
