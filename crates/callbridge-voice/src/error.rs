use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("response generation error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("audio codec error: {0}")]
    Codec(String),
}
