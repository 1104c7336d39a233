//! Agent profile and voice configuration.
//!
//! An `AgentProfile` is resolved once when a call starts, from the
//! `agentConfigRef` the telephony provider passes along. Its prompt and voice
//! become the session's immutable `VoiceConfig`.

use serde::{Deserialize, Serialize};

/// Identifier of the profile used when a call names no agent.
pub const DEFAULT_AGENT_ID: &str = "default";

/// Prompt and voice used for the lifetime of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// System prompt handed to the response generator.
    pub prompt_text: String,
    /// Voice identifier understood by the speech synthesizer.
    pub voice_id: String,
}

/// A configured phone agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier, matched against `agentConfigRef`.
    pub id: String,
    /// System prompt for the response generator.
    pub prompt_text: String,
    /// Voice identifier for the speech synthesizer.
    pub voice_id: String,
    /// Spoken once, shortly after the call connects.
    #[serde(default)]
    pub greeting_text: Option<String>,
}

impl AgentProfile {
    /// Returns the immutable voice configuration for a session.
    pub fn voice_config(&self) -> VoiceConfig {
        VoiceConfig {
            prompt_text: self.prompt_text.clone(),
            voice_id: self.voice_id.clone(),
        }
    }

    /// Returns the greeting, or `None` if it is missing or blank.
    pub fn greeting(&self) -> Option<&str> {
        self.greeting_text
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            id: DEFAULT_AGENT_ID.to_string(),
            prompt_text: "You are a friendly phone assistant. Keep replies short, \
                          conversational and easy to understand when spoken aloud."
                .to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            greeting_text: Some("Hello! How can I help you today?".to_string()),
        }
    }
}
