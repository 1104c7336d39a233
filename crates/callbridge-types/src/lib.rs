//! Shared types for the callbridge voice-agent bridge.
//!
//! This crate holds the plain data that crosses crate boundaries: who said
//! what in a conversation, the conversation state machine's states, and the
//! agent profile looked up when a call starts. It carries no
//! behaviour beyond small helpers, so both the voice ports and the server can
//! depend on it without pulling in a runtime.

pub mod agent;

pub use agent::{AgentProfile, VoiceConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person on the phone.
    Caller,
    /// The synthesized voice agent.
    Agent,
}

impl Role {
    /// Returns the string label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Agent => "agent",
        }
    }
}

/// One entry in a call's conversation history.
///
/// Turns are never edited after they are appended; the history is the
/// prompt context handed to the response generator, so order matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            role: Role::Caller,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
        }
    }
}

/// States of a call's conversation.
///
/// `AwaitingStart → Listening ⇄ Generating ⇄ Speaking`, with `Interrupted`
/// passed through on barge-in and `Ended` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// The transport has connected but not yet sent its start signal.
    AwaitingStart,
    /// Waiting for a final transcript from the caller.
    Listening,
    /// A caller turn is being answered by the response generator.
    Generating,
    /// The agent's reply is being synthesized or delivered.
    Speaking,
    /// Transient: caller speech cut the agent off.
    Interrupted,
    /// The call is over. No further transitions.
    Ended,
}

impl ConversationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingStart => "awaiting_start",
            Self::Listening => "listening",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
            Self::Interrupted => "interrupted",
            Self::Ended => "ended",
        }
    }

    /// Returns `true` once the session has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown conversation state label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown conversation state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for ConversationState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_start" => Ok(Self::AwaitingStart),
            "listening" => Ok(Self::Listening),
            "generating" => Ok(Self::Generating),
            "speaking" => Ok(Self::Speaking),
            "interrupted" => Ok(Self::Interrupted),
            "ended" => Ok(Self::Ended),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let turn = Turn::caller("hello");
        let json = serde_json::to_value(&turn).expect("serialization should not fail");
        assert_eq!(json["role"], "caller");
        assert_eq!(json["text"], "hello");

        let agent: Turn =
            serde_json::from_str(r#"{"role":"agent","text":"hi"}"#).expect("deserialize");
        assert_eq!(agent, Turn::agent("hi"));
    }

    #[test]
    fn state_labels_round_trip() {
        for state in [
            ConversationState::AwaitingStart,
            ConversationState::Listening,
            ConversationState::Generating,
            ConversationState::Speaking,
            ConversationState::Interrupted,
            ConversationState::Ended,
        ] {
            assert_eq!(state.as_str().parse::<ConversationState>(), Ok(state));
        }
        assert!("dialing".parse::<ConversationState>().is_err());
    }

    #[test]
    fn only_ended_is_terminal() {
        assert!(ConversationState::Ended.is_terminal());
        assert!(!ConversationState::Speaking.is_terminal());
    }
}
