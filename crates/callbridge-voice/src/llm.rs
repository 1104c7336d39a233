use crate::config::GeneratorConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callbridge_types::{Role, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Spoken when the generator cannot produce a reply.
pub const FALLBACK_REPLY: &str = "I'm sorry, I'm having trouble right now. Could you say that again?";

/// A text generation engine producing one reply per caller turn.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Produces the agent's next utterance from the ordered history.
    async fn generate(&self, history: &[Turn], system_prompt: &str) -> Result<String, VoiceError>;
}

/// Calls `generator` and substitutes `fallback` on any failure, so a final
/// transcript always yields something to say.
pub async fn generate_or_fallback(
    generator: &dyn ResponseGenerator,
    history: &[Turn],
    system_prompt: &str,
    fallback: &str,
) -> String {
    match generator.generate(history, system_prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply,
        Ok(_) => {
            warn!("response generator returned an empty reply, using fallback");
            fallback.to_string()
        }
        Err(e) => {
            warn!("response generation failed, using fallback: {}", e);
            fallback.to_string()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completion client.
#[derive(Debug, Clone)]
pub struct ChatCompletionGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

impl ChatCompletionGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.url.trim_end_matches('/')
        )
    }
}

fn build_messages<'a>(history: &'a [Turn], system_prompt: &'a str) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage {
        role: "system",
        content: system_prompt,
    });
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: match turn.role {
            Role::Caller => "user",
            Role::Agent => "assistant",
        },
        content: &turn.text,
    }));
    messages
}

#[async_trait]
impl ResponseGenerator for ChatCompletionGenerator {
    async fn generate(&self, history: &[Turn], system_prompt: &str) -> Result<String, VoiceError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(history, system_prompt),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Llm(format!(
                "generator returned {}: {}",
                status, detail
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(VoiceError::Llm("generator returned no content".to_string()));
        }
        Ok(reply)
    }
}
