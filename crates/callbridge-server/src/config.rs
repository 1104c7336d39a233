//! Server configuration loading from file and environment variables.

use callbridge_types::agent::DEFAULT_AGENT_ID;
use callbridge_types::AgentProfile;
use callbridge_voice::codec::DEFAULT_FRAME_CHARS;
use callbridge_voice::{GeneratorConfig, RecognizerConfig, SynthesizerConfig, FALLBACK_REPLY};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Streaming speech-to-text engine.
    #[serde(default)]
    pub recognizer: RecognizerConfig,

    /// Chat-completion engine.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Text-to-speech engine.
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    /// Per-call conversation behaviour.
    #[serde(default)]
    pub call: CallConfig,

    /// Profile used when a call names no agent, or an unknown one.
    #[serde(default = "default_agent_id")]
    pub default_agent: String,

    /// Configured phone agents.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentProfile>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable host (and optional port) the telephony provider
    /// connects back to, e.g. `bridge.example.com`. Used to build the media
    /// stream URL handed out by the incoming-call webhook.
    #[serde(default)]
    pub public_url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callbridge_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Conversation timing and framing.
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    /// Delay between the start signal and the greeting, in milliseconds.
    #[serde(default = "default_greeting_delay_ms")]
    pub greeting_delay_ms: u64,

    /// Interim transcripts must be strictly longer than this many characters
    /// to count as barge-in.
    #[serde(default = "default_barge_in_min_chars")]
    pub barge_in_min_chars: usize,

    /// Maximum base64 characters per outbound media frame.
    #[serde(default = "default_frame_chars")]
    pub frame_chars: usize,

    /// Pause between outbound frames, in milliseconds. 0 sends back-to-back.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Spoken when the response generator fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Capacity of each session's event mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl CallConfig {
    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5050
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_greeting_delay_ms() -> u64 {
    1000
}

fn default_barge_in_min_chars() -> usize {
    3
}

fn default_frame_chars() -> usize {
    DEFAULT_FRAME_CHARS
}

fn default_frame_interval_ms() -> u64 {
    20
}

fn default_fallback_reply() -> String {
    FALLBACK_REPLY.to_string()
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_agent_id() -> String {
    DEFAULT_AGENT_ID.to_string()
}

fn default_agents() -> Vec<AgentProfile> {
    vec![AgentProfile::default()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            recognizer: RecognizerConfig::default(),
            generator: GeneratorConfig::default(),
            synthesizer: SynthesizerConfig::default(),
            call: CallConfig::default(),
            default_agent: default_agent_id(),
            agents: default_agents(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            greeting_delay_ms: default_greeting_delay_ms(),
            barge_in_min_chars: default_barge_in_min_chars(),
            frame_chars: default_frame_chars(),
            frame_interval_ms: default_frame_interval_ms(),
            fallback_reply: default_fallback_reply(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an unusable setup.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLBRIDGE_HOST` overrides `server.host`
/// - `CALLBRIDGE_PORT` overrides `server.port`
/// - `CALLBRIDGE_PUBLIC_URL` overrides `server.public_url`
/// - `CALLBRIDGE_LOG_LEVEL` overrides `logging.level`
/// - `CALLBRIDGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLBRIDGE_RECOGNIZER_API_KEY`, `CALLBRIDGE_GENERATOR_API_KEY` and
///   `CALLBRIDGE_SYNTHESIZER_API_KEY` supply engine credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the result fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Applies environment overrides read through `lookup`.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("CALLBRIDGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CALLBRIDGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(public_url) = lookup("CALLBRIDGE_PUBLIC_URL") {
        config.server.public_url = public_url;
    }
    if let Some(level) = lookup("CALLBRIDGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CALLBRIDGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = lookup("CALLBRIDGE_RECOGNIZER_API_KEY") {
        config.recognizer.api_key = key;
    }
    if let Some(key) = lookup("CALLBRIDGE_GENERATOR_API_KEY") {
        config.generator.api_key = key;
    }
    if let Some(key) = lookup("CALLBRIDGE_SYNTHESIZER_API_KEY") {
        config.synthesizer.api_key = key;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.call.frame_chars == 0 {
        return Err(ConfigError::Invalid(
            "call.frame_chars must be greater than zero".to_string(),
        ));
    }
    if config.call.mailbox_capacity == 0 {
        return Err(ConfigError::Invalid(
            "call.mailbox_capacity must be greater than zero".to_string(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for agent in &config.agents {
        if !seen.insert(agent.id.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate agent id: {}",
                agent.id
            )));
        }
    }
    Ok(())
}
