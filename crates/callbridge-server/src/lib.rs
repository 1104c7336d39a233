//! Callbridge server library logic.
//!
//! Bridges a telephony provider's bidirectional media stream to speech
//! recognition, response generation and speech synthesis, one
//! [`session::CallSession`] per call.

pub mod agents;
pub mod api;
pub mod config;
pub mod delivery;
pub mod media_stream;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod twiml;

use agents::{AgentDirectory, StaticAgentDirectory};
use axum::{
    routing::{get, post},
    Extension, Router,
};
use callbridge_voice::VoicePorts;
use registry::SessionRegistry;
use session::CallSettings;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Speech recognition, generation and synthesis engines.
    pub ports: VoicePorts,
    /// Agent profile lookup, consulted once per call.
    pub directory: Arc<dyn AgentDirectory>,
    /// Active calls.
    pub registry: SessionRegistry,
    /// Conversation timing and framing shared by every call.
    pub call_settings: Arc<CallSettings>,
    /// Externally reachable host used in the incoming-call answer.
    pub public_url: String,
}

impl AppState {
    /// Builds state from loaded configuration and constructed engines.
    pub fn from_config(config: &config::Config, ports: VoicePorts) -> Self {
        let directory = StaticAgentDirectory::new(config.agents.clone(), &config.default_agent);
        tracing::info!(
            agents = directory.len(),
            default_agent = %config.default_agent,
            "agent directory loaded"
        );
        Self {
            ports,
            directory: Arc::new(directory),
            registry: SessionRegistry::new(),
            call_settings: Arc::new(CallSettings::from_config(
                &config.call,
                config.recognizer.encoding,
            )),
            public_url: config.server.public_url.clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("call_settings", &self.call_settings)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/calls", get(api::list_calls_handler))
        .route("/api/calls/{callId}", get(api::get_call_handler))
        .route("/incoming-call", post(twiml::incoming_call_handler))
        .route(twiml::MEDIA_STREAM_PATH, get(media_stream::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
