//! Incoming-call webhook.
//!
//! The telephony provider requests call instructions when a call arrives. The
//! answer connects the call's audio to this server's media stream endpoint
//! and passes the agent reference through as a stream parameter, where it
//! comes back in the `start` message.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Path the media stream WebSocket is served on.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";

/// Query parameters for `POST /incoming-call`.
#[derive(Debug, Deserialize)]
pub struct IncomingCallParams {
    /// Agent to attach to the call. Omitted means the default agent.
    pub agent: Option<String>,
}

/// Escapes text for use inside an XML attribute.
fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Builds the WebSocket URL for `public_url`, which may be a bare host or a
/// full `http(s)://` / `ws(s)://` URL.
pub fn media_stream_url(public_url: &str) -> String {
    let trimmed = public_url.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("wss://"))
        .unwrap_or(trimmed);
    if let Some(host) = host
        .strip_prefix("http://")
        .or_else(|| host.strip_prefix("ws://"))
    {
        return format!("ws://{}{}", host, MEDIA_STREAM_PATH);
    }
    format!("wss://{}{}", host, MEDIA_STREAM_PATH)
}

/// Renders the call instructions document.
pub fn connect_response(stream_url: &str, agent_ref: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<Response><Connect><Stream url=\"{}\">",
            "<Parameter name=\"agentConfigRef\" value=\"{}\"/>",
            "</Stream></Connect></Response>"
        ),
        escape_xml(stream_url),
        escape_xml(agent_ref)
    )
}

/// Handler for `POST /incoming-call`.
pub async fn incoming_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<IncomingCallParams>,
) -> Result<Response, ApiError> {
    if state.public_url.trim().is_empty() {
        return Err(ApiError::InternalServerError(
            "server.public_url is not configured".to_string(),
        ));
    }

    let agent_ref = match params.agent.as_deref().map(str::trim) {
        Some(agent) if !agent.is_empty() => agent.to_string(),
        _ => state.directory.default_profile().id,
    };
    tracing::info!(agent_ref = %agent_ref, "answering incoming call");

    let body = connect_response(&media_stream_url(&state.public_url), &agent_ref);
    Ok(([(header::CONTENT_TYPE, "text/xml")], body).into_response())
}
