//! Media stream WebSocket: translates transport framing into session calls.
//!
//! One socket carries one call. The adapter owns no conversation logic; it
//! parses control messages, decodes inbound audio and forwards everything to
//! the call's session, while a writer task serializes whatever the session
//! sends back.

use crate::protocol::{parse_inbound, InboundMessage, OutboundMessage, StartPayload};
use crate::session::{CallSession, SessionHandle};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use callbridge_voice::codec::decode_payload;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound messages buffered per socket before the session waits on the
/// writer.
const OUTBOUND_BUFFER: usize = 256;

/// Upgrades the provider's media stream connection.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-socket adapter state.
struct MediaStream {
    state: Arc<AppState>,
    out: mpsc::Sender<OutboundMessage>,
    session: Option<SessionHandle>,
}

impl MediaStream {
    async fn on_start(&mut self, start: StartPayload) {
        if let Some(current) = &self.session {
            tracing::warn!(
                call_id = %current.call_id(),
                new_call_id = %start.call_sid,
                "start received on a socket that already carries a call, ignoring"
            );
            return;
        }

        let profile = self
            .state
            .directory
            .resolve(start.agent_config_ref())
            .await;
        let handle = CallSession::spawn(
            start.call_sid.clone(),
            profile,
            self.state.ports.clone(),
            self.state.call_settings.clone(),
            self.out.clone(),
        );

        if let Err(e) = self.state.registry.insert(handle.clone()).await {
            tracing::warn!(call_id = %start.call_sid, "rejecting start: {}", e);
            handle.stop().await;
            return;
        }

        handle.start(start.stream_sid).await;
        self.session = Some(handle);
    }

    async fn on_media(&self, payload: &str) {
        let Some(session) = &self.session else {
            return;
        };
        match decode_payload(payload) {
            Ok(audio) => session.media(audio).await,
            Err(e) => {
                tracing::debug!(call_id = %session.call_id(), "dropping undecodable media frame: {}", e);
            }
        }
    }

    async fn on_mark(&self, name: String) {
        if let Some(session) = &self.session {
            session.mark(name).await;
        }
    }

    /// Ends the call carried by this socket, if any.
    async fn end(&mut self) {
        if let Some(session) = self.session.take() {
            self.state
                .registry
                .end_session(session.call_id(), session.session_id())
                .await;
        }
    }

    async fn dispatch(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Connected => {
                tracing::debug!("media stream connected");
            }
            InboundMessage::Start { start, .. } => self.on_start(start).await,
            InboundMessage::Media { media } => {
                if media.is_inbound() {
                    self.on_media(&media.payload).await;
                }
            }
            InboundMessage::Mark { mark } => self.on_mark(mark.name).await,
            InboundMessage::Stop => self.end().await,
            InboundMessage::Dtmf { dtmf } => {
                tracing::debug!(?dtmf, "ignoring dtmf event");
            }
            InboundMessage::Unknown => {}
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut stream = MediaStream {
        state,
        out: tx,
        session: None,
    };

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match parse_inbound(text.as_str()) {
                Some(message) => stream.dispatch(message).await,
                None => tracing::debug!("ignoring malformed media stream frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    stream.end().await;
    drop(stream);
    send_task.abort();
    tracing::debug!("media stream socket closed");
}
