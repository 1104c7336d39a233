//! Transport control messages exchanged with the telephony provider.
//!
//! Framing follows the media-stream convention: every message is a JSON
//! object tagged by `event`, inbound audio arrives as base64 μ-law in
//! `media.payload`, and outbound audio, marks and clears are addressed by
//! `streamSid`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the mark sent after every outbound clip.
pub const AUDIO_COMPLETE_MARK: &str = "audio_complete";

/// Incoming transport message types.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Socket handshake; carries nothing the bridge needs.
    Connected,
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartPayload,
    },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop,
    Dtmf {
        #[serde(default)]
        dtmf: Option<serde_json::Value>,
    },
    /// Any event this bridge does not handle.
    #[serde(other)]
    Unknown,
}

/// Body of the `start` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartPayload {
    /// Agent reference passed through the stream's custom parameters.
    pub fn agent_config_ref(&self) -> Option<&str> {
        self.custom_parameters
            .get("agentConfigRef")
            .or_else(|| self.custom_parameters.get("agent_id"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

impl MediaPayload {
    /// Only caller audio is recognized; echoes of our own outbound track are not.
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().is_none_or(|t| t == "inbound")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Outgoing transport message types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// One frame of a clip.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Sent after the last frame of a clip (or when it is cut short).
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },
    /// Asks the far end to discard audio it has buffered.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

impl OutboundMessage {
    pub fn media(stream_sid: &str, payload: impl Into<String>) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn audio_complete(stream_sid: &str) -> Self {
        Self::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: AUDIO_COMPLETE_MARK.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

/// Parses one text frame. Returns `None` for anything that is not a
/// well-formed transport message; callers ignore those.
pub fn parse_inbound(text: &str) -> Option<InboundMessage> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_start_with_custom_parameters() {
        let text = json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ123",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ123",
                "callSid": "CA999",
                "tracks": ["inbound"],
                "customParameters": {"agentConfigRef": "sales"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        })
        .to_string();

        match parse_inbound(&text) {
            Some(InboundMessage::Start { start, stream_sid }) => {
                assert_eq!(stream_sid.as_deref(), Some("MZ123"));
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA999");
                assert_eq!(start.agent_config_ref(), Some("sales"));
            }
            other => panic!("expected start, got {:?}", other),
        }
    }

    #[test]
    fn agent_id_alias_is_accepted() {
        let start = StartPayload {
            stream_sid: "s".to_string(),
            call_sid: "c".to_string(),
            custom_parameters: HashMap::from([("agent_id".to_string(), "x".to_string())]),
        };
        assert_eq!(start.agent_config_ref(), Some("x"));
    }

    #[test]
    fn parses_media_mark_and_stop() {
        let media = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"5","payload":"//8="}}"#;
        match parse_inbound(media) {
            Some(InboundMessage::Media { media }) => {
                assert_eq!(media.payload, "//8=");
                assert!(media.is_inbound());
            }
            other => panic!("expected media, got {:?}", other),
        }

        let mark = r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"audio_complete"}}"#;
        assert_eq!(
            parse_inbound(mark),
            Some(InboundMessage::Mark {
                mark: MarkPayload {
                    name: AUDIO_COMPLETE_MARK.to_string()
                }
            })
        );

        let stop = r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#;
        assert_eq!(parse_inbound(stop), Some(InboundMessage::Stop));
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(
            parse_inbound(r#"{"event":"keepalive"}"#),
            Some(InboundMessage::Unknown)
        );
        assert_eq!(parse_inbound(r#"{"event":"media"}"#), None);
        assert_eq!(parse_inbound("garbage"), None);
    }

    #[test]
    fn outbound_track_is_not_inbound() {
        let media = MediaPayload {
            payload: String::new(),
            track: Some("outbound".to_string()),
        };
        assert!(!media.is_inbound());
    }

    #[test]
    fn outbound_messages_serialize_to_wire_shape() {
        let media = serde_json::to_value(OutboundMessage::media("MZ1", "AAAA")).unwrap();
        assert_eq!(
            media,
            json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}})
        );

        let mark = serde_json::to_value(OutboundMessage::audio_complete("MZ1")).unwrap();
        assert_eq!(
            mark,
            json!({"event": "mark", "streamSid": "MZ1", "mark": {"name": "audio_complete"}})
        );

        let clear = serde_json::to_value(OutboundMessage::clear("MZ1")).unwrap();
        assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ1"}));
    }
}
