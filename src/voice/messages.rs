use serde::{Deserialize, Serialize};

use crate::config::VoiceConfig;

/// Message sent to the conversation service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConversationInitiationClientData {
        conversation_config_override: ConversationConfigOverride,
    },
    Audio {
        audio: String, // Base64-encoded audio bytes
    },
    UserMessage {
        text: String,
    },
    ContextUpdate {
        context: serde_json::Value,
    },
    Pong {
        event_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationConfigOverride {
    pub agent: AgentOverride,
    pub tts: TtsOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentOverride {
    pub prompt: PromptOverride,
    pub first_message: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsOverride {
    pub voice_id: String,
}

impl ClientMessage {
    /// Initialization payload sent once the socket opens
    pub fn initiation(config: &VoiceConfig) -> Self {
        ClientMessage::ConversationInitiationClientData {
            conversation_config_override: ConversationConfigOverride {
                agent: AgentOverride {
                    prompt: PromptOverride {
                        prompt: config.system_prompt.clone(),
                    },
                    first_message: config.first_message.clone(),
                    language: config.language.clone(),
                },
                tts: TtsOverride {
                    voice_id: config.voice_id.clone(),
                },
            },
        }
    }
}

/// Message received from the conversation service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Audio {
        audio: String,
    },
    Transcript {
        /// Speaker as reported by the service ("user", "agent", ...)
        #[serde(default)]
        role: String,
        #[serde(default)]
        text: String,
    },
    AgentResponse {
        #[serde(default)]
        text: Option<String>,
    },
    Error {
        #[serde(default = "default_error_message", alias = "error")]
        message: String,
    },
    Ping {
        #[serde(default)]
        event_id: Option<u64>,
        #[serde(default)]
        ping_event: Option<PingEvent>,
    },
    #[serde(other)]
    Unknown,
}

/// Keep-alive details some services nest inside `ping`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingEvent {
    pub event_id: u64,
    #[serde(default)]
    pub ping_ms: Option<u64>,
}

impl ServerMessage {
    /// The `pong` owed for a `ping`, whichever form the event id came in
    pub fn pong(&self) -> Option<ClientMessage> {
        match self {
            ServerMessage::Ping {
                event_id,
                ping_event,
            } => event_id
                .or_else(|| ping_event.as_ref().map(|p| p.event_id))
                .map(|event_id| ClientMessage::Pong { event_id }),
            _ => None,
        }
    }
}

fn default_error_message() -> String {
    "voice service reported an error".to_string()
}

/// Result of interpreting one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Payload was not JSON; forwarded verbatim as audio
    RawAudio(Vec<u8>),
    Message(ServerMessage),
    /// Valid JSON that does not match any known message shape
    Malformed(String),
}

/// Interpret an inbound payload. Anything that fails to parse as JSON is
/// treated as raw audio rather than as an error.
pub fn decode_inbound(payload: &[u8]) -> InboundFrame {
    let value = match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => value,
        Err(_) => return InboundFrame::RawAudio(payload.to_vec()),
    };

    match serde_json::from_value::<ServerMessage>(value) {
        Ok(msg) => InboundFrame::Message(msg),
        Err(e) => InboundFrame::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiation_payload_shape() {
        let config = VoiceConfig {
            system_prompt: "Be brief.".to_string(),
            first_message: "Hello there".to_string(),
            language: "de".to_string(),
            voice_id: "voice-1".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_value(ClientMessage::initiation(&config)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "conversation_initiation_client_data",
                "conversation_config_override": {
                    "agent": {
                        "prompt": { "prompt": "Be brief." },
                        "first_message": "Hello there",
                        "language": "de"
                    },
                    "tts": { "voice_id": "voice-1" }
                }
            })
        );
    }

    #[test]
    fn test_outbound_tags() {
        let audio = serde_json::to_value(ClientMessage::Audio { audio: "AAE=".to_string() }).unwrap();
        assert_eq!(audio, serde_json::json!({ "type": "audio", "audio": "AAE=" }));

        let text = serde_json::to_value(ClientMessage::UserMessage { text: "hi".to_string() }).unwrap();
        assert_eq!(text, serde_json::json!({ "type": "user_message", "text": "hi" }));

        let ctx = serde_json::to_value(ClientMessage::ContextUpdate {
            context: serde_json::json!({ "page": "checkout" }),
        })
        .unwrap();
        assert_eq!(
            ctx,
            serde_json::json!({ "type": "context_update", "context": { "page": "checkout" } })
        );
    }

    #[test]
    fn test_decode_transcript() {
        let frame = decode_inbound(br#"{"type":"transcript","role":"agent","text":"Sure."}"#);
        assert_eq!(
            frame,
            InboundFrame::Message(ServerMessage::Transcript {
                role: "agent".to_string(),
                text: "Sure.".to_string(),
            })
        );
    }

    #[test]
    fn test_transcript_role_passes_through() {
        let frame = decode_inbound(br#"{"type":"transcript","role":"assistant","text":"hello"}"#);
        assert_eq!(
            frame,
            InboundFrame::Message(ServerMessage::Transcript {
                role: "assistant".to_string(),
                text: "hello".to_string(),
            })
        );
    }

    #[test]
    fn test_transcript_without_role() {
        let frame = decode_inbound(br#"{"type":"transcript","text":"hello"}"#);
        assert_eq!(
            frame,
            InboundFrame::Message(ServerMessage::Transcript {
                role: String::new(),
                text: "hello".to_string(),
            })
        );
    }

    #[test]
    fn test_pong_for_flat_and_nested_ping() {
        let flat = serde_json::from_str::<ServerMessage>(r#"{"type":"ping","event_id":7}"#).unwrap();
        assert_eq!(flat.pong(), Some(ClientMessage::Pong { event_id: 7 }));

        let nested = serde_json::from_str::<ServerMessage>(
            r#"{"type":"ping","ping_event":{"event_id":9,"ping_ms":40}}"#,
        )
        .unwrap();
        assert_eq!(nested.pong(), Some(ClientMessage::Pong { event_id: 9 }));

        let bare = serde_json::from_str::<ServerMessage>(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(bare.pong(), None);
    }

    #[test]
    fn test_decode_error_message() {
        let frame = decode_inbound(br#"{"type":"error","message":"rate limited"}"#);
        assert_eq!(
            frame,
            InboundFrame::Message(ServerMessage::Error {
                message: "rate limited".to_string()
            })
        );

        let frame = decode_inbound(br#"{"type":"error"}"#);
        assert!(matches!(frame, InboundFrame::Message(ServerMessage::Error { .. })));
    }

    #[test]
    fn test_decode_unknown_type() {
        let frame = decode_inbound(br#"{"type":"interruption","event_id":3}"#);
        assert_eq!(frame, InboundFrame::Message(ServerMessage::Unknown));
    }

    #[test]
    fn test_non_json_is_raw_audio() {
        let payload = [0xffu8, 0x00, 0x10, 0x7f];
        assert_eq!(decode_inbound(&payload), InboundFrame::RawAudio(payload.to_vec()));
    }

    #[test]
    fn test_json_without_tag_is_malformed() {
        let frame = decode_inbound(br#"{"text":"no tag"}"#);
        assert!(matches!(frame, InboundFrame::Malformed(_)));
    }
}
