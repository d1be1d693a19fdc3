use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{Attachment, Message};

/// Raw wire frame for the realtime channel: an event name plus a JSON
/// payload. Every typed event is encoded into and decoded from this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub contact_id: String,
    #[serde(default)]
    pub estimate_id: Option<String>,
    pub is_typing: bool,
}

/// Events pushed by the server over the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A completed assistant reply.
    AiMessage(Message),
    /// Persistence confirmation for a message this client sent.
    MessageSaved(Message),
    /// Remote typing-state change.
    UserTyping(TypingEvent),
    /// Generic channel error; payload is implementation-defined.
    ChannelError(serde_json::Value),
}

impl ServerEvent {
    /// Decode a wire frame into a typed event. Unknown event names yield
    /// `None` and are skipped by the caller.
    pub fn from_frame(frame: &EventFrame) -> Option<Self> {
        match frame.event.as_str() {
            "ai_message" => serde_json::from_value(frame.payload.clone())
                .ok()
                .map(ServerEvent::AiMessage),
            "message_saved" => frame
                .payload
                .get("message")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .map(ServerEvent::MessageSaved),
            "user_typing" => serde_json::from_value(frame.payload.clone())
                .ok()
                .map(ServerEvent::UserTyping),
            "error" => Some(ServerEvent::ChannelError(frame.payload.clone())),
            _ => None,
        }
    }
}

/// Events this client emits over the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    UserMessage {
        text: String,
        attachments: Vec<Attachment>,
        contact_id: String,
        estimate_id: Option<String>,
    },
    TypingStart {
        contact_id: String,
        estimate_id: Option<String>,
    },
    TypingStop {
        contact_id: String,
        estimate_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn into_frame(self) -> EventFrame {
        match self {
            ClientEvent::UserMessage {
                text,
                attachments,
                contact_id,
                estimate_id,
            } => EventFrame {
                event: "user_message".to_string(),
                payload: json!({
                    "message": {
                        "text": text,
                        "attachments": attachments,
                    },
                    "contactId": contact_id,
                    "estimateId": estimate_id,
                }),
            },
            ClientEvent::TypingStart {
                contact_id,
                estimate_id,
            } => EventFrame {
                event: "typing_start".to_string(),
                payload: json!({"contactId": contact_id, "estimateId": estimate_id}),
            },
            ClientEvent::TypingStop {
                contact_id,
                estimate_id,
            } => EventFrame {
                event: "typing_stop".to_string(),
                payload: json!({"contactId": contact_id, "estimateId": estimate_id}),
            },
        }
    }
}
