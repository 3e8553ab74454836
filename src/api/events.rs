use serde::{Deserialize, Serialize};

use crate::api::models::Message;
use crate::error::Result;

/// One websocket text frame as it travels on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    UserTyping,
    MessagesRead,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NewMessage,
        EventKind::UserTyping,
        EventKind::MessagesRead,
        EventKind::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::NewMessage => "new-message",
            EventKind::UserTyping => "user-typing",
            EventKind::MessagesRead => "messages-read",
            EventKind::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName", default)]
    pub user_name: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "isTyping", default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMessage(Message),
    UserTyping(TypingNotice),
    MessagesRead(ReadReceipt),
    Error(ServerError),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::NewMessage(_) => EventKind::NewMessage,
            InboundEvent::UserTyping(_) => EventKind::UserTyping,
            InboundEvent::MessagesRead(_) => EventKind::MessagesRead,
            InboundEvent::Error(_) => EventKind::Error,
        }
    }

    /// Conversation the event is scoped to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            InboundEvent::NewMessage(m) => Some(&m.conversation_id),
            InboundEvent::UserTyping(t) => Some(&t.conversation_id),
            InboundEvent::MessagesRead(r) => Some(&r.conversation_id),
            InboundEvent::Error(_) => None,
        }
    }

    /// Decodes a text frame. Returns `Ok(None)` for events this client does not handle.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let frame: Frame = serde_json::from_str(text)?;
        let Some(kind) = EventKind::from_name(&frame.event) else {
            log::debug!("ignoring unhandled channel event {}", frame.event);
            return Ok(None);
        };
        let event = match kind {
            EventKind::NewMessage => InboundEvent::NewMessage(serde_json::from_value(frame.data)?),
            EventKind::UserTyping => InboundEvent::UserTyping(serde_json::from_value(frame.data)?),
            EventKind::MessagesRead => {
                InboundEvent::MessagesRead(serde_json::from_value(frame.data)?)
            }
            EventKind::Error => InboundEvent::Error(serde_json::from_value(frame.data)?),
        };
        Ok(Some(event))
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            InboundEvent::NewMessage(m) => serde_json::to_value(m)?,
            InboundEvent::UserTyping(t) => serde_json::to_value(t)?,
            InboundEvent::MessagesRead(r) => serde_json::to_value(r)?,
            InboundEvent::Error(e) => serde_json::to_value(e)?,
        };
        let frame = Frame {
            event: self.kind().name().to_string(),
            data,
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Events this client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },
    SendMessage {
        conversation_id: String,
        text: String,
        receiver_id: String,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinConversation { .. } => "join-conversation",
            OutboundEvent::LeaveConversation { .. } => "leave-conversation",
            OutboundEvent::SendMessage { .. } => "send-message",
            OutboundEvent::Typing { .. } => "typing",
        }
    }

    pub fn encode(&self) -> Result<String> {
        let data = match self {
            OutboundEvent::JoinConversation { conversation_id }
            | OutboundEvent::LeaveConversation { conversation_id } => {
                serde_json::json!({ "conversationId": conversation_id })
            }
            OutboundEvent::SendMessage {
                conversation_id,
                text,
                receiver_id,
            } => serde_json::json!({
                "conversationId": conversation_id,
                "text": text,
                "receiverId": receiver_id,
            }),
            OutboundEvent::Typing {
                conversation_id,
                is_typing,
            } => serde_json::json!({
                "conversationId": conversation_id,
                "isTyping": is_typing,
            }),
        };
        let frame = Frame {
            event: self.name().to_string(),
            data,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Parses a frame produced by [`OutboundEvent::encode`].
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let frame: Frame = serde_json::from_str(text)?;
        let field = |key: &str| {
            frame
                .data
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let event = match frame.event.as_str() {
            "join-conversation" => OutboundEvent::JoinConversation {
                conversation_id: field("conversationId"),
            },
            "leave-conversation" => OutboundEvent::LeaveConversation {
                conversation_id: field("conversationId"),
            },
            "send-message" => OutboundEvent::SendMessage {
                conversation_id: field("conversationId"),
                text: field("text"),
                receiver_id: field("receiverId"),
            },
            "typing" => OutboundEvent::Typing {
                conversation_id: field("conversationId"),
                is_typing: frame
                    .data
                    .get("isTyping")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_message_frame() {
        let text = r#"{"event":"new-message","data":{"_id":"m1","conversation":"c1","sender":{"_id":"u2","name":"Bo"},"text":"hey","createdAt":"2024-05-01T10:00:00Z"}}"#;
        let event = InboundEvent::decode(text).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::NewMessage);
        assert_eq!(event.conversation_id(), Some("c1"));
    }

    #[test]
    fn typing_defaults_to_started() {
        let text = r#"{"event":"user-typing","data":{"userId":"u2","userName":"Bo","conversationId":"c1"}}"#;
        match InboundEvent::decode(text).unwrap() {
            Some(InboundEvent::UserTyping(t)) => assert!(t.is_typing),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_events_are_skipped() {
        let text = r#"{"event":"presence","data":{"userId":"u2"}}"#;
        assert!(InboundEvent::decode(text).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let text = r#"{"event":"messages-read","data":{"conv":"c1"}}"#;
        assert!(InboundEvent::decode(text).is_err());
    }

    #[test]
    fn outbound_frames_use_camel_case_payloads() {
        let frame = OutboundEvent::SendMessage {
            conversation_id: "c1".into(),
            text: "hello".into(),
            receiver_id: "u2".into(),
        }
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "send-message");
        assert_eq!(value["data"]["conversationId"], "c1");
        assert_eq!(value["data"]["receiverId"], "u2");
    }
}
