use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Participant {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "profilePicture", default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "otherParticipant", default)]
    pub other: Participant,
    #[serde(rename = "lastMessage", default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    #[serde(rename = "lastMessageAt", default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "unreadCount", default)]
    pub unread: u32,
}

impl Conversation {
    pub fn new(id: impl Into<String>, other: Participant) -> Self {
        Self {
            id: id.into(),
            other,
            last_message: None,
            last_message_at: None,
            unread: 0,
        }
    }

    /// Time used to order the conversation list, newest first.
    pub fn activity(&self) -> Option<DateTime<Utc>> {
        self.last_message_at
            .or_else(|| self.last_message.as_ref().and_then(|m| m.created_at))
    }

    pub fn preview_text(&self) -> &str {
        self.last_message
            .as_ref()
            .map(|m| m.text.as_str())
            .unwrap_or("No messages yet")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "conversation")]
    pub conversation_id: String,
    #[serde(deserialize_with = "sender_ref")]
    pub sender: Participant,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            text: self.text.clone(),
            created_at: Some(self.created_at),
        }
    }

    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender.id == user_id
    }
}

// The backend populates `sender` on most routes but sends the bare id on some.
fn sender_ref<'de, D>(deserializer: D) -> Result<Participant, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SenderRef {
        Full(Participant),
        Id(String),
    }

    Ok(match SenderRef::deserialize(deserializer)? {
        SenderRef::Full(p) => p,
        SenderRef::Id(id) => Participant {
            id,
            ..Default::default()
        },
    })
}
