use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Sticker,
    /// Anything the provider sends that the inbox cannot render (locations, reactions, ...).
    #[serde(other)]
    Unsupported,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
            MessageType::Document => "document",
            MessageType::Sticker => "sticker",
            MessageType::Unsupported => "unsupported",
        }
    }
}

/// Delivery status. The derived order is the order a message moves through;
/// `Failed` sits apart and is only reachable before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[serde(alias = "pending")]
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Persisted messages only move forward.
    pub fn can_become(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (Failed, _) | (Read, _) => false,
            (Sending | Sent, Failed) => true,
            (_, Failed) => false,
            (current, next) => next > current,
        }
    }
}

/// Which media flow an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    pub fn message_type(self) -> MessageType {
        match self {
            MediaKind::Image => MessageType::Image,
            MediaKind::Audio => MessageType::Audio,
        }
    }

    /// MIME top-level type this kind accepts.
    pub fn mime_prefix(self) -> &'static str {
        match self {
            MediaKind::Image => "image/",
            MediaKind::Audio => "audio/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub organization_id: String,
    pub phone: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default, alias = "contact_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub is_group: bool,
}

impl Conversation {
    pub fn title(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.phone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_mime_type: Option<String>,
    #[serde(default)]
    pub media_caption: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    /// Correlation id echoed back by the backend for messages this client sent.
    #[serde(default)]
    pub client_message_id: Option<String>,
}

impl Message {
    /// One-line rendering used by listings.
    pub fn preview(&self) -> String {
        let body = self
            .content
            .as_deref()
            .or(self.media_caption.as_deref())
            .unwrap_or_default();
        match self.message_type {
            MessageType::Text => body.to_string(),
            MessageType::Unsupported => "[unsupported]".to_string(),
            other if body.is_empty() => format!("[{}]", other.as_str()),
            other => format!("[{}] {body}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default, alias = "connected")]
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadUrlRequest {
    pub organization_id: String,
    pub conversation_id: String,
    pub mime_type: String,
    pub kind: MediaKind,
}

/// Short-lived destination handed out by the backend for a direct upload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub signed_url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub organization_id: String,
    pub conversation_id: String,
    pub instance_id: String,
    pub chat_id: Option<String>,
    pub phone: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_caption: Option<String>,
    pub client_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(default)]
    pub provider_message_id: Option<String>,
    /// Server row of the sent message, when the backend returns a full one.
    /// Anything else in this slot (a status text, a partial row) is ignored.
    #[serde(default, deserialize_with = "lenient_message")]
    pub message: Option<Message>,
}

fn lenient_message<'de, D>(deserializer: D) -> Result<Option<Message>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}
