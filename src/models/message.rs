use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Identity;

/// A chat message as rendered by the client. Deserialized from backend rows
/// (snapshot pages and realtime inserts) and also constructed locally as an
/// optimistic placeholder while the insert is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender: SenderInfo,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(rename = "attachment_metadata", default)]
    pub attachment: Option<AttachmentMeta>,
    #[serde(rename = "reply_to_id", default)]
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Client-generated correlation id echoed back by the backend, used to
    /// match the realtime echo against the optimistic placeholder.
    #[serde(rename = "client_ref", default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl ChatMessage {
    /// Optimistic placeholder rendered before the insert is confirmed. The
    /// placeholder id is derived from the correlation id; the confirmed row
    /// replaces it in place once the echo arrives.
    pub fn placeholder(
        outgoing: &OutgoingMessage,
        sender: &Identity,
        room_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("pending-{}", outgoing.correlation_id),
            room_id: room_id.to_string(),
            sender: SenderInfo {
                id: sender.user_id.clone(),
                display_name: sender.display_name.clone(),
                avatar_url: sender.avatar_url.clone(),
            },
            kind: outgoing.kind,
            content: outgoing.content.clone(),
            attachment: outgoing.attachment.clone(),
            reply_to: outgoing.reply_to.clone(),
            created_at: now,
            correlation_id: Some(outgoing.correlation_id.clone()),
            is_deleted: false,
            delivery: DeliveryState::Sending,
        }
    }
}

/// Sender profile joined onto each message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: String,
    #[serde(rename = "full_name")]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Voice,
}

/// Attachment descriptor carried alongside image/file/voice messages
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttachmentMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// Client-inferred delivery state; never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    Sending,
    #[default]
    Delivered,
    Failed,
}

/// An outgoing message before it has been accepted by the backend
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub correlation_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub attachment: Option<AttachmentMeta>,
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            kind: MessageKind::Text,
            content: content.into(),
            attachment: None,
            reply_to: None,
        }
    }

    pub fn with_attachment(kind: MessageKind, content: String, attachment: AttachmentMeta) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            kind,
            content,
            attachment: Some(attachment),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}
