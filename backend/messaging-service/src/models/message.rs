use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Attachment,
    System,
}

/// Stored message row. `seq` is the insertion sequence and breaks
/// `created_at` ties; `deleted_at` marks a soft delete, the row stays so
/// replies keep resolving.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub seq: i64,
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Attachment reference expanded through the media store at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDto {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub url: String,
}

/// Wire shape for messages, shared by the REST responses and the
/// `message.sent` fan-out payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentDto>,
    pub reply_to: Option<Uuid>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl MessageDto {
    pub fn from_message(
        message: &Message,
        sender_name: String,
        attachments: Vec<AttachmentDto>,
    ) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name,
            kind: message.kind,
            body: message.body.clone(),
            attachments,
            reply_to: message.reply_to,
            created_at: message.created_at.to_rfc3339(),
            edited_at: message.edited_at.map(|t| t.to_rfc3339()),
        }
    }
}
