//! Fan-out event definitions.
//!
//! All events share one flat JSON structure:
//!
//! ```json
//! {
//!     "type": "message.sent",
//!     "timestamp": "2026-08-05T10:30:00Z",
//!     "conversation_id": "uuid",
//!     ...event fields
//! }
//! ```
//!
//! Conversation-topic events carry `conversation_id`; presence goes to
//! per-user private queues and omits it.

use crate::models::message::MessageDto;
use crate::websocket::message_types::PresenceStatus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    /// New message committed to the conversation log.
    #[serde(rename = "message.sent")]
    MessageSent { message: MessageDto },

    /// Message body edited by its sender.
    #[serde(rename = "message.edited")]
    MessageEdited {
        message_id: Uuid,
        body: String,
        edited_at: String,
    },

    /// Message soft-deleted by its sender.
    #[serde(rename = "message.deleted")]
    MessageDeleted { message_id: Uuid },

    /// Read receipt: reader advanced their read position.
    #[serde(rename = "message.read")]
    MessageRead {
        reader_id: Uuid,
        up_to_message_id: Uuid,
    },

    #[serde(rename = "typing.started")]
    TypingStarted { user_id: Uuid },

    #[serde(rename = "typing.stopped")]
    TypingStopped { user_id: Uuid },

    #[serde(rename = "member.joined")]
    MemberJoined {
        user_id: Uuid,
        display_name: String,
        role: String,
    },

    #[serde(rename = "member.left")]
    MemberLeft { user_id: Uuid },

    /// Presence is a property of the user, not a conversation; delivered to
    /// per-user private queues only.
    #[serde(rename = "presence.updated")]
    PresenceUpdated {
        user_id: Uuid,
        status: PresenceStatus,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message.sent",
            Self::MessageEdited { .. } => "message.edited",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::MessageRead { .. } => "message.read",
            Self::TypingStarted { .. } => "typing.started",
            Self::TypingStopped { .. } => "typing.stopped",
            Self::MemberJoined { .. } => "member.joined",
            Self::MemberLeft { .. } => "member.left",
            Self::PresenceUpdated { .. } => "presence.updated",
        }
    }

    /// Serialize into the flat broadcast payload. This is the only place
    /// event serialization happens; handlers never build event JSON by hand.
    pub fn to_broadcast_payload(
        &self,
        conversation_id: Option<Uuid>,
    ) -> Result<String, serde_json::Error> {
        let mut payload = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert(
                "timestamp".into(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
            if let Some(id) = conversation_id {
                map.insert("conversation_id".into(), serde_json::json!(id));
            }
        }
        serde_json::to_string(&payload)
    }
}

/// Publish an event to a conversation topic. Serialization failures are a
/// programming error and surface in logs; delivery failures are the
/// registry's business (a dropped subscriber never fails the commit).
pub async fn broadcast_event(
    registry: &crate::websocket::ConnectionRegistry,
    conversation_id: Uuid,
    event: ChatEvent,
) {
    match event.to_broadcast_payload(Some(conversation_id)) {
        Ok(payload) => {
            registry.broadcast(conversation_id, &payload).await;
        }
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
        }
    }
}

/// Deliver an event to one user's private queues.
pub async fn send_event_to_user(
    registry: &crate::websocket::ConnectionRegistry,
    user_id: Uuid,
    event: ChatEvent,
) {
    match event.to_broadcast_payload(None) {
        Ok(payload) => registry.send_to_user(user_id, &payload).await,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
        }
    }
}
