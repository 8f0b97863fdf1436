use crate::models::message::MessageKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// Commands a client may send over the live channel. Each one goes through
/// the same façade validation as the matching REST call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    #[serde(rename = "chat.subscribe")]
    Subscribe { conversation_id: Uuid },

    #[serde(rename = "chat.unsubscribe")]
    Unsubscribe { conversation_id: Uuid },

    #[serde(rename = "chat.sendMessage")]
    SendMessage {
        conversation_id: Uuid,
        #[serde(default)]
        kind: Option<MessageKind>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        attachments: Vec<Uuid>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },

    #[serde(rename = "chat.typing")]
    Typing {
        conversation_id: Uuid,
        started: bool,
    },

    #[serde(rename = "chat.presence")]
    Presence { status: PresenceStatus },

    #[serde(rename = "chat.messageRead")]
    MessageRead {
        conversation_id: Uuid,
        up_to_message_id: Uuid,
    },
}
