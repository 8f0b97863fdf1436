use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::models::message::{AttachmentDto, Message, MessageDto, MessageKind};
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, ChatEvent};

const MAX_PAGE_SIZE: i64 = 200;

pub struct NewMessage {
    pub kind: MessageKind,
    pub body: Option<String>,
    pub attachments: Vec<Uuid>,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessagePage {
    pub limit: i64,
    pub offset: i64,
    pub ascending: bool,
}

impl Default for MessagePage {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            ascending: false,
        }
    }
}

pub struct MessageService;

impl MessageService {
    /// Append a message to a conversation log and fan it out.
    ///
    /// The per-conversation sequencer guard is held across the commit and
    /// the publish, so subscribers observe `message.sent` events in commit
    /// order and `created_at` is strictly increasing per conversation.
    pub async fn send_message(
        state: &AppState,
        conversation_id: Uuid,
        sender_id: Uuid,
        new_message: NewMessage,
    ) -> Result<MessageDto, AppError> {
        ConversationService::require_membership(&state.db, conversation_id, sender_id).await?;

        match new_message.kind {
            MessageKind::Text | MessageKind::System => {
                if new_message
                    .body
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .is_empty()
                {
                    return Err(AppError::BadRequest("message body cannot be empty".into()));
                }
            }
            MessageKind::Attachment => {
                if new_message.attachments.is_empty() {
                    return Err(AppError::BadRequest(
                        "attachment messages need at least one media reference".into(),
                    ));
                }
            }
        }

        // Media references must resolve before anything is written.
        let mut attachments = Vec::with_capacity(new_message.attachments.len());
        for media_id in &new_message.attachments {
            let info = state
                .media
                .resolve(*media_id)
                .await
                .ok_or_else(|| AppError::BadRequest(format!("unknown media reference {media_id}")))?;
            attachments.push(AttachmentDto {
                id: *media_id,
                filename: info.filename,
                content_type: info.content_type,
                size: info.size,
                url: info.url,
            });
        }

        // A reply reference outside this conversation is cosmetic damage,
        // not a reason to reject the send; it gets nulled instead.
        let reply_to = match new_message.reply_to {
            Some(reply_id) => {
                let row = sqlx::query("SELECT conversation_id FROM messages WHERE id = ?1")
                    .bind(reply_id)
                    .fetch_optional(&state.db)
                    .await?;
                match row {
                    Some(r) if r.get::<Uuid, _>("conversation_id") == conversation_id => {
                        Some(reply_id)
                    }
                    _ => None,
                }
            }
            None => None,
        };

        let mut slot = state.sequencer.acquire(conversation_id).await;
        let created_at = slot.stamp();
        let message_id = Uuid::new_v4();

        let mut tx = state.db.begin().await?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, kind, body, reply_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(message_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(new_message.kind)
        .bind(&new_message.body)
        .bind(reply_to)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        for (position, attachment) in attachments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO message_attachments (id, message_id, media_id, position)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(Uuid::new_v4())
            .bind(message_id)
            .bind(attachment.id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE conversations SET last_message_at = ?2 WHERE id = ?1")
            .bind(conversation_id)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        metrics::MESSAGES_SENT_TOTAL.inc();

        let sender_name = state.directory.display_name(sender_id).await;
        let dto = MessageDto {
            id: message_id,
            conversation_id,
            sender_id,
            sender_name,
            kind: new_message.kind,
            body: new_message.body,
            attachments,
            reply_to,
            created_at: created_at.to_rfc3339(),
            edited_at: None,
        };

        broadcast_event(
            &state.registry,
            conversation_id,
            ChatEvent::MessageSent {
                message: dto.clone(),
            },
        )
        .await;
        drop(slot);

        Ok(dto)
    }

    /// Page of non-deleted messages, newest first by default, with
    /// attachments expanded and sender names attached.
    pub async fn get_messages(
        state: &AppState,
        conversation_id: Uuid,
        requester_id: Uuid,
        page: MessagePage,
    ) -> Result<Vec<MessageDto>, AppError> {
        ConversationService::require_membership(&state.db, conversation_id, requester_id).await?;

        let limit = page.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = page.offset.max(0);
        let order = if page.ascending {
            "ORDER BY created_at ASC, seq ASC"
        } else {
            "ORDER BY created_at DESC, seq DESC"
        };

        let query_sql = format!(
            "SELECT seq, id, conversation_id, sender_id, kind, body, reply_to,
                    created_at, edited_at, deleted_at
               FROM messages
              WHERE conversation_id = ?1 AND deleted_at IS NULL
              {order}
              LIMIT ?2 OFFSET ?3"
        );

        let messages = sqlx::query_as::<_, Message>(&query_sql)
            .bind(conversation_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&state.db)
            .await?;

        if messages.is_empty() {
            return Ok(vec![]);
        }

        let mut attachments_map = Self::attachments_for(state, &messages).await?;

        let mut names: HashMap<Uuid, String> = HashMap::new();
        let mut out = Vec::with_capacity(messages.len());
        for message in &messages {
            let sender_name = match names.get(&message.sender_id) {
                Some(name) => name.clone(),
                None => {
                    let name = state.directory.display_name(message.sender_id).await;
                    names.insert(message.sender_id, name.clone());
                    name
                }
            };
            let attachments = attachments_map.remove(&message.id).unwrap_or_default();
            out.push(MessageDto::from_message(message, sender_name, attachments));
        }

        Ok(out)
    }

    async fn attachments_for(
        state: &AppState,
        messages: &[Message],
    ) -> Result<HashMap<Uuid, Vec<AttachmentDto>>, AppError> {
        let ids: Vec<Uuid> = messages
            .iter()
            .filter(|m| m.kind == MessageKind::Attachment)
            .map(|m| m.id)
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = sqlx::QueryBuilder::new(
            "SELECT message_id, media_id FROM message_attachments WHERE message_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        builder.push(") ORDER BY message_id, position");
        let rows = builder.build().fetch_all(&state.db).await?;

        let mut map: HashMap<Uuid, Vec<AttachmentDto>> = HashMap::new();
        for row in rows {
            let message_id: Uuid = row.get("message_id");
            let media_id: Uuid = row.get("media_id");
            match state.media.resolve(media_id).await {
                Some(info) => {
                    map.entry(message_id).or_default().push(AttachmentDto {
                        id: media_id,
                        filename: info.filename,
                        content_type: info.content_type,
                        size: info.size,
                        url: info.url,
                    });
                }
                None => {
                    // The media store no longer knows this reference; the
                    // message still renders, minus the attachment.
                    tracing::warn!(%media_id, %message_id, "unresolvable media reference");
                }
            }
        }
        Ok(map)
    }

    /// Edit a message body. Only the original sender may edit; a deleted or
    /// unknown message is `NotFound`.
    pub async fn edit_message(
        state: &AppState,
        message_id: Uuid,
        requester_id: Uuid,
        new_body: String,
    ) -> Result<(), AppError> {
        let message = Self::fetch_live(&state.db, message_id).await?;
        if message.sender_id != requester_id {
            return Err(AppError::Forbidden);
        }
        if new_body.trim().is_empty() {
            return Err(AppError::BadRequest("message body cannot be empty".into()));
        }

        let edited_at = Utc::now();
        sqlx::query("UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1")
            .bind(message_id)
            .bind(&new_body)
            .bind(edited_at)
            .execute(&state.db)
            .await?;

        broadcast_event(
            &state.registry,
            message.conversation_id,
            ChatEvent::MessageEdited {
                message_id,
                body: new_body,
                edited_at: edited_at.to_rfc3339(),
            },
        )
        .await;

        Ok(())
    }

    /// Soft-delete a message. The row stays so ordering and reply
    /// references keep resolving; it disappears from history and unread
    /// counts.
    pub async fn delete_message(
        state: &AppState,
        message_id: Uuid,
        requester_id: Uuid,
    ) -> Result<(), AppError> {
        let message = Self::fetch_live(&state.db, message_id).await?;
        if message.sender_id != requester_id {
            return Err(AppError::Forbidden);
        }

        sqlx::query("UPDATE messages SET deleted_at = ?2 WHERE id = ?1")
            .bind(message_id)
            .bind(Utc::now())
            .execute(&state.db)
            .await?;

        broadcast_event(
            &state.registry,
            message.conversation_id,
            ChatEvent::MessageDeleted { message_id },
        )
        .await;

        Ok(())
    }

    /// Advance the caller's read position to a message's timestamp.
    /// Monotonic: a stale call with an older message id never moves
    /// `last_read_at` backward, and repeating a call is a no-op.
    pub async fn mark_read(
        state: &AppState,
        conversation_id: Uuid,
        user_id: Uuid,
        up_to_message_id: Uuid,
    ) -> Result<(), AppError> {
        ConversationService::require_membership(&state.db, conversation_id, user_id).await?;

        // Soft-deleted ids stay valid watermarks.
        let row = sqlx::query(
            "SELECT created_at FROM messages WHERE id = ?1 AND conversation_id = ?2",
        )
        .bind(up_to_message_id)
        .bind(conversation_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;
        let watermark: DateTime<Utc> = row.get("created_at");

        let result = sqlx::query(
            "UPDATE conversation_members SET last_read_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2 AND last_read_at < ?3",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(watermark)
        .execute(&state.db)
        .await?;

        if result.rows_affected() > 0 {
            broadcast_event(
                &state.registry,
                conversation_id,
                ChatEvent::MessageRead {
                    reader_id: user_id,
                    up_to_message_id,
                },
            )
            .await;
        }

        Ok(())
    }

    /// Unread count for a member: non-deleted messages from other senders
    /// newer than the member's read position. Always derived, never cached.
    pub async fn unread_count(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, AppError> {
        let membership =
            ConversationService::require_membership(db, conversation_id, user_id).await?;
        Self::unread_count_since(db, conversation_id, user_id, membership.last_read_at).await
    }

    pub(crate) async fn unread_count_since(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
        last_read_at: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages
              WHERE conversation_id = ?1
                AND deleted_at IS NULL
                AND sender_id != ?2
                AND created_at > ?3",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(last_read_at)
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    async fn fetch_live(db: &SqlitePool, message_id: Uuid) -> Result<Message, AppError> {
        sqlx::query_as::<_, Message>(
            "SELECT seq, id, conversation_id, sender_id, kind, body, reply_to,
                    created_at, edited_at, deleted_at
               FROM messages
              WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(message_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)
    }
}
