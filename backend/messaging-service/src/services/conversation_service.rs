use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{direct_key, Conversation, ConversationKind};
use crate::models::membership::{MemberRole, Membership};
use crate::services::message_service::MessageService;
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, ChatEvent};

const MAX_TITLE_LEN: usize = 255;

pub struct NewConversation {
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMembers {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<Membership>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub role: MemberRole,
    pub is_muted: bool,
    pub unread_count: i64,
}

pub struct ConversationService;

impl ConversationService {
    pub async fn membership(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Membership>, AppError> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT conversation_id, user_id, role, joined_at, last_read_at, is_muted
             FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(membership)
    }

    pub async fn is_member(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(Self::membership(db, conversation_id, user_id)
            .await?
            .is_some())
    }

    /// Membership row or `NotAMember`. Every read and write on a
    /// conversation goes through this check before touching anything else.
    pub async fn require_membership(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Membership, AppError> {
        Self::membership(db, conversation_id, user_id)
            .await?
            .ok_or(AppError::NotAMember)
    }

    /// Create a conversation. Direct conversations are get-or-create on the
    /// unordered user pair; repeated calls return the existing row unchanged.
    pub async fn create_conversation(
        state: &AppState,
        creator_id: Uuid,
        req: NewConversation,
    ) -> Result<ConversationWithMembers, AppError> {
        match req.kind {
            ConversationKind::Direct => {
                Self::create_direct(state, creator_id, &req.member_ids).await
            }
            ConversationKind::Group => {
                Self::create_group(state, creator_id, req.title, req.member_ids).await
            }
        }
    }

    async fn create_direct(
        state: &AppState,
        creator_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<ConversationWithMembers, AppError> {
        let mut others: Vec<Uuid> = member_ids.to_vec();
        others.sort();
        others.dedup();
        others.retain(|id| *id != creator_id);
        if others.len() != 1 {
            return Err(AppError::InvalidParticipants(
                "a direct conversation needs exactly one other member".into(),
            ));
        }
        let other_id = others[0];
        let key = direct_key(creator_id, other_id);

        if let Some(existing) = Self::find_direct(&state.db, &key).await? {
            return Self::get_conversation_with_members(&state.db, existing, creator_id).await;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut tx = state.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO conversations (id, kind, title, owner_id, direct_key, created_at, last_message_at)
             VALUES (?1, 'direct', NULL, ?2, ?3, ?4, ?4)",
        )
        .bind(id)
        .bind(creator_id)
        .bind(&key)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // Lost a creation race: someone inserted the same pair first.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                drop(tx);
                let existing = Self::find_direct(&state.db, &key)
                    .await?
                    .ok_or(AppError::Internal)?;
                return Self::get_conversation_with_members(&state.db, existing, creator_id).await;
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at, last_read_at)
             VALUES (?1, ?2, 'admin', ?4, ?4), (?1, ?3, 'member', ?4, ?4)",
        )
        .bind(id)
        .bind(creator_id)
        .bind(other_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Self::get_conversation_with_members(&state.db, id, creator_id).await
    }

    async fn find_direct(db: &SqlitePool, key: &str) -> Result<Option<Uuid>, AppError> {
        let row = sqlx::query("SELECT id FROM conversations WHERE direct_key = ?1")
            .bind(key)
            .fetch_optional(db)
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn create_group(
        state: &AppState,
        creator_id: Uuid,
        title: Option<String>,
        member_ids: Vec<Uuid>,
    ) -> Result<ConversationWithMembers, AppError> {
        let title = title.map(|t| t.trim().to_string()).unwrap_or_default();
        if title.is_empty() {
            return Err(AppError::BadRequest("group title cannot be empty".into()));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(AppError::BadRequest(format!(
                "group title too long (max {MAX_TITLE_LEN})"
            )));
        }

        let mut others = member_ids;
        others.sort();
        others.dedup();
        others.retain(|id| *id != creator_id);

        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut tx = state.db.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, kind, title, owner_id, direct_key, created_at, last_message_at)
             VALUES (?1, 'group', ?2, ?3, NULL, ?4, ?4)",
        )
        .bind(id)
        .bind(&title)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at, last_read_at)
             VALUES (?1, ?2, 'admin', ?3, ?3)",
        )
        .bind(id)
        .bind(creator_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for member_id in &others {
            sqlx::query(
                "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at, last_read_at)
                 VALUES (?1, ?2, 'member', ?3, ?3)",
            )
            .bind(id)
            .bind(member_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Self::get_conversation_with_members(&state.db, id, creator_id).await
    }

    /// Conversation + member list + the requester's unread count.
    pub async fn get_conversation_with_members(
        db: &SqlitePool,
        conversation_id: Uuid,
        requester_id: Uuid,
    ) -> Result<ConversationWithMembers, AppError> {
        let membership = Self::require_membership(db, conversation_id, requester_id).await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, kind, title, owner_id, is_archived, created_at, last_message_at
             FROM conversations WHERE id = ?1",
        )
        .bind(conversation_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound)?;

        let members = sqlx::query_as::<_, Membership>(
            "SELECT conversation_id, user_id, role, joined_at, last_read_at, is_muted
             FROM conversation_members
             WHERE conversation_id = ?1
             ORDER BY joined_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;

        let unread_count = MessageService::unread_count_since(
            db,
            conversation_id,
            requester_id,
            membership.last_read_at,
        )
        .await?;

        Ok(ConversationWithMembers {
            conversation,
            members,
            unread_count,
        })
    }

    /// Non-archived conversations for a user, most recent activity first,
    /// each with the user's derived unread count.
    pub async fn list_conversations(
        db: &SqlitePool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.kind, c.title, c.owner_id, c.is_archived, c.created_at,
                   c.last_message_at, cm.role, cm.is_muted,
                   (
                     SELECT COUNT(*) FROM messages m
                      WHERE m.conversation_id = c.id
                        AND m.deleted_at IS NULL
                        AND m.sender_id != cm.user_id
                        AND m.created_at > cm.last_read_at
                   ) AS unread_count
              FROM conversations c
              JOIN conversation_members cm ON cm.conversation_id = c.id
             WHERE cm.user_id = ?1 AND c.is_archived = 0
             ORDER BY c.last_message_at DESC
             LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;

        let summaries = rows
            .into_iter()
            .map(|row| ConversationSummary {
                conversation: Conversation {
                    id: row.get("id"),
                    kind: row.get("kind"),
                    title: row.get("title"),
                    owner_id: row.get("owner_id"),
                    is_archived: row.get("is_archived"),
                    created_at: row.get("created_at"),
                    last_message_at: row.get("last_message_at"),
                },
                role: row.get("role"),
                is_muted: row.get("is_muted"),
                unread_count: row.get("unread_count"),
            })
            .collect();

        Ok(summaries)
    }

    /// Add members to a group conversation. Acting user must be an admin.
    /// Ids that are already members are skipped without error. Returns the
    /// ids actually added.
    pub async fn add_members(
        state: &AppState,
        conversation_id: Uuid,
        acting_user_id: Uuid,
        user_ids: Vec<Uuid>,
    ) -> Result<Vec<Uuid>, AppError> {
        let actor =
            Self::require_membership(&state.db, conversation_id, acting_user_id).await?;
        if actor.role != MemberRole::Admin {
            return Err(AppError::Forbidden);
        }
        if Self::kind_of(&state.db, conversation_id).await? == ConversationKind::Direct {
            return Err(AppError::InvalidParticipants(
                "direct conversations always have exactly two members".into(),
            ));
        }

        let mut ids = user_ids;
        ids.sort();
        ids.dedup();

        let now = Utc::now();
        let mut added = Vec::new();
        for user_id in ids {
            let result = sqlx::query(
                "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at, last_read_at)
                 VALUES (?1, ?2, 'member', ?3, ?3)
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(conversation_id)
            .bind(user_id)
            .bind(now)
            .execute(&state.db)
            .await?;
            if result.rows_affected() > 0 {
                added.push(user_id);
            }
        }

        for user_id in &added {
            let display_name = state.directory.display_name(*user_id).await;
            broadcast_event(
                &state.registry,
                conversation_id,
                ChatEvent::MemberJoined {
                    user_id: *user_id,
                    display_name,
                    role: MemberRole::Member.as_str().into(),
                },
            )
            .await;
        }

        Ok(added)
    }

    /// Remove a member. Allowed for self-leave or for admins; direct
    /// conversations never change membership. Deleting the row deletes the
    /// user's read state with it.
    pub async fn remove_member(
        state: &AppState,
        conversation_id: Uuid,
        member_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<(), AppError> {
        let actor =
            Self::require_membership(&state.db, conversation_id, acting_user_id).await?;
        if Self::kind_of(&state.db, conversation_id).await? == ConversationKind::Direct {
            return Err(AppError::InvalidParticipants(
                "direct conversations always have exactly two members".into(),
            ));
        }
        if member_id != acting_user_id && actor.role != MemberRole::Admin {
            return Err(AppError::Forbidden);
        }

        let result = sqlx::query(
            "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
        )
        .bind(conversation_id)
        .bind(member_id)
        .execute(&state.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        // The removed user stops receiving topic events immediately.
        state.registry.evict(conversation_id, member_id).await;
        broadcast_event(
            &state.registry,
            conversation_id,
            ChatEvent::MemberLeft { user_id: member_id },
        )
        .await;

        Ok(())
    }

    /// Archive (never delete) a conversation. Admin only. Archived
    /// conversations drop out of listings but stay readable to members.
    pub async fn archive_conversation(
        state: &AppState,
        conversation_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<(), AppError> {
        let actor =
            Self::require_membership(&state.db, conversation_id, acting_user_id).await?;
        if actor.role != MemberRole::Admin {
            return Err(AppError::Forbidden);
        }

        sqlx::query("UPDATE conversations SET is_archived = 1 WHERE id = ?1")
            .bind(conversation_id)
            .execute(&state.db)
            .await?;
        Ok(())
    }

    /// Toggle the caller's own mute flag.
    pub async fn set_muted(
        db: &SqlitePool,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
    ) -> Result<(), AppError> {
        Self::require_membership(db, conversation_id, user_id).await?;
        sqlx::query(
            "UPDATE conversation_members SET is_muted = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(muted)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn kind_of(
        db: &SqlitePool,
        conversation_id: Uuid,
    ) -> Result<ConversationKind, AppError> {
        let row = sqlx::query("SELECT kind FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .fetch_optional(db)
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(row.get("kind"))
    }

    /// Distinct users sharing at least one conversation with `user_id`,
    /// excluding the user. Presence fans out to these peers.
    pub async fn co_member_ids(db: &SqlitePool, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT peer.user_id AS user_id
              FROM conversation_members own
              JOIN conversation_members peer
                ON peer.conversation_id = own.conversation_id
             WHERE own.user_id = ?1 AND peer.user_id != ?1
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }
}
