use crate::middleware::guards::User;
use crate::models::conversation::ConversationKind;
use crate::services::conversation_service::{
    ConversationService, ConversationSummary, ConversationWithMembers, NewConversation,
};
use crate::services::message_service::MessageService;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub member_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<ConversationWithMembers>, crate::error::AppError> {
    let conversation = ConversationService::create_conversation(
        &state,
        user.id,
        NewConversation {
            kind: body.kind,
            title: body.title,
            member_ids: body.member_ids,
        },
    )
    .await?;
    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: User,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<ConversationSummary>>, crate::error::AppError> {
    let conversations =
        ConversationService::list_conversations(&state.db, user.id, page.limit(), page.offset())
            .await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationWithMembers>, crate::error::AppError> {
    let conversation =
        ConversationService::get_conversation_with_members(&state.db, id, user.id).await?;
    Ok(Json(conversation))
}

pub async fn archive_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, crate::error::AppError> {
    ConversationService::archive_conversation(&state, id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SetMutedRequest {
    pub muted: bool,
}

pub async fn set_muted(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<SetMutedRequest>,
) -> Result<StatusCode, crate::error::AppError> {
    ConversationService::set_muted(&state.db, id, user.id, body.muted).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct MarkAsReadRequest {
    pub up_to_message_id: Uuid,
}

/// Advance the caller's read position (idempotent, never backward).
pub async fn mark_as_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<MarkAsReadRequest>,
) -> Result<StatusCode, crate::error::AppError> {
    MessageService::mark_read(&state, id, user.id, body.up_to_message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub conversation_id: Uuid,
    pub unread_count: i64,
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<UnreadCountResponse>, crate::error::AppError> {
    let unread_count = MessageService::unread_count(&state.db, id, user.id).await?;
    Ok(Json(UnreadCountResponse {
        conversation_id: id,
        unread_count,
    }))
}
