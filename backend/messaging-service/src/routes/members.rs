use crate::middleware::guards::User;
use crate::models::membership::Membership;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct AddMembersResponse {
    pub added: Vec<Uuid>,
}

/// Add members to a group. Ids that are already members are skipped, not
/// errors.
pub async fn add_members(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
    Json(body): Json<AddMembersRequest>,
) -> Result<Json<AddMembersResponse>, crate::error::AppError> {
    let added = ConversationService::add_members(&state, id, user.id, body.user_ids).await?;
    Ok(Json(AddMembersResponse { added }))
}

pub async fn list_members(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Membership>>, crate::error::AppError> {
    let conversation =
        ConversationService::get_conversation_with_members(&state.db, id, user.id).await?;
    Ok(Json(conversation.members))
}

/// Self-leave, or removal by an admin.
pub async fn remove_member(
    State(state): State<AppState>,
    user: User,
    Path((id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, crate::error::AppError> {
    ConversationService::remove_member(&state, id, member_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
