use crate::middleware::guards::User;
use crate::models::message::{MessageDto, MessageKind};
use crate::routes::conversations::PageParams;
use crate::services::message_service::{MessagePage, MessageService, NewMessage};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub kind: Option<MessageKind>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Uuid>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<MessageDto>, crate::error::AppError> {
    let message = MessageService::send_message(
        &state,
        conversation_id,
        user.id,
        NewMessage {
            kind: body.kind.unwrap_or(MessageKind::Text),
            body: body.body,
            attachments: body.attachments,
            reply_to: body.reply_to,
        },
    )
    .await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// "asc" for oldest-first; newest-first is the default.
    pub order: Option<String>,
}

pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<MessageDto>>, crate::error::AppError> {
    let page = PageParams {
        limit: params.limit,
        offset: params.offset,
    };
    let messages = MessageService::get_messages(
        &state,
        conversation_id,
        user.id,
        MessagePage {
            limit: page.limit(),
            offset: page.offset(),
            ascending: params.order.as_deref() == Some("asc"),
        },
    )
    .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub body: String,
}

pub async fn update_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
    Json(body): Json<UpdateMessageRequest>,
) -> Result<StatusCode, crate::error::AppError> {
    MessageService::edit_message(&state, message_id, user.id, body.body).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: User,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, crate::error::AppError> {
    MessageService::delete_message(&state, message_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
