use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics;
use crate::middleware::auth::bearer_token;
use crate::middleware::rate_limit::ActionType;
use crate::models::message::MessageKind;
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::{MessageService, NewMessage};
use crate::state::AppState;
use crate::websocket::events::{broadcast_event, send_event_to_user, ChatEvent};
use crate::websocket::message_types::WsInboundEvent;
use crate::websocket::ConnectionId;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Upgrade handler. The principal comes from the identity provider (query
/// token or Authorization header); an unresolvable token never upgrades.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = params
        .token
        .clone()
        .or_else(|| bearer_token(&headers).map(str::to_string));

    let user_id = match token {
        Some(token) => state.identity.resolve(&token).await,
        None => None,
    };

    match user_id {
        Some(user_id) => ws
            .on_upgrade(move |socket| handle_socket(state, user_id, socket))
            .into_response(),
        None => AppError::Unauthorized.into_response(),
    }
}

/// Per-connection task: multiplexes the bounded outbound queue and inbound
/// commands. A failed command answers with an `error` frame and keeps the
/// connection open; closing drops every subscription with the connection.
async fn handle_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    let (connection_id, mut rx) = state.registry.register(user_id).await;
    metrics::WS_ACTIVE_CONNECTIONS.inc();

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // The registry dropped this connection (queue overflow).
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_command(&state, connection_id, user_id, &text).await
                        {
                            if sender.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings are answered by the framework
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.drop_connection(connection_id).await;
    metrics::WS_ACTIVE_CONNECTIONS.dec();
}

fn error_frame(err: &AppError) -> String {
    let (_, response) = crate::middleware::error_handling::map_error(err);
    serde_json::json!({
        "type": "error",
        "code": response.code,
        "message": response.message,
    })
    .to_string()
}

async fn handle_command(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: Uuid,
    raw: &str,
) -> Option<String> {
    let command = match serde_json::from_str::<WsInboundEvent>(raw) {
        Ok(command) => command,
        Err(e) => {
            warn!(%user_id, error = %e, "unparseable inbound frame");
            return Some(error_frame(&AppError::BadRequest(
                "unrecognized command".into(),
            )));
        }
    };

    match dispatch(state, connection_id, user_id, command).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(%user_id, error = %err, "inbound command rejected");
            Some(error_frame(&err))
        }
    }
}

async fn dispatch(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: Uuid,
    command: WsInboundEvent,
) -> Result<Option<String>, AppError> {
    match command {
        WsInboundEvent::Subscribe { conversation_id } => {
            ConversationService::require_membership(&state.db, conversation_id, user_id).await?;
            state.registry.subscribe(connection_id, conversation_id).await;
            Ok(Some(
                serde_json::json!({
                    "type": "chat.subscribed",
                    "conversation_id": conversation_id,
                })
                .to_string(),
            ))
        }

        WsInboundEvent::Unsubscribe { conversation_id } => {
            state
                .registry
                .unsubscribe(connection_id, conversation_id)
                .await;
            Ok(Some(
                serde_json::json!({
                    "type": "chat.unsubscribed",
                    "conversation_id": conversation_id,
                })
                .to_string(),
            ))
        }

        WsInboundEvent::SendMessage {
            conversation_id,
            kind,
            body,
            attachments,
            reply_to,
        } => {
            // Same transport-boundary limit as the REST surface.
            state
                .rate_limiter
                .check(user_id, ActionType::SendMessage)
                .await
                .map_err(|e| AppError::RateLimited {
                    retry_after_secs: e.retry_after_secs,
                })?;

            let message = MessageService::send_message(
                state,
                conversation_id,
                user_id,
                NewMessage {
                    kind: kind.unwrap_or(MessageKind::Text),
                    body,
                    attachments,
                    reply_to,
                },
            )
            .await?;

            Ok(Some(
                serde_json::json!({
                    "type": "chat.ack",
                    "message_id": message.id,
                    "conversation_id": conversation_id,
                    "created_at": message.created_at,
                })
                .to_string(),
            ))
        }

        WsInboundEvent::Typing {
            conversation_id,
            started,
        } => {
            ConversationService::require_membership(&state.db, conversation_id, user_id).await?;
            let event = if started {
                ChatEvent::TypingStarted { user_id }
            } else {
                ChatEvent::TypingStopped { user_id }
            };
            broadcast_event(&state.registry, conversation_id, event).await;
            Ok(None)
        }

        WsInboundEvent::Presence { status } => {
            // Presence goes to the private queues of connected users who
            // share a conversation with the subject, never to a topic.
            let peers = ConversationService::co_member_ids(&state.db, user_id).await?;
            for peer in peers {
                send_event_to_user(
                    &state.registry,
                    peer,
                    ChatEvent::PresenceUpdated { user_id, status },
                )
                .await;
            }
            Ok(None)
        }

        WsInboundEvent::MessageRead {
            conversation_id,
            up_to_message_id,
        } => {
            MessageService::mark_read(state, conversation_id, user_id, up_to_message_id).await?;
            Ok(None)
        }
    }
}
