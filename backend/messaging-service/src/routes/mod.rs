use crate::state::AppState;
use axum::middleware;
use axum::{
    routing::{delete, get, post, put},
    Router,
};

pub mod conversations;
use conversations::{
    archive_conversation, create_conversation, get_conversation, get_unread_count,
    list_conversations, mark_as_read, set_muted,
};
pub mod members;
use members::{add_members, list_members, remove_member};
pub mod messages;
use messages::{delete_message, get_message_history, send_message, update_message};
pub mod wsroute;
use wsroute::ws_handler;

pub fn build_router(state: AppState) -> Router {
    // Service introspection endpoints (no API version prefix, no auth)
    let introspection = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::metrics_handler));

    // API v1 endpoints (all business logic routes with /api/v1 prefix)
    let api_v1 = Router::new()
        // Conversations
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id/archive", post(archive_conversation))
        .route("/conversations/:id/mute", put(set_muted))
        .route("/conversations/:id/read", post(mark_as_read))
        .route("/conversations/:id/unread", get(get_unread_count))
        // Membership
        .route(
            "/conversations/:id/members",
            post(add_members).get(list_members),
        )
        .route("/conversations/:id/members/:user_id", delete(remove_member))
        // Messages
        .route(
            "/conversations/:id/messages",
            post(send_message).get(get_message_history),
        )
        .route("/messages/:id", put(update_message).delete(delete_message))
        // Transport-boundary layers. Auth is outermost so the limiter keys
        // on the resolved principal.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ))
        // WebSocket endpoint resolves its own principal (query token or
        // header) during the upgrade, so it sits outside the auth layer.
        .route("/ws", get(ws_handler));

    let router = introspection.merge(Router::new().nest("/api/v1", api_v1));

    let router = crate::middleware::with_defaults(router)
        .layer(middleware::from_fn(crate::metrics::track_http_metrics));

    router.with_state(state)
}
