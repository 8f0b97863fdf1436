use crate::{
    config::Config,
    middleware::rate_limit::RateLimiter,
    services::{
        directory::UserDirectory, identity::IdentityProvider, media::MediaStore,
        sequencer::ConversationSequencer,
    },
    websocket::ConnectionRegistry,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub registry: ConnectionRegistry,
    pub config: Arc<Config>,
    pub sequencer: ConversationSequencer,
    pub identity: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn UserDirectory>,
    pub media: Arc<dyn MediaStore>,
    pub rate_limiter: Arc<RateLimiter>,
}
