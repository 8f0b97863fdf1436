use messaging_service::{
    config, db, error, logging,
    middleware::rate_limit::RateLimiter,
    routes,
    services::{
        directory::InMemoryDirectory, identity::StaticTokenIdentity, media::InMemoryMediaStore,
        sequencer::ConversationSequencer,
    },
    state::AppState,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Run embedded migrations (idempotent). Schema drift is fatal.
    db::run_migrations(&db)
        .await
        .map_err(|e| error::AppError::StartServer(format!("database migrations failed: {e}")))?;

    // Standalone deployments resolve principals from a static token table
    // (AUTH_TOKENS="token:user-uuid,..."); production wires a real identity
    // provider here.
    let identity = match std::env::var("AUTH_TOKENS") {
        Ok(spec) => Arc::new(StaticTokenIdentity::from_spec(&spec)),
        Err(_) => {
            tracing::warn!("AUTH_TOKENS not set; no principal can authenticate");
            Arc::new(StaticTokenIdentity::new())
        }
    };

    let registry = ConnectionRegistry::new(cfg.ws_send_queue_capacity);
    let state = AppState {
        db,
        registry,
        config: cfg.clone(),
        sequencer: ConversationSequencer::new(),
        identity,
        directory: Arc::new(InMemoryDirectory::new()),
        media: Arc::new(InMemoryMediaStore::new()),
        rate_limiter: Arc::new(RateLimiter::new(cfg.rate_limit.clone())),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting messaging-service");

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
