#![allow(dead_code)]

use futures_util::StreamExt;
use messaging_service::{
    config::{Config, RateLimitConfig},
    db,
    middleware::rate_limit::RateLimiter,
    routes,
    services::{
        directory::InMemoryDirectory,
        identity::StaticTokenIdentity,
        media::{AttachmentInfo, InMemoryMediaStore},
        sequencer::ConversationSequencer,
    },
    state::AppState,
    websocket::ConnectionRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestApp {
    pub base_url: String,
    pub ws_url: String,
    pub state: AppState,
    pub identity: Arc<StaticTokenIdentity>,
    pub directory: Arc<InMemoryDirectory>,
    pub media: Arc<InMemoryMediaStore>,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    let mut config = Config::test_defaults();
    // Generous window so ordinary test traffic never trips the limiter;
    // the rate-limit suite spawns its own app with a tight budget.
    config.rate_limit = RateLimitConfig {
        messages_per_window: 10_000,
        requests_per_window: 10_000,
        window_secs: 60,
    };
    spawn_app_with(config).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let pool = db::init_pool(&config.database_url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let identity = Arc::new(StaticTokenIdentity::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let media = Arc::new(InMemoryMediaStore::new());
    let config = Arc::new(config);

    let state = AppState {
        db: pool,
        registry: ConnectionRegistry::new(config.ws_send_queue_capacity),
        config: config.clone(),
        sequencer: ConversationSequencer::new(),
        identity: identity.clone(),
        directory: directory.clone(),
        media: media.clone(),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
    };

    let app = routes::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    TestApp {
        base_url: format!("http://{}:{}/api/v1", addr.ip(), addr.port()),
        ws_url: format!("ws://{}:{}/api/v1/ws", addr.ip(), addr.port()),
        state,
        identity,
        directory,
        media,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    /// Register a principal with the identity provider and the directory.
    /// Returns (user_id, bearer token).
    pub async fn register_user(&self, name: &str) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let token = format!("tok-{name}-{}", &user_id.to_string()[..8]);
        self.identity.insert(token.clone(), user_id).await;
        self.directory.insert(user_id, name).await;
        (user_id, token)
    }

    pub async fn register_media(&self, filename: &str) -> Uuid {
        let media_id = Uuid::new_v4();
        self.media
            .insert(
                media_id,
                AttachmentInfo {
                    filename: filename.to_string(),
                    content_type: "image/png".to_string(),
                    size: 4096,
                    url: format!("https://media.test/{media_id}"),
                },
            )
            .await;
        media_id
    }

    pub async fn create_direct(&self, token: &str, other: Uuid) -> serde_json::Value {
        let resp = self
            .client
            .post(format!("{}/conversations", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "kind": "direct",
                "member_ids": [other],
            }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "create_direct: {}", resp.status());
        resp.json().await.unwrap()
    }

    pub async fn create_group(
        &self,
        token: &str,
        title: &str,
        members: &[Uuid],
    ) -> serde_json::Value {
        let resp = self
            .client
            .post(format!("{}/conversations", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "kind": "group",
                "title": title,
                "member_ids": members,
            }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "create_group: {}", resp.status());
        resp.json().await.unwrap()
    }

    pub async fn send_text(
        &self,
        token: &str,
        conversation_id: Uuid,
        body: &str,
    ) -> serde_json::Value {
        let resp = self
            .client
            .post(format!(
                "{}/conversations/{conversation_id}/messages",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "send_text: {}", resp.status());
        resp.json().await.unwrap()
    }

    pub async fn unread_count(&self, token: &str, conversation_id: Uuid) -> i64 {
        let resp = self
            .client
            .get(format!(
                "{}/conversations/{conversation_id}/unread",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "unread: {}", resp.status());
        let value: serde_json::Value = resp.json().await.unwrap();
        value["unread_count"].as_i64().unwrap()
    }

    pub async fn mark_read(&self, token: &str, conversation_id: Uuid, up_to: Uuid) {
        let resp = self
            .client
            .post(format!(
                "{}/conversations/{conversation_id}/read",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&serde_json::json!({ "up_to_message_id": up_to }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "mark_read: {}", resp.status());
    }

    pub async fn connect_ws(&self, token: &str) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(format!("{}?token={token}", self.ws_url))
            .await
            .expect("ws connect");
        ws
    }
}

pub fn conversation_id(value: &serde_json::Value) -> Uuid {
    Uuid::parse_str(value["id"].as_str().unwrap()).unwrap()
}

pub fn message_id(value: &serde_json::Value) -> Uuid {
    Uuid::parse_str(value["id"].as_str().unwrap()).unwrap()
}

/// Next text frame as JSON, with a timeout so a missing event fails the
/// test instead of hanging it.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for ws frame")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Subscribe and wait for the ack.
pub async fn subscribe(ws: &mut WsClient, conversation: Uuid) {
    use futures_util::SinkExt;
    ws.send(WsMessage::Text(
        serde_json::json!({
            "type": "chat.subscribe",
            "conversation_id": conversation,
        })
        .to_string(),
    ))
    .await
    .unwrap();
    let ack = next_json(ws).await;
    assert_eq!(ack["type"], "chat.subscribed", "subscribe failed: {ack}");
}
