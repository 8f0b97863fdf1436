use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// External identity provider. The core never authenticates credentials
/// itself; it consumes a principal that the provider has already resolved.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<Uuid>;
}

/// Token-table provider for development and tests.
#[derive(Default)]
pub struct StaticTokenIdentity {
    tokens: RwLock<HashMap<String, Uuid>>,
}

impl StaticTokenIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses "token-a:uuid-a,token-b:uuid-b" (the AUTH_TOKENS env format).
    pub fn from_spec(spec: &str) -> Self {
        let mut tokens = HashMap::new();
        for pair in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((token, id)) = pair.split_once(':') {
                if let Ok(user_id) = Uuid::parse_str(id.trim()) {
                    tokens.insert(token.trim().to_string(), user_id);
                }
            }
        }
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub async fn insert(&self, token: impl Into<String>, user_id: Uuid) {
        self.tokens.write().await.insert(token.into(), user_id);
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn resolve(&self, token: &str) -> Option<Uuid> {
        self.tokens.read().await.get(token).copied()
    }
}
