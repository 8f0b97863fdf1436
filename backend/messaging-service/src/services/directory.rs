use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// User directory collaborator. Only display-name lookup is consumed here,
/// to attach a human-readable sender name to outbound payloads.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: Uuid) -> String;
}

/// In-memory directory for development and tests. Unknown users get a
/// stable placeholder derived from their id.
#[derive(Default)]
pub struct InMemoryDirectory {
    names: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: Uuid, name: impl Into<String>) {
        self.names.write().await.insert(user_id, name.into());
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn display_name(&self, user_id: Uuid) -> String {
        if let Some(name) = self.names.read().await.get(&user_id) {
            return name.clone();
        }
        format!("u_{}", &user_id.to_string()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_placeholder_name() {
        let directory = InMemoryDirectory::new();
        let user = Uuid::new_v4();
        let name = directory.display_name(user).await;
        assert!(name.starts_with("u_"));

        directory.insert(user, "alice").await;
        assert_eq!(directory.display_name(user).await, "alice");
    }
}
