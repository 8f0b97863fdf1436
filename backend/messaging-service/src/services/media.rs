use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub url: String,
}

/// Media store collaborator. The core keeps opaque media ids only; binary
/// content and metadata live elsewhere and are resolved at read time.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn resolve(&self, media_id: Uuid) -> Option<AttachmentInfo>;
}

/// In-memory media store for development and tests.
#[derive(Default)]
pub struct InMemoryMediaStore {
    entries: RwLock<HashMap<Uuid, AttachmentInfo>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, media_id: Uuid, info: AttachmentInfo) {
        self.entries.write().await.insert(media_id, info);
    }
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn resolve(&self, media_id: Uuid) -> Option<AttachmentInfo> {
        self.entries.read().await.get(&media_id).cloned()
    }
}
