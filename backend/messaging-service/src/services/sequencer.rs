use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-conversation send gate.
///
/// Holding the guard serializes message commits for one conversation, and
/// `stamp()` hands out a `created_at` that is strictly greater than the
/// previous one for that conversation, so commit order and timestamp order
/// never diverge. Sends to different conversations proceed in parallel.
#[derive(Default, Clone)]
pub struct ConversationSequencer {
    slots: Arc<Mutex<HashMap<Uuid, Arc<Mutex<SendSlot>>>>>,
}

#[derive(Default)]
pub struct SendSlot {
    last_assigned: Option<DateTime<Utc>>,
}

impl SendSlot {
    pub fn stamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_assigned {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_assigned = Some(now);
        now
    }
}

impl ConversationSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: Uuid) -> OwnedMutexGuard<SendSlot> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(conversation_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}
