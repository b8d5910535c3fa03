use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::conversation::models::{ChatMessage, Role};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationMessageRow {
    pub id: Uuid,
    pub user_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessageRow {
    /// Rows with a role outside the known set are skipped by callers.
    pub fn into_message(self) -> Option<ChatMessage> {
        Some(ChatMessage {
            role: Role::parse(&self.role)?,
            content: self.content,
            timestamp: Some(self.created_at),
        })
    }
}
