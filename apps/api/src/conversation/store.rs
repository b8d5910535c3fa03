//! Conversation persistence collaborator.
//!
//! The request path needs a bounded newest-first history fetch, an append,
//! a best-effort guest user row, and the user lookups behind the auth routes.
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT, email TEXT UNIQUE,
//!                     created_at TIMESTAMPTZ NOT NULL DEFAULT now());
//! CREATE TABLE conversation_messages (
//!     id UUID PRIMARY KEY, user_id TEXT NOT NULL,
//!     role TEXT NOT NULL, content TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now());
//! CREATE INDEX conversation_messages_user_recent
//!     ON conversation_messages (user_id, created_at DESC);
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::conversation::models::ChatMessage;
use crate::models::message::ConversationMessageRow;
use crate::models::user::UserProfile;
use crate::session::new_guest_id;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No database configured; persistence is switched off.
    #[error("storage disabled")]
    Disabled,

    /// Connection, pool or I/O trouble. Callers degrade around it.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage call timed out")]
    Timeout,

    /// The database rejected a statement. This is a bug, not an outage.
    #[error("query failed: {0}")]
    Query(sqlx::Error),
}

impl StoreError {
    /// Whether the flow should continue without storage rather than fail.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, StoreError::Query(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
            other => StoreError::Query(other),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Makes sure a user row exists for the identity.
    async fn ensure_user(&self, user_id: &str) -> Result<(), StoreError>;

    /// Up to `limit` prior messages, newest first.
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn append_message(&self, user_id: &str, message: &ChatMessage)
        -> Result<(), StoreError>;

    /// Upserts by email when one is given, otherwise creates a fresh guest row.
    async fn upsert_user(
        &self,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<UserProfile, StoreError>;

    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Short name for logs and the health endpoint.
    fn backend(&self) -> &'static str;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn ensure_user(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, name) VALUES ($1, 'Guest') ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<ConversationMessageRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, role, content, created_at
            FROM conversation_messages
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(ConversationMessageRow::into_message)
            .collect())
    }

    async fn append_message(
        &self,
        user_id: &str,
        message: &ChatMessage,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversation_messages (id, user_id, role, content) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_user(
        &self,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Result<UserProfile, StoreError> {
        let user = match email {
            Some(email) => {
                sqlx::query_as::<_, UserProfile>(
                    r#"
                    INSERT INTO users (id, email, name)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (email) DO UPDATE SET name = EXCLUDED.name
                    RETURNING id, email, name
                    "#,
                )
                .bind(format!("user_{}", Uuid::new_v4()))
                .bind(email)
                .bind(name)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, UserProfile>(
                    "INSERT INTO users (id, name) VALUES ($1, $2) RETURNING id, email, name",
                )
                .bind(new_guest_id())
                .bind(name)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(user)
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let user = sqlx::query_as::<_, UserProfile>(
            "SELECT id, email, name FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Used when `DATABASE_URL` is not set: every call reports `Disabled`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMessageStore;

#[async_trait]
impl MessageStore for DisabledMessageStore {
    async fn ensure_user(&self, _user_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Disabled)
    }

    async fn recent_messages(
        &self,
        _user_id: &str,
        _limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Err(StoreError::Disabled)
    }

    async fn append_message(
        &self,
        _user_id: &str,
        _message: &ChatMessage,
    ) -> Result<(), StoreError> {
        Err(StoreError::Disabled)
    }

    async fn upsert_user(
        &self,
        _email: Option<&str>,
        _name: Option<&str>,
    ) -> Result<UserProfile, StoreError> {
        Err(StoreError::Disabled)
    }

    async fn find_user(&self, _user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Err(StoreError::Disabled)
    }

    fn backend(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
pub use self::memory::InMemoryMessageStore;
