use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Conversation {
            id: Uuid::new_v4(),
            title: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Conversation {
    pub async fn create(pool: &SqlitePool, title: Option<String>) -> Result<Self> {
        let conversation = Conversation {
            title,
            ..Default::default()
        };

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(pool)
        .await?;

        debug!("conversation created: {:?}", conversation);
        Ok(conversation)
    }

    pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, title, created_at, updated_at FROM conversations
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(conversation)
    }

    /// All conversations, most recently active first, annotated with how many
    /// messages each holds.
    pub async fn list(pool: &SqlitePool) -> Result<Vec<crate::types::ConversationListItem>> {
        let items = sqlx::query_as::<_, crate::types::ConversationListItem>(
            r#"
            SELECT c.id, c.title, c.created_at, c.updated_at, COUNT(m.id) AS message_count
            FROM conversations c
            LEFT JOIN messages m ON m.conversation_id = c.id
            GROUP BY c.id
            ORDER BY c.updated_at DESC
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(items)
    }

    /// Bump `updated_at`; called whenever a message is appended.
    pub async fn touch(pool: &SqlitePool, id: Uuid) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE conversations
            SET updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(now)
    }
}
