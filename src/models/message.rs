use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")] // SQL value name
#[serde(rename_all = "lowercase")] // JSON value name
pub enum Role {
    User,
    Assistant,
}

/// One turn in a conversation. Rows are immutable once inserted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            role: Role::User,
            content: String::new(),
            created_at: Utc::now(),
        }
    }
}

impl Message {
    pub async fn create(
        pool: &SqlitePool,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Self> {
        let message = Message {
            conversation_id,
            role,
            content: content.to_string(),
            ..Default::default()
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(pool)
        .await?;

        Ok(message)
    }

    /// All messages of a conversation in creation order. The rowid tiebreak
    /// keeps insertion order even for rows created within the same instant.
    pub async fn for_conversation(pool: &SqlitePool, conversation_id: Uuid) -> Result<Vec<Self>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, role, content, created_at FROM messages
            WHERE conversation_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }
}
