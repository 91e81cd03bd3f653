use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::storage::StoredFile;

/// A stored image file owned by exactly one message. The backing file lives
/// under the upload directory at `file_path`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub message_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub async fn create(pool: &SqlitePool, message_id: Uuid, stored: &StoredFile) -> Result<Self> {
        let attachment = Attachment {
            id: Uuid::new_v4(),
            message_id,
            file_path: stored.file_path.clone(),
            file_name: stored.file_name.clone(),
            mime_type: stored.mime_type.clone(),
            file_size: stored.file_size,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO attachments (id, message_id, file_path, file_name, mime_type, file_size, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(attachment.id)
        .bind(attachment.message_id)
        .bind(&attachment.file_path)
        .bind(&attachment.file_name)
        .bind(&attachment.mime_type)
        .bind(attachment.file_size)
        .bind(attachment.created_at)
        .execute(pool)
        .await?;

        Ok(attachment)
    }

    /// Attachments across a whole conversation, message order first.
    pub async fn for_conversation(pool: &SqlitePool, conversation_id: Uuid) -> Result<Vec<Self>> {
        let attachments = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT a.id, a.message_id, a.file_path, a.file_name, a.mime_type, a.file_size, a.created_at
            FROM attachments a
            JOIN messages m ON m.id = a.message_id
            WHERE m.conversation_id = ?1
            ORDER BY m.created_at ASC, m.rowid ASC, a.created_at ASC, a.rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;

        Ok(attachments)
    }
}
