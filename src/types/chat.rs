use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{Attachment, Message};

/// A message with its attachments, as returned to the UI. Attachments keep
/// the original `images` field name the client already consumes.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(flatten)]
    pub message: Message,
    pub images: Vec<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub user_message: MessageResponse,
    pub assistant_message: MessageResponse,
    pub conversation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<MessageResponse>,
}

/// Listing row: conversation metadata plus how many messages it holds.
#[derive(Debug, FromRow, Serialize, Deserialize)]
pub struct ConversationListItem {
    pub id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}
