use std::sync::Arc;

use actix_multipart::form::tempfile::TempFile;
use actix_multipart::form::text::Text;
use actix_multipart::form::MultipartForm;
use actix_web::{delete, get, post, web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::UploadedFile;
use crate::types::{ChatResponse, ConversationListItem, ConversationResponse};
use crate::AppState;

/// Multipart body for `POST /api/chat/message`: one text field, an optional
/// conversation id, and any number of repeated `images` file fields.
#[derive(MultipartForm)]
pub struct SendMessageForm {
    pub message: Text<String>,
    pub conversation_id: Option<Text<Uuid>>,
    pub images: Vec<TempFile>,
}

#[post("/message")]
pub async fn send_message(
    app_state: web::Data<Arc<AppState>>,
    MultipartForm(form): MultipartForm<SendMessageForm>,
) -> Result<web::Json<ChatResponse>, ApiError> {
    let conversation_id = form.conversation_id.map(|id| id.0);

    let mut uploads = Vec::with_capacity(form.images.len());
    for file in form.images {
        let data = tokio::fs::read(file.file.path())
            .await
            .map_err(|e| ApiError::Storage(format!("reading upload: {e}")))?;
        uploads.push(UploadedFile {
            file_name: file.file_name.unwrap_or_else(|| "upload".to_string()),
            mime_type: file
                .content_type
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            data,
        });
    }

    let response = app_state
        .chat
        .send_message(&form.message.0, conversation_id, uploads)
        .await?;
    Ok(web::Json(response))
}

#[get("/conversations")]
pub async fn list_conversations(
    app_state: web::Data<Arc<AppState>>,
) -> Result<web::Json<Vec<ConversationListItem>>, ApiError> {
    let conversations = app_state.chat.list_conversations().await?;
    Ok(web::Json(conversations))
}

#[get("/conversations/{conversation_id}")]
pub async fn get_conversation(
    app_state: web::Data<Arc<AppState>>,
    conversation_id: web::Path<Uuid>,
) -> Result<web::Json<ConversationResponse>, ApiError> {
    let conversation = app_state
        .chat
        .get_conversation(conversation_id.into_inner())
        .await?;
    Ok(web::Json(conversation))
}

#[delete("/conversations/{conversation_id}")]
pub async fn delete_conversation(
    app_state: web::Data<Arc<AppState>>,
    conversation_id: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    app_state
        .chat
        .delete_conversation(conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Conversation deleted"
    })))
}

#[post("/conversations")]
pub async fn create_conversation(
    app_state: web::Data<Arc<AppState>>,
) -> Result<web::Json<ConversationResponse>, ApiError> {
    let conversation = app_state.chat.create_conversation().await?;
    Ok(web::Json(conversation))
}
