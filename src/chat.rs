use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gemini::{FallbackInvoker, ImagePart};
use crate::models::{Attachment, Conversation, Message, Role};
use crate::storage::{self, FileStorage, UploadedFile};
use crate::types::{ChatResponse, ConversationListItem, ConversationResponse, MessageResponse};

const MAX_TITLE_CHARS: usize = 50;

/// Ties conversation persistence, attachment storage, and the fallback
/// invoker into the one user-facing send operation, and owns the remaining
/// conversation CRUD.
pub struct ChatService {
    pool: SqlitePool,
    storage: FileStorage,
    invoker: FallbackInvoker,
}

impl ChatService {
    pub fn new(pool: SqlitePool, storage: FileStorage, invoker: FallbackInvoker) -> Self {
        ChatService {
            pool,
            storage,
            invoker,
        }
    }

    /// Handle one inbound user message end to end.
    ///
    /// The user message and its attachments are committed before the provider
    /// is called, so a failed model call never loses the user's input: the
    /// conversation is left valid with only the reply missing, and re-sending
    /// appends a fresh user message.
    pub async fn send_message(
        &self,
        text: &str,
        conversation_id: Option<Uuid>,
        uploads: Vec<UploadedFile>,
    ) -> Result<ChatResponse, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::Validation(
                "message text must not be empty".to_string(),
            ));
        }

        let conversation = match conversation_id {
            Some(id) => Conversation::get(&self.pool, id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?,
            None => Conversation::create(&self.pool, Some(derive_title(text))).await?,
        };

        let user_message = Message::create(&self.pool, conversation.id, Role::User, text).await?;

        let stored = self.storage.store_many(uploads).await?;
        let mut attachments = Vec::with_capacity(stored.len());
        let mut image_parts = Vec::with_capacity(stored.len());
        for file in &stored {
            attachments.push(Attachment::create(&self.pool, user_message.id, file).await?);
            // Send the stored (possibly downsized) bytes, in upload order.
            let data = tokio::fs::read(&file.file_path)
                .await
                .map_err(|e| ApiError::Storage(format!("reading {}: {e}", file.file_path)))?;
            image_parts.push(ImagePart {
                mime_type: file.mime_type.clone(),
                data,
            });
        }

        let reply = self.invoker.invoke(text, &image_parts).await?;

        let assistant_message =
            Message::create(&self.pool, conversation.id, Role::Assistant, &reply).await?;
        Conversation::touch(&self.pool, conversation.id).await?;

        Ok(ChatResponse {
            user_message: MessageResponse {
                message: user_message,
                images: attachments,
            },
            assistant_message: MessageResponse {
                message: assistant_message,
                images: Vec::new(),
            },
            conversation_id: conversation.id,
        })
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationListItem>, ApiError> {
        Ok(Conversation::list(&self.pool).await?)
    }

    pub async fn get_conversation(&self, id: Uuid) -> Result<ConversationResponse, ApiError> {
        let conversation = Conversation::get(&self.pool, id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

        let (messages, attachments) = futures::try_join!(
            Message::for_conversation(&self.pool, id),
            Attachment::for_conversation(&self.pool, id),
        )?;
        let mut by_message: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
        for attachment in attachments {
            by_message
                .entry(attachment.message_id)
                .or_default()
                .push(attachment);
        }

        let messages = messages
            .into_iter()
            .map(|message| {
                let images = by_message.remove(&message.id).unwrap_or_default();
                MessageResponse { message, images }
            })
            .collect();

        Ok(ConversationResponse {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            messages,
        })
    }

    pub async fn create_conversation(&self) -> Result<ConversationResponse, ApiError> {
        let conversation =
            Conversation::create(&self.pool, Some("New Conversation".to_string())).await?;
        Ok(ConversationResponse {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            messages: Vec::new(),
        })
    }

    /// Delete a conversation, its messages and attachments, and the backing
    /// files. Files go first, best-effort (a missing file is fine); rows are
    /// removed child-to-parent inside one transaction.
    pub async fn delete_conversation(&self, id: Uuid) -> Result<(), ApiError> {
        Conversation::get(&self.pool, id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

        let attachments = Attachment::for_conversation(&self.pool, id).await?;
        for attachment in &attachments {
            storage::delete_file(&attachment.file_path).await;
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM attachments WHERE message_id IN \
             (SELECT id FROM messages WHERE conversation_id = ?1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(conversation_id = %id, attachments = attachments.len(), "conversation deleted");
        Ok(())
    }
}

/// First-message conversation title: the text, cut at 50 characters with an
/// ellipsis marker when longer.
fn derive_title(text: &str) -> String {
    if text.chars().count() > MAX_TITLE_CHARS {
        let truncated: String = text.chars().take(MAX_TITLE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::config::AppConfig;
    use crate::db;
    use crate::gemini::{GenerativeModel, ProviderError};
    use crate::rate_limit::RateLimiter;

    struct StubModel {
        reply: String,
        image_counts: Mutex<Vec<usize>>,
    }

    impl StubModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(StubModel {
                reply: reply.to_string(),
                image_counts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerativeModel for StubModel {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            images: &[ImagePart],
        ) -> Result<String, ProviderError> {
            self.image_counts.lock().unwrap().push(images.len());
            Ok(self.reply.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl GenerativeModel for FailingModel {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _images: &[ImagePart],
        ) -> Result<String, ProviderError> {
            Err(ProviderError::Transient("provider is down".into()))
        }
    }

    fn test_config(dir: &Path) -> AppConfig {
        AppConfig {
            gemini_api_key: String::new(),
            database_url: format!("sqlite://{}/chat.db", dir.display()),
            upload_dir: dir.join("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_image_dimension: 2048,
            requests_per_minute: 100,
            bind_addr: "127.0.0.1:0".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
        }
    }

    async fn test_service(dir: &Path, model: Arc<dyn GenerativeModel>) -> ChatService {
        let config = test_config(dir);
        let pool = db::connect(&config).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let invoker = FallbackInvoker::with_candidates(
            model,
            Arc::new(RateLimiter::new(100)),
            vec!["stub-model".to_string()],
        );
        ChatService::new(pool, FileStorage::new(&config), invoker)
    }

    fn png_upload(name: &str) -> UploadedFile {
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(16, 16)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        UploadedFile {
            file_name: name.to_string(),
            mime_type: "image/png".to_string(),
            data: buf.into_inner(),
        }
    }

    #[test]
    fn title_is_truncated_at_fifty_chars() {
        assert_eq!(derive_title("hi"), "hi");
        let long = "x".repeat(60);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[tokio::test]
    async fn first_message_creates_conversation_with_reply() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("hello")).await;

        let response = service.send_message("hi", None, Vec::new()).await.unwrap();

        assert_eq!(response.user_message.message.content, "hi");
        assert_eq!(response.user_message.message.role, Role::User);
        assert_eq!(response.assistant_message.message.content, "hello");
        assert_eq!(response.assistant_message.message.role, Role::Assistant);

        let conversation = service
            .get_conversation(response.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.title.as_deref(), Some("hi"));
        assert_eq!(conversation.messages.len(), 2);
        assert!(conversation.updated_at > conversation.created_at);

        let listed = service.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count, 2);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("hello")).await;

        let err = service.send_message("   ", None, Vec::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(service.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_conversation_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("hello")).await;

        let err = service
            .send_message("hi", Some(Uuid::new_v4()), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn messages_append_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("hello")).await;

        let first = service.send_message("one", None, Vec::new()).await.unwrap();
        service
            .send_message("two", Some(first.conversation_id), Vec::new())
            .await
            .unwrap();

        let conversation = service
            .get_conversation(first.conversation_id)
            .await
            .unwrap();
        let contents: Vec<&str> = conversation
            .messages
            .iter()
            .map(|m| m.message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["one", "hello", "two", "hello"]);
    }

    #[tokio::test]
    async fn provider_failure_keeps_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), Arc::new(FailingModel)).await;

        let err = service.send_message("hi", None, Vec::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::ProviderUnavailable(_)));

        // The user's input survived; the conversation is resumable.
        let listed = service.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        let conversation = service.get_conversation(listed[0].id).await.unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].message.role, Role::User);
    }

    #[tokio::test]
    async fn attachments_are_stored_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let model = StubModel::new("nice picture");
        let service = test_service(dir.path(), model.clone()).await;

        let response = service
            .send_message("look", None, vec![png_upload("cat.png"), png_upload("dog.png")])
            .await
            .unwrap();

        assert_eq!(response.user_message.images.len(), 2);
        assert_eq!(response.user_message.images[0].file_name, "cat.png");
        assert_eq!(response.user_message.images[1].file_name, "dog.png");
        // Both image parts reached the model on the one call.
        assert_eq!(model.image_counts.lock().unwrap().as_slice(), &[2]);

        let conversation = service
            .get_conversation(response.conversation_id)
            .await
            .unwrap();
        assert_eq!(conversation.messages[0].images.len(), 2);
        assert!(conversation.messages[1].images.is_empty());
        for attachment in &conversation.messages[0].images {
            assert!(Path::new(&attachment.file_path).exists());
        }
    }

    #[tokio::test]
    async fn delete_removes_rows_and_backing_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("ok")).await;

        let response = service
            .send_message("look", None, vec![png_upload("a.png"), png_upload("b.png")])
            .await
            .unwrap();
        let paths: Vec<String> = response
            .user_message
            .images
            .iter()
            .map(|a| a.file_path.clone())
            .collect();

        // One backing file already gone; deletion must still succeed.
        std::fs::remove_file(&paths[0]).unwrap();

        service
            .delete_conversation(response.conversation_id)
            .await
            .unwrap();

        let err = service
            .get_conversation(response.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        for path in &paths {
            assert!(!Path::new(path).exists());
        }

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
            .fetch_one(&service.pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn listing_orders_by_most_recent_activity() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("ok")).await;

        let first = service.send_message("first", None, Vec::new()).await.unwrap();
        let second = service.send_message("second", None, Vec::new()).await.unwrap();

        let listed = service.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, second.conversation_id);
        assert_eq!(listed[1].id, first.conversation_id);

        // Activity on the older conversation moves it back to the top.
        service
            .send_message("again", Some(first.conversation_id), Vec::new())
            .await
            .unwrap();
        let listed = service.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, first.conversation_id);
        assert_eq!(listed[0].message_count, 4);
    }

    #[tokio::test]
    async fn create_conversation_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path(), StubModel::new("ok")).await;

        let created = service.create_conversation().await.unwrap();
        assert_eq!(created.title.as_deref(), Some("New Conversation"));
        assert!(created.messages.is_empty());

        let fetched = service.get_conversation(created.id).await.unwrap();
        assert!(fetched.messages.is_empty());
    }
}
