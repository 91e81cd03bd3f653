use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;

/// Gemini's OpenAI-compatible endpoint.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Candidate model ids, most capable/newest first. Providers rename and
/// retire models often enough that the invoker walks this list instead of
/// hard-wiring a single id.
pub const MODEL_CANDIDATES: &[&str] = &[
    "gemini-2.0-flash-exp",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
];

const MAX_REPLY_TOKENS: u32 = 1024;

/// One image handed to the model, in user-supplied order.
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// How a single model attempt failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider does not recognize the model id; the next candidate may.
    #[error("model not available: {0}")]
    ModelUnavailable(String),

    /// Bad or missing credential; identical for every candidate.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Rate or resource exhaustion; identical for every candidate.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Content blocked by provider policy.
    #[error("blocked by safety filters: {0}")]
    Safety(String),

    /// The call succeeded but produced no usable text.
    #[error("response was blocked or empty")]
    Empty,

    /// Anything unclassified; worth trying the next candidate.
    #[error("provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Fatal errors abort the whole invocation; every candidate would fail
    /// the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Auth(_)
                | ProviderError::Quota(_)
                | ProviderError::Safety(_)
                | ProviderError::Empty
        )
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Auth(m) => ApiError::ProviderAuth(m),
            ProviderError::Quota(m) => ApiError::ProviderQuota(m),
            ProviderError::Safety(m) => ApiError::ProviderSafety(m),
            ProviderError::Empty => {
                ApiError::ProviderSafety("response was blocked or empty".to_string())
            }
            ProviderError::ModelUnavailable(m) | ProviderError::Transient(m) => {
                ApiError::ProviderUnavailable(m)
            }
        }
    }
}

/// The one network seam. Mocked in tests; implemented by [`GeminiClient`] in
/// production.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        images: &[ImagePart],
    ) -> Result<String, ProviderError>;
}

pub struct GeminiClient {
    client: Client<OpenAIConfig>,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(GEMINI_API_BASE);
        GeminiClient {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        images: &[ImagePart],
    ) -> Result<String, ProviderError> {
        // Text part first, then images in attachment order; part order
        // affects reply quality and must match the user's upload order.
        let content = if images.is_empty() {
            ChatCompletionRequestUserMessageContent::Text(prompt.to_string())
        } else {
            let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> =
                Vec::with_capacity(images.len() + 1);
            parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
                    .build()
                    .map_err(|e| ProviderError::Transient(e.to_string()))?,
            ));
            for image in images {
                let data_url = format!(
                    "data:{};base64,{}",
                    image.mime_type,
                    BASE64.encode(&image.data)
                );
                parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(data_url)
                                .build()
                                .map_err(|e| ProviderError::Transient(e.to_string()))?,
                        )
                        .build()
                        .map_err(|e| ProviderError::Transient(e.to_string()))?,
                ));
            }
            ChatCompletionRequestUserMessageContent::Array(parts)
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .max_tokens(MAX_REPLY_TOKENS)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map_err(|e| ProviderError::Transient(e.to_string()))?
                .into()])
            .build()
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify_openai_error(&e))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(text)
    }
}

/// Map an `async-openai` failure onto the retry/abort taxonomy. Structured
/// error codes are consulted first; free-text matching is the fallback for
/// transport-level failures that carry no code.
fn classify_openai_error(err: &OpenAIError) -> ProviderError {
    if let OpenAIError::ApiError(api) = err {
        let code = api.code.as_ref().map(|c| c.to_string()).unwrap_or_default();
        let kind = api.r#type.as_deref().unwrap_or_default();

        if code.contains("invalid_api_key")
            || code.contains("invalid_authentication")
            || kind == "authentication_error"
        {
            return ProviderError::Auth(api.message.clone());
        }
        if code.contains("insufficient_quota")
            || code.contains("rate_limit_exceeded")
            || kind == "insufficient_quota"
        {
            return ProviderError::Quota(api.message.clone());
        }
        if kind == "content_filter" || code.contains("content_filter") {
            return ProviderError::Safety(api.message.clone());
        }
        if code.contains("model_not_found") {
            return ProviderError::ModelUnavailable(api.message.clone());
        }
        return classify_message(&api.message);
    }
    classify_message(&err.to_string())
}

fn classify_message(raw: &str) -> ProviderError {
    let message = raw.to_lowercase();
    if message.contains("api key") || message.contains("api_key") || message.contains("unauthorized")
    {
        ProviderError::Auth(raw.to_string())
    } else if message.contains("quota") || message.contains("resource") {
        ProviderError::Quota(raw.to_string())
    } else if message.contains("safety") || message.contains("block") {
        ProviderError::Safety(raw.to_string())
    } else if message.contains("not found") || message.contains("models/") {
        ProviderError::ModelUnavailable(raw.to_string())
    } else {
        ProviderError::Transient(raw.to_string())
    }
}

/// Walks the ranked candidate list, consuming one admission-gate slot per
/// invocation (not per candidate).
pub struct FallbackInvoker {
    model: Arc<dyn GenerativeModel>,
    limiter: Arc<RateLimiter>,
    candidates: Vec<String>,
}

impl FallbackInvoker {
    pub fn new(model: Arc<dyn GenerativeModel>, limiter: Arc<RateLimiter>) -> Self {
        Self::with_candidates(
            model,
            limiter,
            MODEL_CANDIDATES.iter().map(|m| m.to_string()).collect(),
        )
    }

    pub fn with_candidates(
        model: Arc<dyn GenerativeModel>,
        limiter: Arc<RateLimiter>,
        candidates: Vec<String>,
    ) -> Self {
        FallbackInvoker {
            model,
            limiter,
            candidates,
        }
    }

    pub async fn invoke(&self, prompt: &str, images: &[ImagePart]) -> Result<String, ApiError> {
        let waited = self.limiter.acquire().await;
        if waited > std::time::Duration::ZERO {
            info!(
                waited_secs = waited.as_secs_f64(),
                "admission gate delayed provider call"
            );
        }

        let mut last_error: Option<ProviderError> = None;
        for candidate in &self.candidates {
            match self.model.generate(candidate, prompt, images).await {
                Ok(text) => {
                    debug!(model = %candidate, "model call succeeded");
                    return Ok(text);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    warn!(model = %candidate, error = %err, "model attempt failed, trying next candidate");
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no model candidates configured".to_string());
        Err(ApiError::ProviderUnavailable(format!(
            "all Gemini models failed. Last error: {last}. \
             Check that your API key has access to Gemini models at https://aistudio.google.com/"
        )))
    }
}
