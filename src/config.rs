use std::env;
use std::path::PathBuf;

use tracing::warn;

/// MIME types accepted for uploaded attachments.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub requests_per_minute: usize,
    pub bind_addr: String,
    pub cors_origin: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.is_empty() {
            warn!(
                "GEMINI_API_KEY not set; provider calls will fail until one is configured \
                 (get a key at https://aistudio.google.com/)"
            );
        }

        AppConfig {
            gemini_api_key,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://chat_history.db".to_string()),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            max_upload_bytes: env_parse("MAX_IMAGE_SIZE", 10 * 1024 * 1024),
            max_image_dimension: env_parse("MAX_IMAGE_DIMENSION", 2048),
            requests_per_minute: env_parse("REQUESTS_PER_MINUTE", 15),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
