use std::sync::Arc;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{get, web, App, HttpServer};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod chat;
mod config;
mod db;
mod error;
mod gemini;
mod image_ops;
mod models;
mod rate_limit;
mod routes;
mod storage;
mod types;

use chat::ChatService;
use config::AppConfig;
use gemini::{FallbackInvoker, GeminiClient};
use rate_limit::RateLimiter;
use storage::FileStorage;

pub struct AppState {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub limiter: Arc<RateLimiter>,
    pub chat: ChatService,
}

#[get("/")]
async fn index() -> web::Json<serde_json::Value> {
    web::Json(json!({
        "message": "Multimodal Chat API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[get("/api/health")]
async fn health(app_state: web::Data<Arc<AppState>>) -> web::Json<serde_json::Value> {
    let api_key = if app_state.config.gemini_api_key.is_empty() {
        "not_configured"
    } else {
        "configured"
    };
    let upload_dir = match tokio::fs::metadata(&app_state.config.upload_dir).await {
        Ok(meta) if meta.is_dir() => "reachable",
        _ => "unreachable",
    };
    let database = match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&app_state.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "error",
    };

    web::Json(json!({
        "status": "ok",
        "gemini_api_key": api_key,
        "database": database,
        "upload_dir": upload_dir,
        "requests_remaining": app_state.limiter.remaining(),
    }))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();

    let pool = db::connect(&config).await?;
    db::run_migrations(&pool).await?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let limiter = Arc::new(RateLimiter::new(config.requests_per_minute));
    let invoker = FallbackInvoker::new(
        Arc::new(GeminiClient::new(&config.gemini_api_key)),
        limiter.clone(),
    );
    let chat = ChatService::new(pool.clone(), FileStorage::new(&config), invoker);

    let app_state = Arc::new(AppState {
        config: config.clone(),
        pool,
        limiter,
        chat,
    });

    info!(addr = %config.bind_addr, "starting server");
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&app_state.config.cors_origin)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .service(index)
            .service(health)
            .service(
                web::scope("/api/chat")
                    .service(routes::chat::send_message)
                    .service(routes::chat::list_conversations)
                    .service(routes::chat::get_conversation)
                    .service(routes::chat::delete_conversation)
                    .service(routes::chat::create_conversation),
            )
            .service(Files::new("/uploads", app_state.config.upload_dir.clone()))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
