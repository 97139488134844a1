mod edit;
mod error;
mod fence;
mod gemini;
mod imagen;
mod models;
mod postprocess;
mod routes;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use routes::{
    analyze_prompt, classify_edit, edit_image, get_image, product_background, resize_image,
    upload_image, upscale_image, AppState,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::gemini::GeminiClient;
use crate::imagen::ImagenClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is required")?;
    let project_id = std::env::var("PROJECT_ID").context("PROJECT_ID is required")?;
    let region = std::env::var("REGION").unwrap_or_else(|_| "us-central1".into());
    // Bearer token for the prediction endpoint, obtained externally.
    let access_token = std::env::var("ACCESS_TOKEN").context("ACCESS_TOKEN is required")?;

    let work_dir = std::env::var("WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("imagen_studio"));
    std::fs::create_dir_all(&work_dir)?;
    tracing::info!("Using work dir: {}", work_dir.display());

    let state = AppState {
        store: Arc::default(),
        gemini: Arc::new(GeminiClient::new(api_key)),
        imagen: Arc::new(ImagenClient::new(project_id, region, access_token)),
        work_dir: Arc::new(work_dir),
    };

    let app = Router::new()
        .route("/api/images", post(upload_image))
        .route("/api/images/:id", get(get_image))
        .route("/api/analyze", post(analyze_prompt))
        .route("/api/classify", post(classify_edit))
        .route("/api/edit", post(edit_image))
        .route("/api/product", post(product_background))
        .route("/api/upscale", post(upscale_image))
        .route("/api/resize", post(resize_image))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port: u16 = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
