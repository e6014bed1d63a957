use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use moji_lens::common::init_logger_exe;
use moji_lens::image2text::{handle_claude_ocr, RelayError, VisionClient, VisionConfig};
use moji_lens::messaging::OcrReply;
use moji_lens::store::LocalStore;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

/// Downscaled images stay far below this, originals up to 1024px may not.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    store: LocalStore,
    vision: VisionClient,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest {
    data_url: String,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/health", get(|| async { "healthy" }))
        .route("/ocr", post(ocr))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::InvalidDataUrl => StatusCode::BAD_REQUEST,
        RelayError::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Upstream { .. } | RelayError::Transport(_) | RelayError::Parse(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ocr(State(state): State<AppState>, Json(payload): Json<OcrRequest>) -> impl IntoResponse {
    log::info!("OCR request with {} bytes of image data", payload.data_url.len());
    match handle_claude_ocr(&state.store, &state.vision, &payload.data_url).await {
        Ok(text) => {
            log::info!("OCR returned {} chars", text.chars().count());
            (StatusCode::OK, Json(OcrReply::Text { text }))
        }
        Err(err) => {
            log::error!("OCR failed: {}", err);
            (status_for(&err), Json(OcrReply::Error { error: err.to_string() }))
        }
    }
}

fn open_store() -> anyhow::Result<LocalStore> {
    let dir = match std::env::var("MOJI_LENS_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => LocalStore::default_dir()?,
    };
    log::info!("Using data dir {}", dir.display());
    Ok(LocalStore::open_dir(&dir)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger_exe();

    log::info!("Starting server...");

    let mut vision = VisionConfig::new();
    if let Ok(url) = std::env::var("MOJI_LENS_VISION_URL") {
        vision = vision.with_url(url);
    }
    let state = AppState {
        store: open_store()?,
        vision: VisionClient::new(vision),
    };

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse()?));

    log::info!("Attempting to bind to port {}", port);

    let listener = TcpListener::bind(addr).await?;
    log::info!("Successfully bound to http://{}", addr);

    tokio::spawn(async {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            log::debug!("Server health check: OK");
        }
    });

    axum::serve(listener, app(state)).await?;
    Ok(())
}
