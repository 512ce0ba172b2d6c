use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};

use crate::config::Config;
use crate::error::ApiError;
use crate::orchestrator::FanOut;
use crate::prompt::PromptCompositor;
use crate::rate_limit::{ClientLimiter, rate_limit};
use crate::storage::{HistoryRecord, HistoryStore};
use crate::types::{EditRequest, GenerationRequest, ImagesResponse};

pub const HISTORY_PAGE_SIZE: usize = 50;
const CORS_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub fan_out: Arc<FanOut>,
    pub compositor: PromptCompositor,
    pub histories: Arc<dyn HistoryStore>,
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
pub struct HistoriesResponse {
    pub histories: Vec<HistoryRecord>,
}

pub async fn text_to_image(
    State(state): State<AppState>,
    Query(request): Query<GenerationRequest>,
) -> Json<ImagesResponse> {
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();
    let prompt = state.compositor.compose(&request, &cancel).await;
    tracing::info!(%prompt, product = %request.product, "generating images");
    Json(state.fan_out.generate(request, prompt).await)
}

pub async fn edit_image(State(state): State<AppState>, Json(request): Json<EditRequest>) -> Json<ImagesResponse> {
    tracing::info!(prompt = %request.prompt, style = %request.style, "editing image");
    Json(state.fan_out.edit(request).await)
}

pub async fn histories(State(state): State<AppState>) -> Result<Json<HistoriesResponse>, ApiError> {
    let histories = state.histories.recent(HISTORY_PAGE_SIZE).await?;
    Ok(Json(HistoriesResponse { histories }))
}

pub async fn health() -> &'static str {
    "ok"
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = origins.iter().filter_map(|origin| origin.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}

pub fn router(state: AppState, config: &Config, limiter: ClientLimiter) -> Router {
    let mut app = Router::new()
        .route("/text-to-image", get(text_to_image))
        .route(
            "/edit-image",
            post(edit_image).layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .route("/histories", get(histories))
        .route("/health", get(health))
        .nest_service("/img", ServeDir::new(&config.generated_dir))
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit))
        .layer(CompressionLayer::new());

    if !config.release {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.layer(cors_layer(&config.cors_origins))
}
