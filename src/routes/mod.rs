pub mod download;
pub mod files;
pub mod stitch;
pub mod url_validation;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::media::{MediaExtractor, YtDlpExtractor};
use crate::stitching::{self, StitchEngine};
use crate::storage::LocalFileStorage;

pub use download::{DownloadQuery, DownloadResponse};
pub use stitch::PANORAMA_URL_HEADER;

/// Everything a handler needs, built once at startup.
pub struct AppState {
    pub config: Config,
    pub storage: LocalFileStorage,
    pub engine: Arc<dyn StitchEngine>,
    pub extractor: Arc<dyn MediaExtractor>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_bin.clone()));
        Self::with_backends(config, stitching::default_engine(), extractor)
    }

    pub fn with_backends(
        config: Config,
        engine: Arc<dyn StitchEngine>,
        extractor: Arc<dyn MediaExtractor>,
    ) -> Self {
        let storage = LocalFileStorage::new(config.output_dir.clone(), config.files_base_url.clone());
        Self {
            config,
            storage,
            engine,
            extractor,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let router = Router::new()
        .route(
            "/stitchPanorama",
            post(stitch::stitch_panorama)
                .layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route("/download", get(download::download))
        .route("/files/{*path}", get(files::serve_file))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Cross-origin access is granted only to the configured origins.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .expose_headers([HeaderName::from_static(PANORAMA_URL_HEADER)]),
    )
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "stitcher": state.engine.name(),
    }))
}
