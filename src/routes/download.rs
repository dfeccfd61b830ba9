use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::media::ExtractRequest;
use crate::routes::AppState;
use crate::routes::url_validation::validate_http_url;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub file_url: String,
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Json<DownloadResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| {
        AppError::bad_request(format!("Invalid query: {}", rejection.body_text()))
    })?;
    let url = validate_http_url(query.url.as_deref().unwrap_or_default())?;
    state.storage.ensure_dir().await?;

    let id = Uuid::new_v4().to_string();
    info!(id = %id, url = %url, "download request");
    let request = ExtractRequest::audio(url.as_str(), state.storage.base_dir(), &id);
    let media = state.extractor.extract(request).await?;

    let file_url = state.storage.public_url(&format!("{id}.{}", media.ext));
    Ok(Json(DownloadResponse { file_url }))
}
