use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::AppError;
use crate::routes::AppState;

fn attachment_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() && *c != '"' && *c != '\\') || *c == ' ')
        .collect();
    let safe = if safe.is_empty() { "download".to_string() } else { safe };
    format!("attachment; filename=\"{safe}\"")
}

pub async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let target = state.storage.resolve_checked(&path).await?;
    let metadata = fs::metadata(&target)
        .await
        .with_context(|| format!("read metadata of '{path}'"))?;
    if !metadata.is_file() {
        return Err(anyhow!("'{path}' is not a file").into());
    }
    let file = File::open(&target)
        .await
        .with_context(|| format!("open '{path}'"))?;

    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download");
    let mime = mime_guess::from_path(&target).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str()).map_err(|err| anyhow!(err))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&attachment_disposition(file_name)).map_err(|err| anyhow!(err))?,
    );
    info!(path = %path, size = metadata.len(), "serving file");

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
