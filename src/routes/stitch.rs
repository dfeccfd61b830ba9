use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use image::RgbImage;
use tracing::{debug, info};

use crate::error::AppError;
use crate::image_processing;
use crate::routes::AppState;
use crate::stitching::{self, StitchEngine};
use crate::storage::LocalFileStorage;

pub const IMAGES_FIELD: &str = "images";
pub const PANORAMA_URL_HEADER: &str = "x-panorama-url";

struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

fn form_error(context: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(format!("Upload is too large: {}", err.body_text()))
    } else {
        AppError::bad_request(format!("{context}: {}", err.body_text()))
    }
}

async fn read_uploads(multipart: &mut Multipart, max_images: usize) -> Result<Vec<Upload>, AppError> {
    let mut uploads = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(form_error("Failed to read form", err)),
        };
        if field.name() != Some(IMAGES_FIELD) {
            continue;
        }
        if uploads.len() == max_images {
            return Err(AppError::bad_request(format!(
                "At most {max_images} images can be stitched at once"
            )));
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image-{}", uploads.len() + 1));
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| form_error(&format!("Failed to read image '{file_name}'"), err))?;
        uploads.push(Upload {
            file_name,
            content_type,
            bytes,
        });
    }
    Ok(uploads)
}

fn decode_uploads(uploads: &[Upload]) -> Result<Vec<RgbImage>, AppError> {
    uploads
        .iter()
        .map(|upload| {
            image_processing::decode_image(&upload.bytes, upload.content_type.as_deref()).map_err(
                |err| {
                    AppError::bad_request(format!(
                        "Failed to decode image '{}': {err}",
                        upload.file_name
                    ))
                },
            )
        })
        .collect()
}

struct StitchSettings {
    max_dimension: u32,
    preprocess: bool,
    fast_png: bool,
}

/// Decode, prepare, stitch, crop and encode. Blocking.
fn render_panorama(
    engine: &dyn StitchEngine,
    uploads: &[Upload],
    settings: &StitchSettings,
) -> Result<Vec<u8>, AppError> {
    let decoded = decode_uploads(uploads)?;
    let prepared =
        stitching::prepare_images(engine, decoded, settings.max_dimension, settings.preprocess)?;
    let panorama = stitching::stitch_with_fallback(engine, &prepared)?;
    let cropped = engine.crop_borders(&panorama)?;
    info!(
        width = cropped.width(),
        height = cropped.height(),
        "panorama cropped"
    );
    Ok(image_processing::encode_png(&cropped, settings.fast_png)?)
}

pub async fn stitch_panorama(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    // A body that is not multipart carries no images.
    let mut multipart = multipart.map_err(|rejection| {
        debug!(rejection = %rejection.body_text(), "not a multipart request");
        AppError::bad_request("No images provided")
    })?;
    let uploads = read_uploads(&mut multipart, state.config.max_images).await?;
    if uploads.is_empty() {
        return Err(AppError::bad_request("No images provided"));
    }
    if uploads.len() < 2 {
        return Err(AppError::bad_request(
            "At least 2 images are required to stitch a panorama",
        ));
    }
    info!(images = uploads.len(), "stitch request");

    let engine = state.engine.clone();
    let settings = StitchSettings {
        max_dimension: state.config.max_image_dimension,
        preprocess: state.config.preprocess,
        fast_png: state.config.png_fast_compression,
    };
    let png = tokio::task::spawn_blocking(move || {
        render_panorama(engine.as_ref(), &uploads, &settings)
    })
    .await
    .map_err(|err| anyhow!("stitch task failed: {err}"))??;

    let key = LocalFileStorage::new_panorama_key();
    state.storage.put(&key, &png).await?;
    let url = state.storage.public_url(&key);
    info!(key = %key, bytes = png.len(), "panorama stored");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (HeaderName::from_static(PANORAMA_URL_HEADER), url),
        ],
        png,
    )
        .into_response())
}
