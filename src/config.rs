use std::env;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1600;
pub const DEFAULT_MAX_IMAGES: usize = 20;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

/// Runtime settings, read once at startup and handed to the router.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    /// Directory holding stitched panoramas and downloaded media.
    pub output_dir: PathBuf,
    /// Public prefix that `/files/...` is reachable under.
    pub files_base_url: String,
    pub allowed_origins: Vec<String>,
    pub ytdlp_bin: String,
    pub max_image_dimension: u32,
    pub max_images: usize,
    pub max_upload_bytes: usize,
    pub preprocess: bool,
    pub png_fast_compression: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let host = non_empty_var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = non_empty_var("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let bind_address = format!("{host}:{port}");

        let output_dir = resolve_output_dir();
        let files_base_url = resolve_files_base_url(non_empty_var("FILES_BASE_URL"), &bind_address);
        let allowed_origins = parse_origins(&env::var("ORIGINS").unwrap_or_default());

        Self {
            bind_address,
            output_dir,
            files_base_url,
            allowed_origins,
            ytdlp_bin: non_empty_var("YTDLP_BIN").unwrap_or_else(|| DEFAULT_YTDLP_BIN.to_string()),
            max_image_dimension: parsed_var("MAX_IMAGE_DIMENSION")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_IMAGE_DIMENSION),
            max_images: parsed_var("MAX_IMAGES")
                .filter(|value| *value >= 2)
                .unwrap_or(DEFAULT_MAX_IMAGES),
            max_upload_bytes: parsed_var("MAX_UPLOAD_BYTES").unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            preprocess: flag_var("PREPROCESS").unwrap_or(true),
            png_fast_compression: flag_var("PNG_FAST_COMPRESSION").unwrap_or(false),
        }
    }

    /// Settings for tests and embedding: everything defaulted except the directory.
    pub fn with_output_dir(output_dir: PathBuf, files_base_url: &str) -> Self {
        Self {
            bind_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            output_dir,
            files_base_url: files_base_url.trim_end_matches('/').to_string(),
            allowed_origins: Vec::new(),
            ytdlp_bin: DEFAULT_YTDLP_BIN.to_string(),
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            max_images: DEFAULT_MAX_IMAGES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            preprocess: true,
            png_fast_compression: false,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key).and_then(|value| value.parse::<T>().ok())
}

fn flag_var(key: &str) -> Option<bool> {
    non_empty_var(key).map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn resolve_output_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("DOWNLOAD_PATH") {
        return PathBuf::from(dir);
    }
    let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push("pano-media-server");
    base
}

pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| origin.trim_end_matches('/').to_string())
        .collect()
}

pub fn resolve_files_base_url(configured: Option<String>, bind_address: &str) -> String {
    if let Some(url) = configured {
        return normalize_scheme(url.trim()).trim_end_matches('/').to_string();
    }
    let base = normalize_scheme(bind_address);
    format!("{}/files", base.trim_end_matches('/'))
}

fn normalize_scheme(raw: &str) -> String {
    let mut base = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    for (doubled, single) in [
        ("http://http://", "http://"),
        ("https://https://", "https://"),
        ("http://https://", "https://"),
        ("https://http://", "http://"),
    ] {
        while base.starts_with(doubled) {
            base = base.replacen(doubled, single, 1);
        }
    }
    base
}
