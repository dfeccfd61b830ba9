use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

/// Audio-only stream when one exists, otherwise the best combined stream.
pub const AUDIO_FORMAT: &str = "bestaudio/best";

pub struct ExtractRequest {
    pub url: String,
    /// Output template, e.g. `/data/<id>.%(ext)s`.
    pub output_template: PathBuf,
    pub format: String,
}

impl ExtractRequest {
    pub fn audio(url: &str, output_dir: &Path, id: &str) -> Self {
        Self {
            url: url.to_string(),
            output_template: output_dir.join(format!("{id}.%(ext)s")),
            format: AUDIO_FORMAT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMedia {
    /// Extension chosen by the extractor, without the dot.
    pub ext: String,
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, request: ExtractRequest) -> Result<ExtractedMedia>;
}

/// Runs the `yt-dlp` command-line tool.
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Picks the extension of the last path yt-dlp printed after moving the file.
pub fn parse_final_extension(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .and_then(|line| Path::new(line).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, request: ExtractRequest) -> Result<ExtractedMedia> {
        info!(url = %request.url, template = %request.output_template.display(), "running yt-dlp");

        let output = Command::new(&self.binary)
            .args(["--no-playlist", "--no-progress", "--no-simulate"])
            .arg("-f")
            .arg(&request.format)
            .arg("-o")
            .arg(&request.output_template)
            .args(["--print", "after_move:filepath"])
            .arg("--")
            .arg(&request.url)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("yt-dlp failed: {}", stderr.trim());
            return Err(anyhow!("yt-dlp failed: {}", stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ext = parse_final_extension(&stdout)
            .ok_or_else(|| anyhow!("yt-dlp did not report a downloaded file"))?;
        info!(ext = %ext, "yt-dlp finished");
        Ok(ExtractedMedia { ext })
    }
}
