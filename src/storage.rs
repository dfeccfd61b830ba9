use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

use crate::error::AppError;

const PANORAMA_DIR: &str = "panoramas";

/// The output directory shared by stitched panoramas and downloaded media.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalFileStorage {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self {
            base_dir,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create output directory {}", self.base_dir.display()))
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.base_dir.join(key.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub fn new_panorama_key() -> String {
        format!("{PANORAMA_DIR}/{}.png", Uuid::new_v4())
    }

    /// Maps a client-supplied relative path to a file inside the output directory.
    ///
    /// Absolute paths and `..` are refused up front; the canonical result must
    /// also stay under the canonical root so symlinks cannot escape it.
    pub async fn resolve_checked(&self, relative: &str) -> Result<PathBuf, AppError> {
        let relative_path = Path::new(relative);
        let lexically_contained = !relative.is_empty()
            && relative_path
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !lexically_contained {
            return Err(AppError::PathEscape(relative.to_string()));
        }

        let root = fs::canonicalize(&self.base_dir)
            .await
            .with_context(|| format!("resolve output directory {}", self.base_dir.display()))?;
        let target = fs::canonicalize(self.base_dir.join(relative_path))
            .await
            .with_context(|| format!("file '{relative}' is not available"))?;
        if !target.starts_with(&root) {
            return Err(AppError::PathEscape(relative.to_string()));
        }
        Ok(target)
    }
}
