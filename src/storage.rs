//! Writes generated images to a per-session output directory.

use crate::mime::sniff_image_format;
use crate::Result;
use base64::Engine as _;
use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Where one saved image ended up, plus its inline base64 form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SavedImage {
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub download_url: String,
    pub image_data: String,
}

/// One batch of images. Every file in a batch shares the prefix and the
/// timestamp taken when the store was opened.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
    prefix: &'static str,
    timestamp: String,
}

impl OutputStore {
    /// Create `<base>/<YYYY-mm-dd>_<uuid>/` for a new session.
    pub fn create(base: &Path, edit: bool) -> Result<Self> {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let dir = base.join(format!("{}_{}", date, Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        info!("Created output directory: {}", dir.display());
        Ok(Self::in_dir(dir, edit))
    }

    /// Use an existing directory as is.
    pub fn in_dir(dir: PathBuf, edit: bool) -> Self {
        Self {
            dir,
            prefix: if edit { "edited" } else { "generated" },
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename_for(&self, index: usize, image: &[u8]) -> String {
        let extension = sniff_image_format(image)
            .map(|format| format.extension())
            .unwrap_or("png");
        format!("{}_{}_{}.{}", self.prefix, self.timestamp, index, extension)
    }

    pub fn save(&self, index: usize, image: &[u8]) -> Result<SavedImage> {
        let filename = self.filename_for(index, image);
        let path = self.dir.join(&filename);
        fs::write(&path, image)?;
        info!("Saved image #{} to {} ({} bytes)", index, path.display(), image.len());

        Ok(SavedImage {
            download_url: format!("/download/{}", filename),
            image_data: base64::engine::general_purpose::STANDARD.encode(image),
            filename,
            path,
        })
    }
}
