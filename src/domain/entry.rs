// ============================================================
// Layer 3 — Dataset Entry
// ============================================================
// One annotated page (or patch) on disk. The page identity is
// the image file name without its extension, so the same score
// page rendered under several distortions shares one identity.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// The page image (RGB or greyscale PNG)
    pub image_path: PathBuf,

    /// Primary label file (dense class map, or staff-line mask)
    pub label_path: PathBuf,

    /// Secondary sparse mask (CVC symbol layer), if the layout has one
    pub aux_label_path: Option<PathBuf>,
}

impl DatasetEntry {
    pub fn new(image_path: impl Into<PathBuf>, label_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path:     image_path.into(),
            label_path:     label_path.into(),
            aux_label_path: None,
        }
    }

    pub fn with_aux_label(mut self, path: impl Into<PathBuf>) -> Self {
        self.aux_label_path = Some(path.into());
        self
    }

    /// Base name of the image with the extension stripped.
    pub fn page_id(&self) -> String {
        page_id_of(&self.image_path)
    }
}

pub fn page_id_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
