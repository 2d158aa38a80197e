// ============================================================
// Layer 4 — Dataset Path Resolver
// ============================================================
// Discovers (image, label) pairs under a dataset root. Two
// directory conventions are understood:
//
//   segnet (DeepScores dense)
//     <root>/images/<page>.png
//     <root>/segmentation/<page>_seg.png
//
//   cvc (CVC-MUSCIMA style, the default)
//     <root>/<distortion>/<writer>/image/<page>.png
//     <root>/<distortion>/<writer>/gt/<page>.png       staff lines, required
//     <root>/<distortion>/<writer>/symbol/<page>.png   symbols, optional
//
// Directory listings are sorted, so the same filesystem state
// always yields the same entry order. Any randomness comes later,
// from the splitter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::labels::{DenseLabelDecoder, SparseLabelDecoder};
use crate::domain::entry::DatasetEntry;
use crate::domain::traits::LabelDecoder;
use crate::error::DatasetLayoutError;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    SegNet,
    Cvc,
}

impl DatasetLayout {
    /// `"segnet"` selects the dense layout; anything else is CVC-like.
    pub fn from_discriminator(data_model: &str) -> Self {
        if data_model.eq_ignore_ascii_case("segnet") {
            Self::SegNet
        } else {
            Self::Cvc
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SegNet => "segnet",
            Self::Cvc    => "cvc",
        }
    }

    /// The label convention that goes with this layout.
    pub fn decoder(self) -> Arc<dyn LabelDecoder> {
        match self {
            Self::SegNet => Arc::new(DenseLabelDecoder::default()),
            Self::Cvc    => Arc::new(SparseLabelDecoder::default()),
        }
    }
}

/// Find every (image, label) pair under `root` for the given layout.
pub fn resolve(root: &Path, layout: DatasetLayout) -> Result<Vec<DatasetEntry>, DatasetLayoutError> {
    if !root.is_dir() {
        return Err(DatasetLayoutError::MissingRoot { root: root.to_path_buf() });
    }

    let entries = match layout {
        DatasetLayout::SegNet => resolve_segnet(root)?,
        DatasetLayout::Cvc    => resolve_cvc(root)?,
    };

    if entries.is_empty() {
        return Err(DatasetLayoutError::Empty { root: root.to_path_buf() });
    }

    tracing::info!(
        "Resolved {} {} entries under '{}'",
        entries.len(),
        layout.name(),
        root.display()
    );
    Ok(entries)
}

fn resolve_segnet(root: &Path) -> Result<Vec<DatasetEntry>, DatasetLayoutError> {
    let images_dir = require_dir(&root.join("images"), "segnet")?;
    let seg_dir    = require_dir(&root.join("segmentation"), "segnet")?;

    let mut entries = Vec::new();
    for image in list_images(&images_dir)? {
        let stem  = stem_of(&image);
        let label = seg_dir.join(format!("{stem}_seg.png"));
        if !label.is_file() {
            return Err(DatasetLayoutError::MissingLabel { image, expected: label });
        }
        tracing::debug!("Paired '{}' with '{}'", image.display(), label.display());
        entries.push(DatasetEntry::new(image, label));
    }
    Ok(entries)
}

fn resolve_cvc(root: &Path) -> Result<Vec<DatasetEntry>, DatasetLayoutError> {
    let mut entries = Vec::new();

    for distortion in list_dirs(root)? {
        for writer in list_dirs(&distortion)? {
            let image_dir = writer.join("image");
            if !image_dir.is_dir() {
                return Err(DatasetLayoutError::MissingDirectory { path: image_dir, layout: "cvc" });
            }
            let gt_dir     = writer.join("gt");
            let symbol_dir = writer.join("symbol");

            for image in list_images(&image_dir)? {
                let file_name = image.file_name().map(PathBuf::from).unwrap_or_default();
                let staff     = gt_dir.join(&file_name);
                if !staff.is_file() {
                    return Err(DatasetLayoutError::MissingLabel { image, expected: staff });
                }

                let mut entry = DatasetEntry::new(image, staff);
                let symbol    = symbol_dir.join(&file_name);
                if symbol.is_file() {
                    entry = entry.with_aux_label(symbol);
                }
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

// ─── Listing helpers ──────────────────────────────────────────────────────────

fn require_dir(path: &Path, layout: &'static str) -> Result<PathBuf, DatasetLayoutError> {
    if path.is_dir() {
        Ok(path.to_path_buf())
    } else {
        Err(DatasetLayoutError::MissingDirectory { path: path.to_path_buf(), layout })
    }
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, DatasetLayoutError> {
    let io_err = |source| DatasetLayoutError::Io { path: dir.to_path_buf(), source };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        paths.push(entry.map_err(io_err)?.path());
    }
    paths.sort();
    Ok(paths)
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, DatasetLayoutError> {
    Ok(sorted_children(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, DatasetLayoutError> {
    Ok(sorted_children(dir)?
        .into_iter()
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn stem_of(path: &Path) -> String {
    crate::domain::entry::page_id_of(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn discriminator_selects_layout() {
        assert_eq!(DatasetLayout::from_discriminator("segnet"), DatasetLayout::SegNet);
        assert_eq!(DatasetLayout::from_discriminator("unet"), DatasetLayout::Cvc);
        assert_eq!(DatasetLayout::from_discriminator(""), DatasetLayout::Cvc);
    }

    #[test]
    fn segnet_pairs_are_sorted_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_segnet_dataset(dir.path(), &["p02", "p00", "p01"], 40, 30);

        let entries = resolve(dir.path(), DatasetLayout::SegNet).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.page_id()).collect();
        assert_eq!(ids, ["p00", "p01", "p02"]);
        assert!(entries[0].label_path.ends_with("segmentation/p00_seg.png"));
    }

    #[test]
    fn segnet_image_without_label_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_segnet_dataset(dir.path(), &["p00", "p01"], 40, 30);
        std::fs::remove_file(dir.path().join("segmentation/p01_seg.png")).unwrap();

        let err = resolve(dir.path(), DatasetLayout::SegNet).unwrap_err();
        assert!(matches!(err, DatasetLayoutError::MissingLabel { .. }), "{err}");
    }

    #[test]
    fn segnet_without_segmentation_dir_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();

        let err = resolve(dir.path(), DatasetLayout::SegNet).unwrap_err();
        assert!(matches!(err, DatasetLayoutError::MissingDirectory { .. }));
    }

    #[test]
    fn cvc_walks_distortions_and_writers() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_cvc_dataset(dir.path(), &["ideal", "rotated"], &["w-01", "w-02"], &["p001", "p002"], 32, 32);

        let entries = resolve(dir.path(), DatasetLayout::Cvc).unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|e| e.aux_label_path.is_some()));
        assert!(entries[0].image_path.starts_with(dir.path().join("ideal/w-01")));
    }

    #[test]
    fn cvc_image_without_staff_gt_is_a_layout_error() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_cvc_dataset(dir.path(), &["ideal"], &["w-01"], &["p001"], 32, 32);
        std::fs::remove_file(dir.path().join("ideal/w-01/gt/p001.png")).unwrap();

        let err = resolve(dir.path(), DatasetLayout::Cvc).unwrap_err();
        assert!(matches!(err, DatasetLayoutError::MissingLabel { .. }));
    }

    #[test]
    fn missing_root_is_reported() {
        let err = resolve(Path::new("/definitely/not/here"), DatasetLayout::Cvc).unwrap_err();
        assert!(matches!(err, DatasetLayoutError::MissingRoot { .. }));
    }
}
