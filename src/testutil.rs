//! Synthetic pages, label maps and checkpoints for unit tests.

use std::fs;
use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;

use crate::domain::classes::CHANNEL_NUM;
use crate::domain::entry::DatasetEntry;
use crate::infra::checkpoint::{CheckpointStore, Metadata};
use crate::ml::model::{ArchSpec, Precision};

fn is_staff(y: u32) -> bool {
    y % 8 == 0
}

fn is_notehead(x: u32, y: u32) -> bool {
    (4..7).contains(&(x % 16)) && (4..7).contains(&(y % 16))
}

fn is_stem(x: u32, y: u32) -> bool {
    x % 16 == 8 && !is_staff(y)
}

/// White paper with dark staff lines, noteheads and stems.
fn page(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if is_notehead(x, y) || is_stem(x, y) || is_staff(y) {
            Rgb([20, 20, 20])
        } else {
            Rgb([250, 250, 250])
        }
    })
}

/// `<root>/images/<name>.png` + `<root>/segmentation/<name>_seg.png`
pub(crate) fn write_segnet_dataset(root: &Path, names: &[&str], width: u32, height: u32) -> Vec<DatasetEntry> {
    let images = root.join("images");
    let seg    = root.join("segmentation");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&seg).unwrap();

    names
        .iter()
        .map(|name| {
            let image_path = images.join(format!("{name}.png"));
            let label_path = seg.join(format!("{name}_seg.png"));
            page(width, height).save(&image_path).unwrap();

            let label = GrayImage::from_fn(width, height, |x, y| {
                if is_notehead(x, y) {
                    Luma([30])
                } else if is_stem(x, y) {
                    Luma([42])
                } else if is_staff(y) {
                    Luma([135])
                } else {
                    Luma([0])
                }
            });
            label.save(&label_path).unwrap();
            DatasetEntry::new(image_path, label_path)
        })
        .collect()
}

/// `<root>/<distortion>/<writer>/{image,gt,symbol}/<page>.png`
pub(crate) fn write_cvc_dataset(
    root:        &Path,
    distortions: &[&str],
    writers:     &[&str],
    pages:       &[&str],
    width:       u32,
    height:      u32,
) -> Vec<DatasetEntry> {
    let mut entries = Vec::new();
    for distortion in distortions {
        for writer in writers {
            let base = root.join(distortion).join(writer);
            for sub in ["image", "gt", "symbol"] {
                fs::create_dir_all(base.join(sub)).unwrap();
            }
            for name in pages {
                let file = format!("{name}.png");
                let image_path  = base.join("image").join(&file);
                let staff_path  = base.join("gt").join(&file);
                let symbol_path = base.join("symbol").join(&file);

                page(width, height).save(&image_path).unwrap();
                GrayImage::from_fn(width, height, |_, y| Luma([if is_staff(y) { 255 } else { 0 }]))
                    .save(&staff_path)
                    .unwrap();
                GrayImage::from_fn(width, height, |x, y| Luma([if is_notehead(x, y) { 255 } else { 0 }]))
                    .save(&symbol_path)
                    .unwrap();

                entries.push(DatasetEntry::new(image_path, staff_path).with_aux_label(symbol_path));
            }
        }
    }
    entries
}

/// A seeded micro_conv checkpoint for a `win_size` window.
pub(crate) fn write_checkpoint(dir: &Path, win_size: usize) -> ArchSpec {
    let spec    = ArchSpec::micro_conv(win_size, CHANNEL_NUM);
    let weights = spec.init_weights(&mut StdRng::seed_from_u64(7)).unwrap();
    let mut metadata = Metadata::new();
    metadata.insert("model".into(), json!("micro_conv"));
    metadata.insert("win_size".into(), json!(win_size));

    CheckpointStore::new(dir)
        .save(&spec, &weights, &metadata, Precision::Float32)
        .unwrap();
    spec
}
