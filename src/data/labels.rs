// ============================================================
// Layer 4 — Label Decoders
// ============================================================
// Both dataset layouts end up as the same CHANNEL_NUM one-hot
// mask; they only differ in how the label files encode classes.
//
//   DenseLabelDecoder  — one greyscale map per page, pixel value
//                        is a DeepScores class id; ids are folded
//                        into channels through a fixed table.
//   SparseLabelDecoder — CVC binary ink masks: staff lines (gt/)
//                        and, when present, symbols (symbol/).

use std::path::Path;

use image::GrayImage;

use crate::domain::classes::{CHANNEL_NUM, NOTEHEADS, STAFF_LINES, STEMS_BEAMS};
use crate::domain::entry::DatasetEntry;
use crate::domain::traits::{LabelDecoder, LabelMask};
use crate::error::{LoaderError, WindowBoundsError};

// DeepScores v2 dense class ids per channel. Anything not listed is background.
const NOTEHEAD_IDS: &[u8] = &[
    25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40,
];
const STEM_BEAM_IDS: &[u8] = &[42, 122];
const STAFF_IDS: &[u8] = &[2, 135];

/// Grey values at or above this count as ink in sparse masks.
pub const INK_THRESHOLD: u8 = 128;

pub(crate) fn open_gray(path: &Path) -> Result<GrayImage, LoaderError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| LoaderError::Image { path: path.to_path_buf(), source })
}

// ─── DenseLabelDecoder ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct DenseLabelDecoder {
    class_to_channel: [u8; 256],
}

impl Default for DenseLabelDecoder {
    fn default() -> Self {
        let mut class_to_channel = [0u8; 256];
        for (ids, channel) in [(NOTEHEAD_IDS, NOTEHEADS), (STEM_BEAM_IDS, STEMS_BEAMS), (STAFF_IDS, STAFF_LINES)] {
            for &id in ids {
                class_to_channel[id as usize] = channel as u8;
            }
        }
        Self { class_to_channel }
    }
}

impl DenseLabelDecoder {
    pub fn channel_of(&self, class_id: u8) -> usize {
        self.class_to_channel[class_id as usize] as usize
    }
}

impl LabelDecoder for DenseLabelDecoder {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn decode(&self, entry: &DatasetEntry) -> Result<LabelMask, LoaderError> {
        let map      = open_gray(&entry.label_path)?;
        let (w, h)   = map.dimensions();
        let mut mask = LabelMask::background(w, h, CHANNEL_NUM);

        for (x, y, px) in map.enumerate_pixels() {
            let channel = self.channel_of(px.0[0]);
            if channel != 0 {
                mask.set_class(x, y, channel);
            }
        }
        Ok(mask)
    }
}

// ─── SparseLabelDecoder ───────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct SparseLabelDecoder {
    pub threshold: u8,
}

impl Default for SparseLabelDecoder {
    fn default() -> Self {
        Self { threshold: INK_THRESHOLD }
    }
}

impl LabelDecoder for SparseLabelDecoder {
    fn name(&self) -> &'static str {
        "sparse"
    }

    fn decode(&self, entry: &DatasetEntry) -> Result<LabelMask, LoaderError> {
        let staff    = open_gray(&entry.label_path)?;
        let (w, h)   = staff.dimensions();
        let mut mask = LabelMask::background(w, h, CHANNEL_NUM);

        for (x, y, px) in staff.enumerate_pixels() {
            if px.0[0] >= self.threshold {
                mask.set_class(x, y, STAFF_LINES);
            }
        }

        // Symbols are painted last: where both masks have ink, the symbol wins.
        if let Some(symbol_path) = &entry.aux_label_path {
            let symbols = open_gray(symbol_path)?;
            if symbols.dimensions() != (w, h) {
                return Err(WindowBoundsError::LabelSizeMismatch {
                    path:         symbol_path.clone(),
                    width:        w,
                    height:       h,
                    label_width:  symbols.width(),
                    label_height: symbols.height(),
                }
                .into());
            }
            for (x, y, px) in symbols.enumerate_pixels() {
                if px.0[0] >= self.threshold {
                    mask.set_class(x, y, NOTEHEADS);
                }
            }
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classes::BACKGROUND;
    use image::Luma;

    #[test]
    fn dense_ids_fold_into_channels() {
        let dir   = tempfile::tempdir().unwrap();
        let label = dir.path().join("p_seg.png");
        let mut map = GrayImage::new(4, 1);
        map.put_pixel(0, 0, Luma([0]));
        map.put_pixel(1, 0, Luma([27]));
        map.put_pixel(2, 0, Luma([42]));
        map.put_pixel(3, 0, Luma([135]));
        map.save(&label).unwrap();

        let entry = DatasetEntry::new(dir.path().join("p.png"), label);
        let mask  = DenseLabelDecoder::default().decode(&entry).unwrap();

        assert_eq!(mask.pixel(0, 0), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(mask.pixel(1, 0)[NOTEHEADS], 1.0);
        assert_eq!(mask.pixel(2, 0)[STEMS_BEAMS], 1.0);
        assert_eq!(mask.pixel(3, 0)[STAFF_LINES], 1.0);
    }

    #[test]
    fn unknown_dense_ids_are_background() {
        let dec = DenseLabelDecoder::default();
        assert_eq!(dec.channel_of(200), BACKGROUND);
        assert_eq!(dec.channel_of(0), BACKGROUND);
    }

    #[test]
    fn sparse_masks_combine_with_symbol_priority() {
        let dir    = tempfile::tempdir().unwrap();
        let staff  = dir.path().join("gt.png");
        let symbol = dir.path().join("symbol.png");

        let mut s = GrayImage::new(3, 1);
        s.put_pixel(1, 0, Luma([255]));
        s.put_pixel(2, 0, Luma([255]));
        s.save(&staff).unwrap();

        let mut y = GrayImage::new(3, 1);
        y.put_pixel(2, 0, Luma([255]));
        y.save(&symbol).unwrap();

        let entry = DatasetEntry::new(dir.path().join("img.png"), staff).with_aux_label(symbol);
        let mask  = SparseLabelDecoder::default().decode(&entry).unwrap();

        assert_eq!(mask.pixel(0, 0)[BACKGROUND], 1.0);
        assert_eq!(mask.pixel(1, 0)[STAFF_LINES], 1.0);
        assert_eq!(mask.pixel(2, 0), &[0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn every_decoded_pixel_is_one_hot() {
        let dir   = tempfile::tempdir().unwrap();
        let label = dir.path().join("gt.png");
        GrayImage::from_fn(5, 5, |x, y| Luma([if (x + y) % 2 == 0 { 255 } else { 0 }]))
            .save(&label)
            .unwrap();

        let entry = DatasetEntry::new(dir.path().join("img.png"), label);
        let mask  = SparseLabelDecoder::default().decode(&entry).unwrap();
        for px in mask.data.chunks_exact(CHANNEL_NUM) {
            assert_eq!(px.iter().sum::<f32>(), 1.0);
        }
    }
}
