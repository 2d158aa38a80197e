// ============================================================
// Layer 4 — Windowed Data Loader
// ============================================================
// Produces a bounded supply of fixed-size training windows:
//
//   for each sample:
//     pick an entry uniformly at random
//     decode its image (RGB, scaled to [0, 1]) and label mask
//     cut one win_size × win_size window at a uniform offset
//
// Each call to `produce_batches` yields exactly
// ceil(num_samples / batch_size) batches and starts from a fresh
// child seed, so a restart samples new windows instead of
// replaying the old ones, while a seeded loader stays
// reproducible end to end.
//
// Random draws happen sequentially on the iterator's RNG; only
// the decode/crop work fans out over rayon, and results are
// collected in draw order.
//
// Sources smaller than the window follow SmallSourcePolicy:
//   Pad    — extend right/bottom with white paper and background
//   Reject — fail with WindowBoundsError

use std::sync::Arc;

use burn::data::dataset::Dataset;
use image::RgbImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::dataset::PageDataset;
use crate::domain::entry::DatasetEntry;
use crate::domain::traits::{LabelDecoder, LabelMask};
use crate::error::{LoaderError, WindowBoundsError};

/// Value used for padded image pixels (white paper).
const PAD_VALUE: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmallSourcePolicy {
    #[default]
    Pad,
    Reject,
}

impl std::str::FromStr for SmallSourcePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pad"    => Ok(Self::Pad),
            "reject" => Ok(Self::Reject),
            other    => Err(format!("unknown small-source policy '{other}', expected pad or reject")),
        }
    }
}

// ─── DecodedPage ──────────────────────────────────────────────────────────────
/// A full page in memory: RGB in [0, 1] and its one-hot label, both HWC.
#[derive(Debug, Clone)]
pub struct DecodedPage {
    pub width:  u32,
    pub height: u32,
    pub image:  Vec<f32>,
    pub label:  LabelMask,
}

impl DecodedPage {
    pub fn from_parts(rgb: &RgbImage, label: LabelMask) -> Self {
        let (width, height) = rgb.dimensions();
        let image = rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self { width, height, image, label }
    }

    pub fn load(
        entry:    &DatasetEntry,
        decoder:  &dyn LabelDecoder,
        win_size: usize,
        policy:   SmallSourcePolicy,
    ) -> Result<Self, LoaderError> {
        let rgb = image::open(&entry.image_path)
            .map(|img| img.to_rgb8())
            .map_err(|source| LoaderError::Image { path: entry.image_path.clone(), source })?;
        let label = decoder.decode(entry)?;

        if (label.width, label.height) != rgb.dimensions() {
            return Err(WindowBoundsError::LabelSizeMismatch {
                path:         entry.label_path.clone(),
                width:        rgb.width(),
                height:       rgb.height(),
                label_width:  label.width,
                label_height: label.height,
            }
            .into());
        }

        let page = Self::from_parts(&rgb, label);
        let win  = win_size as u32;
        if page.width >= win && page.height >= win {
            return Ok(page);
        }

        match policy {
            SmallSourcePolicy::Pad => {
                tracing::debug!(
                    "Padding '{}' from {}x{} to fit a {}px window",
                    entry.image_path.display(),
                    page.width,
                    page.height,
                    win_size
                );
                Ok(page.padded_to(win.max(page.width), win.max(page.height)))
            }
            SmallSourcePolicy::Reject => Err(WindowBoundsError::SourceTooSmall {
                path:     entry.image_path.clone(),
                width:    page.width,
                height:   page.height,
                win_size,
            }
            .into()),
        }
    }

    /// Extend to `width` × `height`, keeping the original at the top-left.
    pub fn padded_to(&self, width: u32, height: u32) -> Self {
        let channels  = self.label.channels;
        let mut image = vec![PAD_VALUE; width as usize * height as usize * 3];
        let mut label = LabelMask::background(width, height, channels);

        let src_row_img = self.width as usize * 3;
        let src_row_lbl = self.width as usize * channels;
        for y in 0..self.height as usize {
            let dst_img = y * width as usize * 3;
            image[dst_img..dst_img + src_row_img]
                .copy_from_slice(&self.image[y * src_row_img..(y + 1) * src_row_img]);

            let dst_lbl = y * width as usize * channels;
            label.data[dst_lbl..dst_lbl + src_row_lbl]
                .copy_from_slice(&self.label.data[y * src_row_lbl..(y + 1) * src_row_lbl]);
        }
        Self { width, height, image, label }
    }

    /// Cut the window whose top-left corner is (x, y).
    pub fn window(&self, x: u32, y: u32, win_size: usize) -> Result<WindowSample, WindowBoundsError> {
        let win = win_size as u32;
        if x + win > self.width || y + win > self.height {
            return Err(WindowBoundsError::SourceTooSmall {
                path:     Default::default(),
                width:    self.width,
                height:   self.height,
                win_size,
            });
        }

        let channels  = self.label.channels;
        let mut image = Vec::with_capacity(win_size * win_size * 3);
        let mut label = Vec::with_capacity(win_size * win_size * channels);
        for row in y as usize..(y + win) as usize {
            let img_start = (row * self.width as usize + x as usize) * 3;
            image.extend_from_slice(&self.image[img_start..img_start + win_size * 3]);

            let lbl_start = (row * self.width as usize + x as usize) * channels;
            label.extend_from_slice(&self.label.data[lbl_start..lbl_start + win_size * channels]);
        }
        Ok(WindowSample { win_size, channels, image, label })
    }
}

/// Map a uniform draw in [0, 1) onto an offset in 0..=max_offset.
fn offset_from_draw(u: f64, max_offset: u32) -> u32 {
    ((u * (max_offset as f64 + 1.0)) as u32).min(max_offset)
}

// ─── WindowSample ──────────────────────────────────────────────────────────
/// One (image, label) window, both HWC.
#[derive(Debug, Clone)]
pub struct WindowSample {
    pub win_size: usize,
    pub channels: usize,
    pub image:    Vec<f32>,
    pub label:    Vec<f32>,
}

// ─── WindowLoader ─────────────────────────────────────────────────────────────
pub struct WindowLoader {
    dataset:     PageDataset,
    decoder:     Arc<dyn LabelDecoder>,
    win_size:    usize,
    num_samples: usize,
    policy:      SmallSourcePolicy,
    rng:         StdRng,
}

impl WindowLoader {
    pub fn new(
        entries:     Vec<DatasetEntry>,
        decoder:     Arc<dyn LabelDecoder>,
        win_size:    usize,
        num_samples: usize,
        seed:        u64,
    ) -> Self {
        Self {
            dataset: PageDataset::new(entries),
            decoder,
            win_size,
            num_samples,
            policy: SmallSourcePolicy::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_policy(mut self, policy: SmallSourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn win_size(&self) -> usize { self.win_size }

    pub fn num_samples(&self) -> usize { self.num_samples }

    pub fn decoder_name(&self) -> &'static str { self.decoder.name() }

    pub fn is_empty(&self) -> bool { self.dataset.len() == 0 }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        self.num_samples.div_ceil(batch_size.max(1))
    }

    /// Start a fresh pass of ceil(num_samples / batch_size) batches.
    pub fn produce_batches(&mut self, batch_size: usize) -> Result<WindowBatches<'_>, LoaderError> {
        if batch_size == 0 {
            return Err(LoaderError::ZeroBatchSize);
        }
        if self.is_empty() {
            return Err(LoaderError::NoEntries);
        }
        let pass_seed: u64 = self.rng.gen();
        Ok(WindowBatches {
            loader:    &*self,
            rng:       StdRng::seed_from_u64(pass_seed),
            remaining: self.num_samples,
            batch_size,
        })
    }

    fn sample(&self, draw: Draw) -> Result<WindowSample, LoaderError> {
        let entry = self.dataset.get(draw.entry).ok_or(LoaderError::NoEntries)?;
        let page  = DecodedPage::load(&entry, self.decoder.as_ref(), self.win_size, self.policy)?;
        let win   = self.win_size as u32;
        let x     = offset_from_draw(draw.u, page.width - win);
        let y     = offset_from_draw(draw.v, page.height - win);
        let window = page.window(x, y, self.win_size).map_err(|e| match e {
            WindowBoundsError::SourceTooSmall { width, height, win_size, .. } => {
                WindowBoundsError::SourceTooSmall { path: entry.image_path.clone(), width, height, win_size }
            }
            other => other,
        })?;
        Ok(window)
    }
}

#[derive(Debug, Clone, Copy)]
struct Draw {
    entry: usize,
    u:     f64,
    v:     f64,
}

// ─── WindowBatches ────────────────────────────────────────────────────────────
/// Lazy, finite sequence of sample batches from one `produce_batches`
/// call; hand each batch to a `WindowBatcher` for tensors.
pub struct WindowBatches<'a> {
    loader:     &'a WindowLoader,
    rng:        StdRng,
    remaining:  usize,
    batch_size: usize,
}

impl Iterator for WindowBatches<'_> {
    type Item = Result<Vec<WindowSample>, LoaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.remaining.min(self.batch_size);
        self.remaining -= n;

        let num_entries = self.loader.dataset.len();
        let draws: Vec<Draw> = (0..n)
            .map(|_| Draw {
                entry: self.rng.gen_range(0..num_entries),
                u:     self.rng.gen(),
                v:     self.rng.gen(),
            })
            .collect();

        Some(
            draws
                .into_par_iter()
                .map(|d| self.loader.sample(d))
                .collect(),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(self.batch_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for WindowBatches<'_> {}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::labels::{DenseLabelDecoder, SparseLabelDecoder};
    use crate::domain::classes::CHANNEL_NUM;
    use crate::testutil;

    fn flat_images(batch: Vec<WindowSample>) -> Vec<f32> {
        batch.into_iter().flat_map(|w| w.image).collect()
    }

    fn flat_labels(batch: Vec<WindowSample>) -> Vec<f32> {
        batch.into_iter().flat_map(|w| w.label).collect()
    }

    fn segnet_loader(dir: &std::path::Path, num_samples: usize, size: u32, win: usize) -> WindowLoader {
        let entries = testutil::write_segnet_dataset(dir, &["a", "b", "c"], size, size);
        WindowLoader::new(entries, Arc::new(DenseLabelDecoder::default()), win, num_samples, 11)
    }

    #[test]
    fn batch_count_is_ceil_of_samples_over_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = segnet_loader(dir.path(), 10, 24, 16);

        let batches: Vec<_> = loader.produce_batches(4).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[2].len(), 2);
        assert!(batches.iter().flatten().all(|w| {
            w.win_size == 16 && w.image.len() == 16 * 16 * 3 && w.label.len() == 16 * 16 * CHANNEL_NUM
        }));
        assert_eq!(loader.num_batches(4), 3);
    }

    #[test]
    fn restart_samples_fresh_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = segnet_loader(dir.path(), 6, 64, 8);

        let first: Vec<_>  = loader.produce_batches(3).unwrap().map(|b| flat_images(b.unwrap())).collect();
        let second: Vec<_> = loader.produce_batches(3).unwrap().map(|b| flat_images(b.unwrap())).collect();
        assert_eq!(first.len(), second.len());
        assert_ne!(first, second);
    }

    #[test]
    fn same_seed_reproduces_the_same_windows() {
        let dir     = tempfile::tempdir().unwrap();
        let entries = testutil::write_segnet_dataset(dir.path(), &["a", "b", "c"], 48, 48);
        let mk = || WindowLoader::new(entries.clone(), Arc::new(DenseLabelDecoder::default()), 8, 5, 99);

        let mut a = mk();
        let mut b = mk();
        let wa: Vec<_> = a.produce_batches(2).unwrap().map(|x| flat_labels(x.unwrap())).collect();
        let wb: Vec<_> = b.produce_batches(2).unwrap().map(|x| flat_labels(x.unwrap())).collect();
        assert_eq!(wa, wb);
    }

    #[test]
    fn small_sources_are_padded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = segnet_loader(dir.path(), 2, 10, 16);

        let batch = loader.produce_batches(2).unwrap().next().unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        // bottom-right pixel lies in the padding: white image, background label
        let last_px = &batch[0].image[16 * 16 * 3 - 3..];
        assert_eq!(last_px, &[1.0, 1.0, 1.0]);
        let last_lbl = &batch[0].label[16 * 16 * CHANNEL_NUM - CHANNEL_NUM..];
        assert_eq!(last_lbl, &[1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn reject_policy_raises_window_bounds_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = segnet_loader(dir.path(), 2, 10, 16).with_policy(SmallSourcePolicy::Reject);

        let err = loader.produce_batches(2).unwrap().next().unwrap().unwrap_err();
        assert!(matches!(err, LoaderError::Window(WindowBoundsError::SourceTooSmall { .. })), "{err}");
    }

    #[test]
    fn window_copies_the_requested_region() {
        let rgb   = RgbImage::from_fn(4, 3, |x, y| image::Rgb([(x * 10 + y) as u8, 0, 0]));
        let page  = DecodedPage::from_parts(&rgb, LabelMask::background(4, 3, CHANNEL_NUM));
        let w     = page.window(2, 1, 2).unwrap();
        let reds: Vec<u8> = w.image.chunks(3).map(|p| (p[0] * 255.0).round() as u8).collect();
        assert_eq!(reds, vec![21, 31, 22, 32]);
        assert!(page.window(3, 0, 2).is_err());
    }

    #[test]
    fn offsets_cover_the_whole_valid_range() {
        assert_eq!(offset_from_draw(0.0, 5), 0);
        assert_eq!(offset_from_draw(0.999_999, 5), 5);
        assert_eq!(offset_from_draw(0.5, 0), 0);
    }

    #[test]
    fn sparse_layout_uses_the_same_windowing_contract() {
        let dir     = tempfile::tempdir().unwrap();
        let entries = testutil::write_cvc_dataset(dir.path(), &["ideal"], &["w-01"], &["p1", "p2"], 20, 20);
        let mut loader = WindowLoader::new(entries, Arc::new(SparseLabelDecoder::default()), 12, 3, 5);

        let batches: Vec<_> = loader.produce_batches(2).unwrap().map(Result::unwrap).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].label.len(), 12 * 12 * CHANNEL_NUM);
        assert_eq!(loader.decoder_name(), "sparse");
    }

    #[test]
    fn empty_loader_and_zero_batch_are_rejected() {
        let mut loader = WindowLoader::new(Vec::new(), Arc::new(DenseLabelDecoder::default()), 8, 4, 0);
        assert!(matches!(loader.produce_batches(2), Err(LoaderError::NoEntries)));
        assert!(matches!(loader.produce_batches(0), Err(LoaderError::ZeroBatchSize)));
    }

    #[test]
    fn mismatched_label_size_is_a_window_error() {
        let dir     = tempfile::tempdir().unwrap();
        let entries = testutil::write_segnet_dataset(dir.path(), &["a"], 20, 20);
        image::GrayImage::new(10, 10).save(&entries[0].label_path).unwrap();

        let err = DecodedPage::load(&entries[0], &DenseLabelDecoder::default(), 8, SmallSourcePolicy::Pad).unwrap_err();
        assert!(matches!(err, LoaderError::Window(WindowBoundsError::LabelSizeMismatch { .. })));
    }
}
