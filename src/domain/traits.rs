// ============================================================
// Layer 3 — Core Traits
// ============================================================

use crate::domain::entry::DatasetEntry;
use crate::error::LoaderError;

// ─── LabelMask ────────────────────────────────────────────────────────────────
/// A decoded label: row-major HWC one-hot values, `channels` per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    pub width:    u32,
    pub height:   u32,
    pub channels: usize,
    pub data:     Vec<f32>,
}

impl LabelMask {
    /// All-background mask of the given size.
    pub fn background(width: u32, height: u32, channels: usize) -> Self {
        let mut data = vec![0.0f32; width as usize * height as usize * channels];
        for px in data.chunks_exact_mut(channels) {
            px[crate::domain::classes::BACKGROUND] = 1.0;
        }
        Self { width, height, channels, data }
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Move pixel (x, y) from background into `channel`.
    pub fn set_class(&mut self, x: u32, y: u32, channel: usize) {
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        let px = &mut self.data[start..start + self.channels];
        px.iter_mut().for_each(|v| *v = 0.0);
        px[channel] = 1.0;
    }
}

// ─── LabelDecoder ─────────────────────────────────────────────────────────────
/// Turns one entry's label file(s) into a CHANNEL_NUM mask.
///
/// Implementations:
///   - DenseLabelDecoder  → DeepScores class-id maps (segnet layout)
///   - SparseLabelDecoder → CVC staff/symbol ink masks
pub trait LabelDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, entry: &DatasetEntry) -> Result<LabelMask, LoaderError>;
}
