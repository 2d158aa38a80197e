// ============================================================
// Layer 4 — Window Batcher
// ============================================================
// Implements Burn's Batcher trait: stacks a Vec<WindowSample>
// along a new leading axis and moves it onto a device.
//
//   images: [batch, win, win, 3]           float in [0, 1]
//   labels: [batch, win, win, CHANNEL_NUM] one-hot
//
// Tensors stay channels-last; the model permutes internally.
// B is generic so the same batcher feeds the autodiff backend
// (training side) and its inner backend (validation side).
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*, tensor::TensorData};

use crate::data::window::WindowSample;

#[derive(Debug, Clone)]
pub struct WindowBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct WindowBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<WindowSample, WindowBatch<B>> for WindowBatcher<B> {
    /// Every sample in one batch shares win_size and channel count.
    fn batch(&self, items: Vec<WindowSample>) -> WindowBatch<B> {
        let batch_size = items.len();
        let win_size   = items.first().map(|s| s.win_size).unwrap_or(0);
        let channels   = items.first().map(|s| s.channels).unwrap_or(0);

        let mut images = Vec::with_capacity(batch_size * win_size * win_size * 3);
        let mut labels = Vec::with_capacity(batch_size * win_size * win_size * channels);
        for s in items {
            images.extend(s.image);
            labels.extend(s.label);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images, [batch_size, win_size, win_size, 3]),
            &self.device,
        );
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(labels, [batch_size, win_size, win_size, channels]),
            &self.device,
        );

        WindowBatch { images, labels }
    }
}
