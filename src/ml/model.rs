// ============================================================
// Layer 5 — Segmentation Model
// ============================================================
// A pixel-classification network rebuilt at runtime from a
// declarative architecture description (arch.json).
//
// The set of layer kinds is closed:
//
//   input       shape [win, win, 3], must come first
//   conv2d      same-padded, stride 1, optional fused activation
//   batch_norm  inference-mode normalisation from moving statistics
//   activation  linear | relu | sigmoid | softmax (over channels)
//   max_pool    square, stride = pool size
//   upsample    nearest neighbour, integer factor
//
// An unknown `type` tag fails deserialisation instead of being
// skipped. Batch normalisation always uses the stored moving
// statistics, so forward passes never alter model state.
//
// Weights are keyed `<layer>.<param>`:
//   conv2d     → kernel [out, in, k, k], bias [out]
//   batch_norm → gamma, beta, moving_mean, moving_variance [features]
//
// Reference: Burn Book §3 (Building Blocks)

use std::collections::{BTreeMap, HashSet};

use burn::{
    module::{Ignored, Param, RunningState},
    nn::{
        interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::{activation, module::conv2d, ops::ConvOptions, TensorData},
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointCorruptError;

const DEFAULT_BN_EPSILON: f64 = 1e-3;

fn default_bn_epsilon() -> f64 {
    DEFAULT_BN_EPSILON
}

// ─── Architecture description ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Softmax,
}

impl Activation {
    /// Apply to an NCHW tensor; softmax runs over the channel axis.
    pub fn apply<B: Backend>(self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Linear  => x,
            Self::Relu    => activation::relu(x),
            Self::Sigmoid => activation::sigmoid(x),
            Self::Softmax => activation::softmax(x, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Input {
        name:  String,
        shape: [usize; 3],
    },
    Conv2d {
        name:        String,
        filters:     usize,
        kernel_size: usize,
        #[serde(default)]
        activation:  Activation,
    },
    BatchNorm {
        name: String,
        #[serde(default = "default_bn_epsilon")]
        epsilon: f64,
    },
    Activation {
        name:       String,
        activation: Activation,
    },
    MaxPool {
        name:      String,
        pool_size: usize,
    },
    Upsample {
        name: String,
        size: usize,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Input { name, .. }
            | Self::Conv2d { name, .. }
            | Self::BatchNorm { name, .. }
            | Self::Activation { name, .. }
            | Self::MaxPool { name, .. }
            | Self::Upsample { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchSpec {
    pub name:   String,
    pub layers: Vec<LayerSpec>,
}

/// One parameter tensor the architecture declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name:  String,
    pub shape: Vec<usize>,
}

/// What a validated architecture looks like from the outside.
#[derive(Debug, Clone)]
pub struct ArchPlan {
    pub input_shape:  [usize; 3],
    pub out_channels: usize,
    pub params:       Vec<ParamSpec>,
}

impl ArchPlan {
    pub fn win_size(&self) -> usize {
        self.input_shape[0]
    }
}

fn arch_err(msg: impl Into<String>) -> CheckpointCorruptError {
    CheckpointCorruptError::Architecture(msg.into())
}

impl ArchSpec {
    /// Walk the layers, tracking channels and spatial size, and list
    /// every parameter tensor with its expected shape.
    pub fn plan(&self) -> Result<ArchPlan, CheckpointCorruptError> {
        let mut layers = self.layers.iter();
        let (input_name, input_shape) = match layers.next() {
            Some(LayerSpec::Input { name, shape }) => (name, *shape),
            Some(other) => return Err(arch_err(format!("first layer '{}' is not an input", other.name()))),
            None        => return Err(arch_err("architecture has no layers")),
        };

        let [height, width, in_channels] = input_shape;
        if height == 0 || height != width {
            return Err(arch_err(format!("input must be a square window, got {height}x{width}")));
        }
        if in_channels != 3 {
            return Err(arch_err(format!("input must have 3 channels, got {in_channels}")));
        }

        let mut names: HashSet<&str> = HashSet::from([input_name.as_str()]);
        let mut channels = in_channels;
        let mut size     = height;
        let mut params   = Vec::new();

        for layer in layers {
            if !names.insert(layer.name()) {
                return Err(arch_err(format!("duplicate layer name '{}'", layer.name())));
            }
            match layer {
                LayerSpec::Input { name, .. } => {
                    return Err(arch_err(format!("second input layer '{name}'")));
                }
                LayerSpec::Conv2d { name, filters, kernel_size, .. } => {
                    if *filters == 0 || kernel_size % 2 == 0 {
                        return Err(arch_err(format!(
                            "conv2d '{name}' needs filters > 0 and an odd kernel, got {filters} / {kernel_size}"
                        )));
                    }
                    params.push(ParamSpec {
                        name:  format!("{name}.kernel"),
                        shape: vec![*filters, channels, *kernel_size, *kernel_size],
                    });
                    params.push(ParamSpec { name: format!("{name}.bias"), shape: vec![*filters] });
                    channels = *filters;
                }
                LayerSpec::BatchNorm { name, .. } => {
                    for p in ["gamma", "beta", "moving_mean", "moving_variance"] {
                        params.push(ParamSpec { name: format!("{name}.{p}"), shape: vec![channels] });
                    }
                }
                LayerSpec::Activation { .. } => {}
                LayerSpec::MaxPool { name, pool_size } => {
                    if *pool_size == 0 || size % pool_size != 0 {
                        return Err(arch_err(format!(
                            "max_pool '{name}' of {pool_size} does not divide the {size}px feature map"
                        )));
                    }
                    size /= pool_size;
                }
                LayerSpec::Upsample { name, size: factor } => {
                    if *factor == 0 {
                        return Err(arch_err(format!("upsample '{name}' has factor 0")));
                    }
                    size = size.checked_mul(*factor).ok_or_else(|| {
                        arch_err(format!("upsample '{name}' by {factor} overflows the {size}px feature map"))
                    })?;
                }
            }
        }

        if size != height {
            return Err(arch_err(format!("output is {size}px but input is {height}px")));
        }

        Ok(ArchPlan { input_shape, out_channels: channels, params })
    }

    /// Conv-BN-ReLU, pool, conv-BN-ReLU, upsample, conv-BN-ReLU, 1×1 sigmoid head.
    pub fn tiny_conv(win_size: usize, out_class: usize) -> Self {
        let mut layers = vec![LayerSpec::Input { name: "input".into(), shape: [win_size, win_size, 3] }];
        layers.extend(conv_bn_relu("block1", 16));
        layers.push(LayerSpec::MaxPool { name: "pool".into(), pool_size: 2 });
        layers.extend(conv_bn_relu("block2", 32));
        layers.push(LayerSpec::Upsample { name: "upsample".into(), size: 2 });
        layers.extend(conv_bn_relu("block3", 16));
        layers.push(sigmoid_head(out_class));
        Self { name: "tiny_conv".into(), layers }
    }

    /// One conv-BN-ReLU block and the 1×1 sigmoid head.
    pub fn micro_conv(win_size: usize, out_class: usize) -> Self {
        let mut layers = vec![LayerSpec::Input { name: "input".into(), shape: [win_size, win_size, 3] }];
        layers.extend(conv_bn_relu("block1", 8));
        layers.push(sigmoid_head(out_class));
        Self { name: "micro_conv".into(), layers }
    }

    /// Fresh Glorot-uniform kernels, zero biases, identity batch norms.
    pub fn init_weights<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<WeightMap, CheckpointCorruptError> {
        let plan = self.plan()?;
        let mut weights = WeightMap::new();
        for p in plan.params {
            let numel = p
                .shape
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .ok_or_else(|| arch_err(format!("parameter '{}' of shape {:?} is too large", p.name, p.shape)))?;
            let data = match p.name.rsplit('.').next() {
                Some("kernel") => {
                    let receptive = p.shape[2] * p.shape[3];
                    let fan_in    = (p.shape[1] * receptive) as f64;
                    let fan_out   = (p.shape[0] * receptive) as f64;
                    let limit     = (6.0 / (fan_in + fan_out)).sqrt() as f32;
                    (0..numel).map(|_| rng.gen_range(-limit..=limit)).collect()
                }
                Some("gamma") | Some("moving_variance") => vec![1.0; numel],
                _ => vec![0.0; numel],
            };
            weights.insert(p.name, HostTensor { shape: p.shape, data });
        }
        Ok(weights)
    }
}

fn conv_bn_relu(prefix: &str, filters: usize) -> [LayerSpec; 3] {
    [
        LayerSpec::Conv2d {
            name:        format!("{prefix}_conv"),
            filters,
            kernel_size: 3,
            activation:  Activation::Linear,
        },
        LayerSpec::BatchNorm { name: format!("{prefix}_bn"), epsilon: DEFAULT_BN_EPSILON },
        LayerSpec::Activation { name: format!("{prefix}_relu"), activation: Activation::Relu },
    ]
}

fn sigmoid_head(out_class: usize) -> LayerSpec {
    LayerSpec::Conv2d {
        name:        "head".into(),
        filters:     out_class,
        kernel_size: 1,
        activation:  Activation::Sigmoid,
    }
}

// ─── Host weights and precision ───────────────────────────────────────────────

/// A weight tensor read from the blob, not yet on any device.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub shape: Vec<usize>,
    pub data:  Vec<f32>,
}

pub type WeightMap = BTreeMap<String, HostTensor>;

/// Numeric precision of bound weights. Passed explicitly into model
/// construction; compute always runs in f32.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Float32,
    /// Weights are rounded to IEEE half precision when bound.
    MixedFloat16,
}

impl Precision {
    pub fn quantize(self, data: &[f32]) -> Vec<f32> {
        match self {
            Self::Float32      => data.to_vec(),
            Self::MixedFloat16 => data.iter().map(|&v| half::f16::from_f32(v).to_f32()).collect(),
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32"       => Ok(Self::Float32),
            "mixed_float16" => Ok(Self::MixedFloat16),
            other           => Err(format!("unknown precision '{other}', expected float32 or mixed_float16")),
        }
    }
}

// ─── Modules ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    pub weight:  Param<Tensor<B, 4>>,
    pub bias:    Param<Tensor<B, 1>>,
    pub padding: usize,
}

impl<B: Backend> ConvLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let p = self.padding;
        conv2d(
            x,
            self.weight.val(),
            Some(self.bias.val()),
            ConvOptions::new([1, 1], [p, p], [1, 1], 1),
        )
    }
}

/// Batch normalisation that always normalises with the moving statistics.
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    pub gamma:           Param<Tensor<B, 1>>,
    pub beta:            Param<Tensor<B, 1>>,
    pub moving_mean:     RunningState<Tensor<B, 1>>,
    pub moving_variance: RunningState<Tensor<B, 1>>,
    pub epsilon:         f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let scale = self.gamma.val() / self.moving_variance.value().add_scalar(self.epsilon).sqrt();
        let shift = self.beta.val() - self.moving_mean.value() * scale.clone();
        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

fn take_weight(weights: &WeightMap, name: String) -> Result<&HostTensor, CheckpointCorruptError> {
    weights.get(&name).ok_or(CheckpointCorruptError::MissingWeight { name })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Conv { index: usize, activation: Activation },
    Norm(usize),
    Activate(Activation),
    Pool(usize),
    Upsample(usize),
}

#[derive(Module, Debug)]
pub struct SegmentationNet<B: Backend> {
    convs:     Vec<ConvLayer<B>>,
    norms:     Vec<FrozenBatchNorm<B>>,
    pools:     Vec<MaxPool2d>,
    upsamples: Vec<Interpolate2d>,
    plan:      Ignored<Vec<Node>>,
    win_size:  usize,
    out_channels: usize,
}

impl<B: Backend> SegmentationNet<B> {
    /// Bind `weights` onto the graph described by `spec`.
    ///
    /// The weight map must already match the architecture's parameter
    /// list; see `infra::checkpoint::check_weights`.
    pub fn build(
        spec:      &ArchSpec,
        weights:   &WeightMap,
        precision: Precision,
        device:    &B::Device,
    ) -> Result<Self, CheckpointCorruptError> {
        let arch = spec.plan()?;

        let take = |name: String| take_weight(weights, name);
        let vector = |t: &HostTensor| -> Tensor<B, 1> {
            Tensor::from_data(TensorData::new(precision.quantize(&t.data), [t.data.len()]), device)
        };

        let mut convs     = Vec::new();
        let mut norms     = Vec::new();
        let mut pools     = Vec::new();
        let mut upsamples = Vec::new();
        let mut plan      = Vec::new();

        for layer in spec.layers.iter().skip(1) {
            match layer {
                LayerSpec::Input { .. } => {}
                LayerSpec::Conv2d { name, kernel_size, activation, .. } => {
                    let kernel = take(format!("{name}.kernel"))?;
                    let bias   = take(format!("{name}.bias"))?;
                    let shape: [usize; 4] = kernel.shape.as_slice().try_into().map_err(|_| {
                        CheckpointCorruptError::ShapeMismatch {
                            name:     format!("{name}.kernel"),
                            expected: vec![0; 4],
                            found:    kernel.shape.clone(),
                        }
                    })?;
                    let weight = Tensor::<B, 4>::from_data(
                        TensorData::new(precision.quantize(&kernel.data), shape),
                        device,
                    );
                    plan.push(Node::Conv { index: convs.len(), activation: *activation });
                    convs.push(ConvLayer {
                        weight:  Param::from_tensor(weight),
                        bias:    Param::from_tensor(vector(bias)),
                        padding: kernel_size / 2,
                    });
                }
                LayerSpec::BatchNorm { name, epsilon } => {
                    plan.push(Node::Norm(norms.len()));
                    norms.push(FrozenBatchNorm {
                        gamma:           Param::from_tensor(vector(take(format!("{name}.gamma"))?)),
                        beta:            Param::from_tensor(vector(take(format!("{name}.beta"))?)),
                        moving_mean:     RunningState::new(vector(take(format!("{name}.moving_mean"))?)),
                        moving_variance: RunningState::new(vector(take(format!("{name}.moving_variance"))?)),
                        epsilon:         *epsilon,
                    });
                }
                LayerSpec::Activation { activation, .. } => plan.push(Node::Activate(*activation)),
                LayerSpec::MaxPool { pool_size, .. } => {
                    plan.push(Node::Pool(pools.len()));
                    pools.push(
                        MaxPool2dConfig::new([*pool_size, *pool_size])
                            .with_strides([*pool_size, *pool_size])
                            .init(),
                    );
                }
                LayerSpec::Upsample { size, .. } => {
                    let factor = *size as f32;
                    plan.push(Node::Upsample(upsamples.len()));
                    upsamples.push(
                        Interpolate2dConfig::new()
                            .with_scale_factor(Some([factor, factor]))
                            .with_mode(InterpolateMode::Nearest)
                            .init(),
                    );
                }
            }
        }

        Ok(Self {
            convs,
            norms,
            pools,
            upsamples,
            plan: Ignored(plan),
            win_size: arch.win_size(),
            out_channels: arch.out_channels,
        })
    }

    /// Side length of the square input window.
    pub fn win_size(&self) -> usize {
        self.win_size
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// images: [batch, win, win, 3] → per-pixel scores [batch, win, win, classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images.permute([0, 3, 1, 2]);
        for node in self.plan.iter() {
            x = match *node {
                Node::Conv { index, activation } => activation.apply(self.convs[index].forward(x)),
                Node::Norm(index)                => self.norms[index].forward(x),
                Node::Activate(activation)       => activation.apply(x),
                Node::Pool(index)                => self.pools[index].forward(x),
                Node::Upsample(index)            => self.upsamples[index].forward(x),
            };
        }
        x.permute([0, 2, 3, 1])
    }
}
