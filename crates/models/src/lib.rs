//! Burn classifier modules for mask/gender/age prediction.
//!
//! - `BaseModel`: three-conv network with dropout and global average pooling.
//! - `TinyModel`: single conv layer, used for smoke runs and tests.
//!
//! Both map `[B, 3, H, W]` images to `[B, num_outputs]` logits. Callers pick
//! `num_outputs` (18 for the combined label, 8 for the concatenated heads).

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Image classifier producing raw logits.
pub trait Classifier<B: Backend>: Module<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn num_outputs(&self) -> usize;
}

/// Closed set of architectures selectable by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    #[default]
    Base,
    Tiny,
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" | "basemodel" => Ok(Self::Base),
            "tiny" => Ok(Self::Tiny),
            other => Err(format!("unknown model '{other}' (expected base|tiny)")),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::Tiny => "tiny",
        })
    }
}

#[derive(Debug, Clone)]
pub struct BaseModelConfig {
    pub num_outputs: usize,
    pub dropout: f64,
}

impl Default for BaseModelConfig {
    fn default() -> Self {
        Self {
            num_outputs: 18,
            dropout: 0.25,
        }
    }
}

#[derive(Debug, Module)]
pub struct BaseModel<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    dropout1: nn::Dropout,
    dropout2: nn::Dropout,
    avgpool: AdaptiveAvgPool2d,
    fc: nn::Linear<B>,
    num_outputs: usize,
}

impl<B: Backend> BaseModel<B> {
    pub fn new(cfg: BaseModelConfig, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 32], [7, 7]).init(device);
        let conv2 = Conv2dConfig::new([32, 64], [3, 3]).init(device);
        let conv3 = Conv2dConfig::new([64, 128], [3, 3]).init(device);
        Self {
            conv1,
            conv2,
            conv3,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout1: nn::DropoutConfig::new(cfg.dropout).init(),
            dropout2: nn::DropoutConfig::new(cfg.dropout).init(),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: nn::LinearConfig::new(128, cfg.num_outputs).init(device),
            num_outputs: cfg.num_outputs,
        }
    }
}

impl<B: Backend> Classifier<B> for BaseModel<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.dropout1.forward(self.pool.forward(x));
        let x = relu(self.conv3.forward(x));
        let x = self.dropout2.forward(self.pool.forward(x));
        let x = self.avgpool.forward(x).flatten::<2>(1, 3);
        self.fc.forward(x)
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

#[derive(Debug, Clone)]
pub struct TinyModelConfig {
    pub num_outputs: usize,
    pub channels: usize,
}

impl Default for TinyModelConfig {
    fn default() -> Self {
        Self {
            num_outputs: 18,
            channels: 8,
        }
    }
}

#[derive(Debug, Module)]
pub struct TinyModel<B: Backend> {
    stem: Conv2d<B>,
    avgpool: AdaptiveAvgPool2d,
    head: nn::Linear<B>,
    num_outputs: usize,
}

impl<B: Backend> TinyModel<B> {
    pub fn new(cfg: TinyModelConfig, device: &B::Device) -> Self {
        let stem = Conv2dConfig::new([3, cfg.channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        Self {
            stem,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: nn::LinearConfig::new(cfg.channels, cfg.num_outputs).init(device),
            num_outputs: cfg.num_outputs,
        }
    }
}

impl<B: Backend> Classifier<B> for TinyModel<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.stem.forward(images));
        let x = self.avgpool.forward(x).flatten::<2>(1, 3);
        self.head.forward(x)
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

pub mod prelude {
    pub use super::{
        BaseModel, BaseModelConfig, Classifier, ModelKind, TinyModel, TinyModelConfig,
    };
    pub use burn::tensor::backend::Backend;
}
