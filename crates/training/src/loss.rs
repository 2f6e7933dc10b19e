//! Loss strategies (combined label vs. per-attribute heads) and criteria.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use burn_dataset::BatchLabels;
use clap::ValueEnum;
use data_contracts::{MultiLabel, HEAD_WIDTHS, NUM_CLASSES};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AGE_WEIGHT: f32 = 1.5;
pub const LABEL_SMOOTHING: f32 = 0.1;
pub const FOCAL_GAMMA: f32 = 2.0;

/// Per-sample classification criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    #[default]
    CrossEntropy,
    LabelSmoothing,
    Focal,
}

impl Criterion {
    pub fn name(self) -> &'static str {
        match self {
            Criterion::CrossEntropy => "cross-entropy",
            Criterion::LabelSmoothing => "label-smoothing",
            Criterion::Focal => "focal",
        }
    }

    /// Mean loss over the batch, shape `[1]`.
    pub fn forward<B: Backend>(self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let device = logits.device();
        match self {
            Criterion::CrossEntropy => CrossEntropyLossConfig::new()
                .init(&device)
                .forward(logits, targets),
            Criterion::LabelSmoothing => CrossEntropyLossConfig::new()
                .with_smoothing(Some(LABEL_SMOOTHING))
                .init(&device)
                .forward(logits, targets),
            Criterion::Focal => focal_loss(logits, targets, FOCAL_GAMMA),
        }
    }
}

/// `-(1 - p_t)^gamma * log(p_t)`, averaged over the batch.
fn focal_loss<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>, gamma: f32) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let log_p = log_softmax(logits, 1);
    let log_pt = log_p.gather(1, targets.reshape([n, 1]));
    let weight = log_pt.clone().exp().neg().add_scalar(1.0).powf_scalar(gamma);
    (weight * log_pt).neg().mean()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Combined,
    MultiHead,
}

/// How model outputs relate to labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossStrategy {
    /// One 18-way output over the combined label.
    Combined,
    /// Three heads (mask, gender, age) concatenated into 8 outputs.
    MultiHead { age_weight: f32 },
}

impl From<StrategyKind> for LossStrategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Combined => LossStrategy::Combined,
            StrategyKind::MultiHead => LossStrategy::MultiHead {
                age_weight: DEFAULT_AGE_WEIGHT,
            },
        }
    }
}

/// Loss of one batch. `heads` is set for the multi-head strategy.
pub struct LossOutput<B: Backend> {
    /// Weighted objective used for backpropagation.
    pub total: Tensor<B, 1>,
    /// Unweighted sum reported for validation.
    pub report: Tensor<B, 1>,
    pub heads: Option<[Tensor<B, 1>; 3]>,
}

impl LossStrategy {
    pub fn name(self) -> &'static str {
        match self {
            LossStrategy::Combined => "combined",
            LossStrategy::MultiHead { .. } => "multi-head",
        }
    }

    pub fn num_outputs(self) -> usize {
        match self {
            LossStrategy::Combined => NUM_CLASSES,
            LossStrategy::MultiHead { .. } => HEAD_WIDTHS.iter().sum(),
        }
    }

    pub fn loss<B: Backend>(
        self,
        criterion: Criterion,
        logits: Tensor<B, 2>,
        labels: &BatchLabels<B>,
    ) -> LossOutput<B> {
        match self {
            LossStrategy::Combined => {
                let total = criterion.forward(logits, labels.combined.clone());
                LossOutput {
                    report: total.clone(),
                    total,
                    heads: None,
                }
            }
            LossStrategy::MultiHead { age_weight } => {
                let [mask, gender, age] = split_heads(logits);
                let mask = criterion.forward(mask, labels.mask.clone());
                let gender = criterion.forward(gender, labels.gender.clone());
                let age = criterion.forward(age, labels.age.clone());
                let report = mask.clone() + gender.clone() + age.clone();
                let total = mask.clone() + gender.clone() + age.clone().mul_scalar(age_weight);
                LossOutput {
                    total,
                    report,
                    heads: Some([mask, gender, age]),
                }
            }
        }
    }

    /// Combined-class probabilities `[batch, 18]`.
    ///
    /// For heads, the per-head softmaxes are multiplied out so that column
    /// `mask * 6 + gender * 3 + age` holds the joint probability.
    pub fn class_probabilities<B: Backend>(self, logits: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            LossStrategy::Combined => softmax(logits, 1),
            LossStrategy::MultiHead { .. } => {
                let [n, _] = logits.dims();
                let [mask, gender, age] = split_heads(logits);
                let [wm, wg, wa] = HEAD_WIDTHS;
                let mask = softmax(mask, 1).reshape([n, wm, 1, 1]);
                let gender = softmax(gender, 1).reshape([n, 1, wg, 1]);
                let age = softmax(age, 1).reshape([n, 1, 1, wa]);
                (mask * gender * age).reshape([n, NUM_CLASSES])
            }
        }
    }

    /// Predicted combined ids for every row of `logits`.
    pub fn predict<B: Backend>(self, logits: Tensor<B, 2>) -> anyhow::Result<Vec<u8>> {
        match self {
            LossStrategy::Combined => Ok(argmax_host(logits)?
                .into_iter()
                .map(|c| c as u8)
                .collect()),
            LossStrategy::MultiHead { .. } => {
                let [mask, gender, age] = split_heads(logits);
                let (mask, gender, age) = (argmax_host(mask)?, argmax_host(gender)?, argmax_host(age)?);
                mask.iter()
                    .zip(&gender)
                    .zip(&age)
                    .map(|((&m, &g), &a)| {
                        MultiLabel::from_indices(m as u8, g as u8, a as u8)
                            .map(MultiLabel::encode)
                            .map_err(anyhow::Error::from)
                    })
                    .collect()
            }
        }
    }
}

/// Slice `[batch, 8]` head logits into mask `[.., 3]`, gender `[.., 2]` and age `[.., 3]`.
pub fn split_heads<B: Backend>(logits: Tensor<B, 2>) -> [Tensor<B, 2>; 3] {
    let [n, _] = logits.dims();
    let [wm, wg, wa] = HEAD_WIDTHS;
    [
        logits.clone().slice([0..n, 0..wm]),
        logits.clone().slice([0..n, wm..wm + wg]),
        logits.slice([0..n, wm + wg..wm + wg + wa]),
    ]
}

pub fn argmax_host<B: Backend>(logits: Tensor<B, 2>) -> anyhow::Result<Vec<i64>> {
    logits
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("failed to read predictions: {e:?}"))
}

/// Number of rows whose predicted id equals the label.
pub fn count_correct(predicted: &[u8], labels: &[MultiLabel]) -> usize {
    predicted
        .iter()
        .zip(labels)
        .filter(|(p, l)| **p == l.encode())
        .count()
}

/// Per-head correct counts (mask, gender, age).
pub fn count_correct_heads(predicted: &[u8], labels: &[MultiLabel]) -> [usize; 3] {
    let mut out = [0usize; 3];
    for (p, l) in predicted.iter().zip(labels) {
        let Some(pred) = MultiLabel::decode(*p) else {
            continue;
        };
        out[0] += usize::from(pred.mask == l.mask);
        out[1] += usize::from(pred.gender == l.gender);
        out[2] += usize::from(pred.age == l.age);
    }
    out
}
