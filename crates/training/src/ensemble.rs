//! Test-time augmentation and the out-of-fold average.

use crate::loss::LossStrategy;
use anyhow::{bail, Context};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use burn_dataset::BatchIter;
use models::Classifier;

/// Running mean of per-fold class scores, `rows x cols`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct OofAccumulator {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    folds_added: usize,
}

impl OofAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
            folds_added: 0,
        }
    }

    pub fn folds_added(&self) -> usize {
        self.folds_added
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Add `pred / k` element-wise.
    pub fn add_fold(&mut self, pred: &[f32], k: usize) -> anyhow::Result<()> {
        if pred.len() != self.data.len() {
            bail!(
                "fold prediction has {} values, expected {}x{}",
                pred.len(),
                self.rows,
                self.cols
            );
        }
        if k == 0 {
            bail!("fold count must be positive");
        }
        let scale = 1.0 / k as f32;
        for (acc, p) in self.data.iter_mut().zip(pred) {
            *acc += p * scale;
        }
        self.folds_added += 1;
        Ok(())
    }

    /// Column of the largest score in every row; ties go to the lowest index.
    pub fn argmax_rows(&self) -> Vec<u8> {
        argmax_rows(&self.data, self.cols)
    }
}

pub fn argmax_rows(data: &[f32], cols: usize) -> Vec<u8> {
    data.chunks(cols.max(1))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0 as u8
        })
        .collect()
}

/// Logits averaged over the image and its horizontal mirror.
pub fn tta_logits<B: Backend, M: Classifier<B>>(model: &M, images: Tensor<B, 4>) -> Tensor<B, 2> {
    let flipped = images.clone().flip([3]);
    (model.forward(images) + model.forward(flipped)).div_scalar(2.0)
}

/// Class probabilities `[n, 18]` for every item of `iter`, flattened row-major.
pub fn predict_probabilities<B: Backend, M: Classifier<B>>(
    model: &M,
    strategy: LossStrategy,
    iter: &mut BatchIter,
    device: &B::Device,
) -> anyhow::Result<Vec<f32>> {
    iter.reshuffle(0);
    let mut out = Vec::with_capacity(iter.len() * data_contracts::NUM_CLASSES);
    while let Some(batch) = iter
        .next_batch::<B>(device)
        .context("loading test batch")?
    {
        let probs = strategy.class_probabilities(tta_logits(model, batch.images));
        let values = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read probabilities: {e:?}"))?;
        out.extend(values);
    }
    Ok(out)
}
