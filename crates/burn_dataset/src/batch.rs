//! Batch iteration for training, validation and test images.

use crate::aug::TransformPipeline;
use crate::types::{DatasetError, DatasetResult, Sample};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use data_contracts::MultiLabel;
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One image to load; `label` is `None` for test images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub path: PathBuf,
    pub label: Option<MultiLabel>,
    /// Stable per-sample key mixed into the augmentation seed.
    pub key: u64,
}

impl BatchItem {
    pub fn from_samples(samples: &[Sample], indices: &[usize]) -> Vec<BatchItem> {
        indices
            .iter()
            .filter_map(|&i| samples.get(i).map(|s| (i, s)))
            .map(|(i, s)| BatchItem {
                path: s.image.clone(),
                label: Some(s.label),
                key: i as u64,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Drop the trailing partial batch.
    pub drop_last: bool,
    pub seed: u64,
}

impl BatchConfig {
    pub fn train(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: true,
            seed,
        }
    }

    /// Sequential order, partial last batch kept.
    pub fn eval(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Label tensors of one batch, per head and combined, plus a host copy.
pub struct BatchLabels<B: Backend> {
    pub mask: Tensor<B, 1, Int>,
    pub gender: Tensor<B, 1, Int>,
    pub age: Tensor<B, 1, Int>,
    pub combined: Tensor<B, 1, Int>,
    pub host: Vec<MultiLabel>,
}

pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, height, width]`.
    pub images: Tensor<B, 4>,
    pub labels: Option<BatchLabels<B>>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode workers for a batch: half the available cores, at least one.
pub fn default_decode_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).max(1)
}

pub fn build_decode_pool(threads: usize) -> DatasetResult<Arc<rayon::ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("decode-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| DatasetError::Other(format!("failed to build decode thread pool: {e}")))
}

pub struct BatchIter {
    items: Vec<BatchItem>,
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    cfg: BatchConfig,
    pipeline: TransformPipeline,
    pool: Arc<rayon::ThreadPool>,
    processed_batches: usize,
    total_load_time: Duration,
    images_buf: Vec<f32>,
}

impl BatchIter {
    pub fn new(
        items: Vec<BatchItem>,
        pipeline: TransformPipeline,
        cfg: BatchConfig,
        pool: Arc<rayon::ThreadPool>,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::Other("batch_size must be positive".into()));
        }
        let mut iter = Self {
            order: (0..items.len()).collect(),
            items,
            cursor: 0,
            epoch: 0,
            cfg,
            pipeline,
            pool,
            processed_batches: 0,
            total_load_time: Duration::ZERO,
            images_buf: Vec::new(),
        };
        iter.reshuffle(0);
        Ok(iter)
    }

    /// Rewind for `epoch`; with shuffling on, the order is drawn from `seed + epoch`.
    pub fn reshuffle(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.cursor = 0;
        self.order = (0..self.items.len()).collect();
        if self.cfg.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.cfg.seed.wrapping_add(epoch));
            self.order.shuffle(&mut rng);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Batches one pass yields, honouring `drop_last`.
    pub fn num_batches(&self) -> usize {
        let n = self.items.len();
        let b = self.cfg.batch_size;
        if self.cfg.drop_last {
            n / b
        } else {
            n.div_ceil(b)
        }
    }

    /// Item indices in the current pass order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ImageBatch<B>>> {
        let remaining = self.order.len() - self.cursor;
        if remaining == 0 || (self.cfg.drop_last && remaining < self.cfg.batch_size) {
            return Ok(None);
        }
        let end = (self.cursor + self.cfg.batch_size).min(self.order.len());
        let slice = &self.order[self.cursor..end];
        self.cursor = end;

        let t_load = Instant::now();
        let items = &self.items;
        let pipeline = &self.pipeline;
        let salt_base = self.epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut loaded: Vec<(usize, DatasetResult<Vec<f32>>)> = self.pool.install(|| {
            slice
                .par_iter()
                .enumerate()
                .map(|(pos, &i)| {
                    let item = &items[i];
                    (pos, pipeline.load(&item.path, item.key ^ salt_base))
                })
                .collect()
        });
        loaded.sort_by_key(|(pos, _)| *pos);
        self.total_load_time += t_load.elapsed();

        self.images_buf.clear();
        let (height, width) = self.pipeline.resize;
        let batch_len = slice.len();
        self.images_buf
            .reserve(batch_len * 3 * height as usize * width as usize);
        for (_, res) in loaded {
            self.images_buf.extend_from_slice(&res?);
        }
        let images = Tensor::<B, 1>::from_floats(self.images_buf.as_slice(), device).reshape([
            batch_len,
            3,
            height as usize,
            width as usize,
        ]);

        let host: Option<Vec<MultiLabel>> = slice.iter().map(|&i| self.items[i].label).collect();
        let labels = host.map(|host| label_tensors::<B>(host, device));

        self.processed_batches += 1;
        tracing::trace!(
            batch = self.processed_batches,
            size = batch_len,
            load_ms = self.total_load_time.as_millis() as u64,
            "assembled batch"
        );
        Ok(Some(ImageBatch { images, labels }))
    }
}

fn int_tensor<B: Backend>(values: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = values.len();
    Tensor::from_data(TensorData::new(values, [len]), device)
}

fn label_tensors<B: Backend>(host: Vec<MultiLabel>, device: &B::Device) -> BatchLabels<B> {
    let column = |f: fn(&MultiLabel) -> i64| host.iter().map(f).collect::<Vec<i64>>();
    BatchLabels {
        mask: int_tensor(column(|l| l.mask as i64), device),
        gender: int_tensor(column(|l| l.gender as i64), device),
        age: int_tensor(column(|l| l.age as i64), device),
        combined: int_tensor(column(|l| l.encode() as i64), device),
        host,
    }
}
