//! The K-fold loop: per-fold training with accumulation, validation with early
//! stopping, and TTA prediction of the test set with the fold's last weights.

use crate::accumulate::AccumulationSchedule;
use crate::checkpoint::{increment_path, CheckpointKind, FoldCheckpoints};
use crate::config::{OptimizerKind, TrainConfig};
use crate::early_stop::{EarlyStopping, RunningBest};
use crate::ensemble::{predict_probabilities, OofAccumulator};
use crate::loss::{count_correct, count_correct_heads, Criterion, LossStrategy};
use crate::metrics::{MetricMap, MetricsSink, Stage, TrainWindow};
use crate::schedule::StepDecay;
use anyhow::Context;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{
    AdamConfig, AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer, SgdConfig,
};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use burn_dataset::{
    build_decode_pool, default_decode_threads, index_profiles, BatchConfig, BatchItem, BatchIter,
    DatasetKind, FoldSplit, ProfileDataset, StratifiedKFold, TestSet, TransformPipeline,
};
use data_contracts::{write_submission, RunManifest, RunManifestSchemaVersion, NUM_CLASSES};
use models::{BaseModel, BaseModelConfig, Classifier, ModelKind, TinyModel, TinyModelConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub const WEIGHT_DECAY: f32 = 5e-4;

/// Validation metrics of one attribute head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadReport {
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidReport {
    /// Mean over batches of the (unweighted) loss.
    pub loss: f32,
    /// Correct predictions over validation samples.
    pub accuracy: f32,
    pub samples: usize,
    /// Mask, gender and age, for the multi-head strategy.
    pub heads: Option<[HeadReport; 3]>,
}

impl ValidReport {
    fn to_metrics(self) -> MetricMap {
        let mut m = MetricMap::from([
            ("valid_loss".to_string(), f64::from(self.loss)),
            ("valid_acc".to_string(), f64::from(self.accuracy)),
        ]);
        if let Some(heads) = self.heads {
            for (name, head) in ["mask", "gender", "age"].iter().zip(heads) {
                m.insert(format!("valid_{name}_loss"), f64::from(head.loss));
                m.insert(format!("valid_{name}_acc"), f64::from(head.accuracy));
            }
        }
        m
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    pub fold: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub best: RunningBest,
    pub optimizer_steps: usize,
    pub train_samples: usize,
    pub valid_samples: usize,
}

#[derive(Debug, Clone)]
pub struct KFoldSummary {
    pub run_dir: PathBuf,
    pub folds: Vec<FoldOutcome>,
    pub labels: Vec<u8>,
    pub submission: PathBuf,
}

/// Everything a fold needs besides the model and optimizer.
struct FoldContext<'a> {
    cfg: &'a TrainConfig,
    fold: usize,
    split: &'a FoldSplit,
    dataset: &'a ProfileDataset,
    test_set: &'a TestSet,
    pool: Arc<rayon::ThreadPool>,
    run_dir: &'a Path,
    strategy: LossStrategy,
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

/// Validation runs at the training batch size.
fn valid_batches(cfg: &TrainConfig) -> BatchConfig {
    BatchConfig::eval(cfg.batch_size)
}

/// `valid_batch_size` only batches the test set.
fn test_batches(cfg: &TrainConfig) -> BatchConfig {
    BatchConfig::eval(cfg.valid_batch_size)
}

fn check_outputs<B: Backend, M: Classifier<B>>(model: &M, strategy: LossStrategy) -> anyhow::Result<()> {
    if model.num_outputs() != strategy.num_outputs() {
        anyhow::bail!(
            "model has {} outputs but the {} strategy needs {}",
            model.num_outputs(),
            strategy.name(),
            strategy.num_outputs()
        );
    }
    Ok(())
}

pub fn make_folds(cfg: &TrainConfig, dataset: &ProfileDataset) -> anyhow::Result<Vec<FoldSplit>> {
    let splitter = StratifiedKFold::new(cfg.folds).with_seed(cfg.seed);
    let labels = dataset.combined_labels();
    let folds = match cfg.dataset {
        DatasetKind::MaskBase => splitter.split(&labels)?,
        DatasetKind::SplitByProfile => splitter.split_grouped(&labels, &dataset.profile_ids())?,
    };
    Ok(folds)
}

fn write_run_manifest(cfg: &TrainConfig, strategy: LossStrategy, run_dir: &Path) -> anyhow::Result<PathBuf> {
    let started_at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let manifest = RunManifest {
        schema_version: RunManifestSchemaVersion::V1,
        seed: cfg.seed,
        folds: cfg.folds,
        model: cfg.model.to_string(),
        strategy: strategy.name().to_string(),
        criterion: cfg.criterion.name().to_string(),
        resize: cfg.resize,
        mean: cfg.normalization.mean,
        std: cfg.normalization.std,
        run_dir: run_dir.to_path_buf(),
        started_at_unix,
    };
    manifest.validate()?;
    Ok(manifest.write(run_dir)?)
}

/// Train `cfg.folds` models, ensemble their test predictions and write the submission.
pub fn run_kfold<B: AutodiffBackend>(
    cfg: &TrainConfig,
    device: &B::Device,
    sink: &mut dyn MetricsSink,
) -> anyhow::Result<KFoldSummary> {
    B::seed(cfg.seed);
    let dataset = index_profiles(&cfg.paths.data_dir)
        .with_context(|| format!("indexing training data at {}", cfg.paths.data_dir.display()))?;
    let test_set = TestSet::load(&cfg.paths.eval_dir)
        .with_context(|| format!("loading test set at {}", cfg.paths.eval_dir.display()))?;
    let folds = make_folds(cfg, &dataset)?;
    debug!(class_counts = ?dataset.class_counts(), "indexed training profiles");

    let run_dir = increment_path(&cfg.paths.model_dir.join(&cfg.name))?;
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating run dir {}", run_dir.display()))?;
    let strategy = LossStrategy::from(cfg.strategy);
    write_run_manifest(cfg, strategy, &run_dir)?;
    info!(
        run_dir = %run_dir.display(),
        samples = dataset.len(),
        test_images = test_set.len(),
        folds = folds.len(),
        model = %cfg.model,
        strategy = strategy.name(),
        "starting k-fold training"
    );

    let pool = build_decode_pool(default_decode_threads())?;
    let mut oof = OofAccumulator::new(test_set.len(), NUM_CLASSES);
    let mut outcomes = Vec::with_capacity(folds.len());
    for (fold, split) in folds.iter().enumerate() {
        let ctx = FoldContext {
            cfg,
            fold,
            split,
            dataset: &dataset,
            test_set: &test_set,
            pool: pool.clone(),
            run_dir: &run_dir,
            strategy,
        };
        let num_outputs = strategy.num_outputs();
        let (outcome, probs) = match cfg.model {
            ModelKind::Base => with_optimizer::<B, _, _>(&ctx, sink, device, |d| {
                BaseModel::<B>::new(
                    BaseModelConfig {
                        num_outputs,
                        ..Default::default()
                    },
                    d,
                )
            })?,
            ModelKind::Tiny => with_optimizer::<B, _, _>(&ctx, sink, device, |d| {
                TinyModel::<B>::new(
                    TinyModelConfig {
                        num_outputs,
                        ..Default::default()
                    },
                    d,
                )
            })?,
        };
        oof.add_fold(&probs, folds.len())?;
        outcomes.push(outcome);
    }

    let labels = oof.argmax_rows();
    let submission = write_submission(&cfg.submission_path(), &test_set.manifest, &labels)?;
    info!(
        path = %submission.display(),
        rows = labels.len(),
        folds = oof.folds_added(),
        "test inference is done"
    );
    Ok(KFoldSummary {
        run_dir,
        folds: outcomes,
        labels,
        submission,
    })
}

fn with_optimizer<B, M, F>(
    ctx: &FoldContext<'_>,
    sink: &mut dyn MetricsSink,
    device: &B::Device,
    build: F,
) -> anyhow::Result<(FoldOutcome, Vec<f32>)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    F: Fn(&B::Device) -> M,
{
    let model = build(device);
    check_outputs::<B, M>(&model, ctx.strategy)?;
    let decay = Some(WeightDecayConfig::new(WEIGHT_DECAY));
    match ctx.cfg.optimizer {
        OptimizerKind::Sgd => {
            let optim = SgdConfig::new().with_weight_decay(decay).init::<B, M>();
            fit_fold(ctx, sink, device, model, optim)
        }
        OptimizerKind::Adam => {
            let optim = AdamConfig::new().with_weight_decay(decay).init::<B, M>();
            fit_fold(ctx, sink, device, model, optim)
        }
        OptimizerKind::AdamW => {
            let optim = AdamWConfig::new()
                .with_weight_decay(WEIGHT_DECAY)
                .init::<B, M>();
            fit_fold(ctx, sink, device, model, optim)
        }
    }
}

fn fit_fold<B, M, O>(
    ctx: &FoldContext<'_>,
    sink: &mut dyn MetricsSink,
    device: &B::Device,
    mut model: M,
    mut optim: O,
) -> anyhow::Result<(FoldOutcome, Vec<f32>)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    M::InnerModule: Classifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let cfg = ctx.cfg;
    let fold = ctx.fold;
    let strategy = ctx.strategy;
    let train_pipeline =
        TransformPipeline::for_training(cfg.augmentation, cfg.resize, cfg.normalization, cfg.seed);
    let eval_pipeline = TransformPipeline::eval(cfg.resize, cfg.normalization);
    let fold_seed = cfg.seed.wrapping_add((fold as u64) << 32);
    let mut train_iter = BatchIter::new(
        BatchItem::from_samples(&ctx.dataset.samples, &ctx.split.train),
        train_pipeline,
        BatchConfig::train(cfg.batch_size, fold_seed),
        ctx.pool.clone(),
    )?;
    let mut valid_iter = BatchIter::new(
        BatchItem::from_samples(&ctx.dataset.samples, &ctx.split.valid),
        eval_pipeline.clone(),
        valid_batches(cfg),
        ctx.pool.clone(),
    )?;
    if train_iter.num_batches() == 0 {
        anyhow::bail!(
            "fold {fold}: {} training samples is less than one batch of {}",
            train_iter.len(),
            cfg.batch_size
        );
    }
    let checkpoints = FoldCheckpoints::create(ctx.run_dir, fold)?;
    let schedule = AccumulationSchedule::new(cfg.accumulation_steps);
    info!(
        fold,
        train = train_iter.len(),
        valid = valid_iter.len(),
        steps_per_epoch = schedule.steps_per_epoch(train_iter.num_batches()),
        checkpoints = %checkpoints.dir().display(),
        pipeline = %train_pipeline_summary(cfg),
        "fold start"
    );
    let decay = StepDecay::new(cfg.lr, cfg.lr_decay_step);
    let mut stopper = EarlyStopping::new(cfg.patience, cfg.reset_policy);
    let mut accumulator = GradientsAccumulator::<M>::new();
    let mut optimizer_steps = 0usize;
    let mut epochs_run = 0usize;
    let mut stopped_early = false;
    let num_batches = train_iter.num_batches();

    for epoch in 0..cfg.epochs {
        let started = Instant::now();
        let lr = decay.lr_at(epoch);
        train_iter.reshuffle(epoch as u64);
        let mut window = TrainWindow::default();
        let mut reported: Option<TrainWindow> = None;
        let mut idx = 0usize;
        while let Some(batch) = train_iter.next_batch::<B>(device)? {
            let labels = batch
                .labels
                .context("training batch is missing labels")?;
            let logits = model.forward(batch.images);
            let predicted = strategy.predict(logits.clone().detach())?;
            let loss = strategy.loss(cfg.criterion, logits, &labels).total;
            let loss_value = scalar(loss.clone().detach());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            accumulator.accumulate::<B>(&model, grads);
            if schedule.should_step(idx) {
                model = optim.step(lr, model, accumulator.grads());
                optimizer_steps += 1;
            }

            window.push(
                loss_value,
                count_correct(&predicted, &labels.host),
                labels.host.len(),
            );
            if window.is_full(cfg.log_interval) {
                info!(
                    "Epoch[{epoch}/{}]({}/{num_batches}) || training loss {:.4} || training accuracy {:.2}% || lr {lr:e}",
                    cfg.epochs,
                    idx + 1,
                    window.mean_loss(),
                    window.accuracy() * 100.0,
                );
                reported = Some(window.take());
            }
            idx += 1;
        }
        let mut train_metrics = reported.unwrap_or(window).to_metrics();
        train_metrics.insert("lr".to_string(), lr);
        sink.record(fold, epoch, Stage::Train, &train_metrics)?;

        let report = evaluate::<B::InnerBackend, M::InnerModule>(
            &model.valid(),
            &mut valid_iter,
            strategy,
            cfg.criterion,
            device,
        )?;
        let verdict = stopper.observe(report.accuracy, report.loss);
        if verdict.improved {
            info!(fold, epoch, "new best model for val accuracy, saving");
            checkpoints.save::<B, M>(&model, CheckpointKind::Best)?;
        } else {
            info!(
                fold,
                epoch,
                counter = stopper.best().stall_counter,
                "val accuracy not improved"
            );
        }
        checkpoints.save::<B, M>(&model, CheckpointKind::Last)?;
        let best = *stopper.best();
        info!(
            "[Val] acc : {:.2}%, loss: {:.4} || best acc : {:.2}%, best loss: {:.4}",
            report.accuracy * 100.0,
            report.loss,
            best.best_val_accuracy * 100.0,
            best.best_val_loss,
        );
        if let Some([mask, gender, age]) = report.heads {
            debug!(
                mask_acc = mask.accuracy,
                gender_acc = gender.accuracy,
                age_acc = age.accuracy,
                "per-head validation"
            );
        }
        sink.record(fold, epoch, Stage::Valid, &report.to_metrics())?;
        epochs_run = epoch + 1;
        debug!(fold, epoch, elapsed_ms = started.elapsed().as_millis() as u64, "epoch done");
        if verdict.stop {
            info!(fold, epoch, "early stopping");
            stopped_early = true;
            break;
        }
    }

    let mut test_iter = BatchIter::new(
        ctx.test_set.items(),
        eval_pipeline,
        test_batches(cfg),
        ctx.pool.clone(),
    )?;
    let probs = predict_probabilities::<B::InnerBackend, M::InnerModule>(
        &model.valid(),
        strategy,
        &mut test_iter,
        device,
    )?;
    let outcome = FoldOutcome {
        fold,
        epochs_run,
        stopped_early,
        best: *stopper.best(),
        optimizer_steps,
        train_samples: train_iter.len(),
        valid_samples: valid_iter.len(),
    };
    info!(fold, epochs = epochs_run, steps = optimizer_steps, "fold done");
    Ok((outcome, probs))
}

fn train_pipeline_summary(cfg: &TrainConfig) -> String {
    format!(
        "{} {}",
        cfg.augmentation,
        TransformPipeline::for_training(cfg.augmentation, cfg.resize, cfg.normalization, cfg.seed)
            .describe()
    )
}

/// Run `model` over every batch of `iter` without gradient tracking.
///
/// Loss is averaged over batches, accuracy over samples.
pub fn evaluate<B: Backend, M: Classifier<B>>(
    model: &M,
    iter: &mut BatchIter,
    strategy: LossStrategy,
    criterion: Criterion,
    device: &B::Device,
) -> anyhow::Result<ValidReport> {
    iter.reshuffle(0);
    let mut loss_sum = 0.0f64;
    let mut head_loss = [0.0f64; 3];
    let mut correct = 0usize;
    let mut head_correct = [0usize; 3];
    let mut samples = 0usize;
    let mut batches = 0usize;
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let labels = batch
            .labels
            .context("validation batch is missing labels")?;
        let logits = model.forward(batch.images);
        let out = strategy.loss(criterion, logits.clone(), &labels);
        loss_sum += f64::from(scalar(out.report));
        if let Some(heads) = out.heads {
            for (acc, h) in head_loss.iter_mut().zip(heads) {
                *acc += f64::from(scalar(h));
            }
        }
        let predicted = strategy.predict(logits)?;
        correct += count_correct(&predicted, &labels.host);
        for (acc, c) in head_correct
            .iter_mut()
            .zip(count_correct_heads(&predicted, &labels.host))
        {
            *acc += c;
        }
        samples += labels.host.len();
        batches += 1;
    }
    if batches == 0 {
        anyhow::bail!("validation split is empty");
    }
    let heads = matches!(strategy, LossStrategy::MultiHead { .. }).then(|| {
        std::array::from_fn(|i| HeadReport {
            loss: (head_loss[i] / batches as f64) as f32,
            accuracy: head_correct[i] as f32 / samples as f32,
        })
    });
    Ok(ValidReport {
        loss: (loss_sum / batches as f64) as f32,
        accuracy: correct as f32 / samples as f32,
        samples,
        heads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::module::{Module, Param};
    use burn::tensor::TensorData;
    use burn_dataset::Normalization;
    use data_contracts::MultiLabel;
    use image::{Rgb, RgbImage};

    type B = NdArray<f32>;

    /// Emits the same logits for every image.
    #[derive(Module, Debug)]
    struct ConstantLogits<B: Backend> {
        logits: Param<Tensor<B, 1>>,
    }

    impl<B: Backend> Classifier<B> for ConstantLogits<B> {
        fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            let [n, ..] = images.dims();
            let c = self.num_outputs();
            self.logits.val().reshape([1, c]).repeat_dim(0, n)
        }

        fn num_outputs(&self) -> usize {
            self.logits.val().dims()[0]
        }
    }

    fn constant(values: &[f32]) -> ConstantLogits<B> {
        let device = Default::default();
        let logits = Tensor::from_data(TensorData::new(values.to_vec(), [values.len()]), &device);
        ConstantLogits {
            logits: Param::from_tensor(logits),
        }
    }

    // Combined ids 0, 0, 0, 5, 17, 0, 3: at batch size 5 the second batch holds two samples.
    const IDS: [u8; 7] = [0, 0, 0, 5, 17, 0, 3];

    fn labelled_iter(dir: &Path) -> anyhow::Result<BatchIter> {
        let mut items = Vec::with_capacity(IDS.len());
        for (i, &id) in IDS.iter().enumerate() {
            let path = dir.join(format!("{i}.png"));
            RgbImage::from_pixel(4, 4, Rgb([i as u8 * 30, 80, 160])).save(&path)?;
            items.push(BatchItem {
                path,
                label: Some(MultiLabel::decode(id).context("id in range")?),
                key: i as u64,
            });
        }
        Ok(BatchIter::new(
            items,
            TransformPipeline::eval((4, 4), Normalization::default()),
            BatchConfig::eval(5),
            build_decode_pool(1)?,
        )?)
    }

    fn close(actual: f32, expected: f32) {
        assert!((actual - expected).abs() < 1e-5, "{actual} != {expected}");
    }

    #[test]
    fn combined_loss_is_a_mean_over_batches() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut iter = labelled_iter(tmp.path())?;
        let mut logits = [0.0f32; NUM_CLASSES];
        logits[0] = 2.0;
        let model = constant(&logits);
        let device = Default::default();
        let report = evaluate::<B, _>(&model, &mut iter, LossStrategy::Combined, Criterion::CrossEntropy, &device)?;

        // Per-sample loss is lse - logit[label]; batch means lse - 1.2 and lse - 1.0.
        let lse = (2f32.exp() + 17.0).ln();
        assert_eq!(report.samples, 7);
        close(report.loss, lse - 1.1);
        close(report.accuracy, 4.0 / 7.0);
        assert!(report.heads.is_none());
        Ok(())
    }

    #[test]
    fn multi_head_reports_every_head() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut iter = labelled_iter(tmp.path())?;
        // Predicts mask 0, gender 1, age 0, i.e. combined id 3.
        let model = constant(&[2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let device = Default::default();
        let strategy = LossStrategy::MultiHead { age_weight: 1.5 };
        let report = evaluate::<B, _>(&model, &mut iter, strategy, Criterion::CrossEntropy, &device)?;

        let mask = (2f32.exp() + 2.0).ln() - 1.8;
        let gender = (1.0 + 1f32.exp()).ln() - 0.45;
        let age = 3f32.ln();
        assert_eq!(report.samples, 7);
        close(report.loss, mask + gender + age);
        close(report.accuracy, 1.0 / 7.0);
        let [m, g, a] = report.heads.context("multi-head report has heads")?;
        close(m.loss, mask);
        close(g.loss, gender);
        close(a.loss, age);
        close(m.accuracy, 6.0 / 7.0);
        close(g.accuracy, 3.0 / 7.0);
        close(a.accuracy, 5.0 / 7.0);
        Ok(())
    }

    #[test]
    fn repeated_evaluation_rewinds_the_iterator() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut iter = labelled_iter(tmp.path())?;
        let model = constant(&[0.0; NUM_CLASSES]);
        let device = Default::default();
        let first = evaluate::<B, _>(&model, &mut iter, LossStrategy::Combined, Criterion::CrossEntropy, &device)?;
        let second = evaluate::<B, _>(&model, &mut iter, LossStrategy::Combined, Criterion::CrossEntropy, &device)?;
        assert_eq!(first, second);
        assert_eq!(second.samples, 7);
        Ok(())
    }

    #[test]
    fn validation_uses_the_training_batch_size() {
        let cfg = TrainConfig {
            batch_size: 64,
            valid_batch_size: 1000,
            ..TrainConfig::default()
        };
        assert_eq!(valid_batches(&cfg), BatchConfig::eval(64));
        assert!(!valid_batches(&cfg).drop_last);
        assert_eq!(test_batches(&cfg), BatchConfig::eval(1000));
    }

    #[test]
    fn output_width_must_match_the_strategy() {
        let heads = constant(&[0.0; 8]);
        assert!(check_outputs::<B, _>(&heads, LossStrategy::MultiHead { age_weight: 1.5 }).is_ok());
        let err = check_outputs::<B, _>(&heads, LossStrategy::Combined).unwrap_err();
        assert!(err.to_string().contains("needs 18"), "{err}");
    }
}
