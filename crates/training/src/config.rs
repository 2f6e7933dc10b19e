//! Command line, config file and resolved training configuration.

use crate::checkpoint::CheckpointKind;
use crate::early_stop::{ResetPolicy, DEFAULT_PATIENCE};
use crate::loss::{Criterion, StrategyKind};
use anyhow::{bail, Context};
use burn_dataset::{AugmentationKind, DatasetKind, Normalization};
use clap::{Parser, ValueEnum};
use cli_support::{BackendKind, PathArgs, PathOpts};
use models::ModelKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SUBMISSION_FILE: &str = "skf_submission.csv";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    Adam,
    AdamW,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "train",
    about = "Stratified K-fold training with early stopping and TTA fold ensembling"
)]
pub struct TrainArgs {
    /// TOML file with defaults for any flag below.
    #[arg(long, env = "MASKFOLD_CONFIG")]
    pub config: Option<PathBuf>,
    /// Random seed [default: 42].
    #[arg(long)]
    pub seed: Option<u64>,
    /// Maximum epochs per fold [default: 100].
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Fold grouping: mask-base or split-by-profile [default: mask-base].
    #[arg(long)]
    pub dataset: Option<DatasetKind>,
    /// Training augmentation: base or custom [default: base].
    #[arg(long)]
    pub augmentation: Option<AugmentationKind>,
    /// Input size as HEIGHT WIDTH [default: 128 96].
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    pub resize: Option<Vec<u32>>,
    /// Training batch size [default: 64].
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Test-set batch size [default: 1000]; validation uses `batch_size`.
    #[arg(long)]
    pub valid_batch_size: Option<usize>,
    /// Architecture: base or tiny [default: base].
    #[arg(long)]
    pub model: Option<ModelKind>,
    #[arg(long, value_enum)]
    pub optimizer: Option<OptimizerKind>,
    /// Base learning rate [default: 1e-3].
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long, value_enum)]
    pub criterion: Option<Criterion>,
    /// Epochs between learning rate halvings [default: 20].
    #[arg(long)]
    pub lr_decay_step: Option<usize>,
    /// Batches between training log lines [default: 20].
    #[arg(long)]
    pub log_interval: Option<usize>,
    /// Run directory name under the model dir [default: exp].
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyKind>,
    /// Number of folds [default: 5].
    #[arg(long)]
    pub folds: Option<usize>,
    /// Stalled epochs tolerated before a fold stops [default: 10].
    #[arg(long)]
    pub patience: Option<usize>,
    /// Batches per optimizer step [default: 2].
    #[arg(long)]
    pub accumulation_steps: Option<usize>,
    #[arg(long, value_enum)]
    pub reset_policy: Option<ResetPolicy>,
    /// Append per-epoch metrics as JSON lines to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    #[command(flatten)]
    pub paths: PathArgs,
}

/// Mirror of [`TrainArgs`] read from TOML; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfigFile {
    pub seed: Option<u64>,
    pub epochs: Option<usize>,
    pub dataset: Option<DatasetKind>,
    pub augmentation: Option<AugmentationKind>,
    pub resize: Option<[u32; 2]>,
    pub batch_size: Option<usize>,
    pub valid_batch_size: Option<usize>,
    pub model: Option<ModelKind>,
    pub optimizer: Option<OptimizerKind>,
    pub lr: Option<f64>,
    pub criterion: Option<Criterion>,
    pub lr_decay_step: Option<usize>,
    pub log_interval: Option<usize>,
    pub name: Option<String>,
    pub strategy: Option<StrategyKind>,
    pub folds: Option<usize>,
    pub patience: Option<usize>,
    pub accumulation_steps: Option<usize>,
    pub reset_policy: Option<ResetPolicy>,
    pub metrics_out: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub data_dir: Option<PathBuf>,
    pub eval_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl TrainConfigFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub seed: u64,
    pub epochs: usize,
    pub dataset: DatasetKind,
    pub augmentation: AugmentationKind,
    /// (height, width).
    pub resize: (u32, u32),
    pub normalization: Normalization,
    pub batch_size: usize,
    pub valid_batch_size: usize,
    pub model: ModelKind,
    pub optimizer: OptimizerKind,
    pub lr: f64,
    pub criterion: Criterion,
    pub lr_decay_step: usize,
    pub log_interval: usize,
    pub name: String,
    pub strategy: StrategyKind,
    pub folds: usize,
    pub patience: usize,
    pub accumulation_steps: usize,
    pub reset_policy: ResetPolicy,
    pub metrics_out: Option<PathBuf>,
    pub backend: BackendKind,
    pub paths: PathOpts,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 100,
            dataset: DatasetKind::MaskBase,
            augmentation: AugmentationKind::Base,
            resize: (128, 96),
            normalization: Normalization::default(),
            batch_size: 64,
            valid_batch_size: 1000,
            model: ModelKind::Base,
            optimizer: OptimizerKind::Sgd,
            lr: 1e-3,
            criterion: Criterion::CrossEntropy,
            lr_decay_step: 20,
            log_interval: 20,
            name: "exp".to_string(),
            strategy: StrategyKind::Combined,
            folds: 5,
            patience: DEFAULT_PATIENCE,
            accumulation_steps: 2,
            reset_policy: ResetPolicy::Keep,
            metrics_out: None,
            backend: BackendKind::NdArray,
            paths: PathOpts::with_defaults(PathArgs::default()),
        }
    }
}

impl TrainConfig {
    /// Merge CLI values over the config file (if any) over built-in defaults.
    pub fn resolve(args: TrainArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => TrainConfigFile::from_path(path)?,
            None => TrainConfigFile::default(),
        };
        Self::merge(args, file)
    }

    pub fn merge(args: TrainArgs, file: TrainConfigFile) -> anyhow::Result<Self> {
        let d = TrainConfig::default();
        let resize = match args.resize {
            Some(v) => match v.as_slice() {
                [h, w] => (*h, *w),
                _ => bail!("--resize takes HEIGHT WIDTH, got {v:?}"),
            },
            None => file.resize.map(|[h, w]| (h, w)).unwrap_or(d.resize),
        };
        let file_paths = PathArgs {
            data_dir: file.data_dir,
            eval_dir: file.eval_dir,
            model_dir: file.model_dir,
            output_dir: file.output_dir,
        };
        let cfg = TrainConfig {
            seed: args.seed.or(file.seed).unwrap_or(d.seed),
            epochs: args.epochs.or(file.epochs).unwrap_or(d.epochs),
            dataset: args.dataset.or(file.dataset).unwrap_or(d.dataset),
            augmentation: args
                .augmentation
                .or(file.augmentation)
                .unwrap_or(d.augmentation),
            resize,
            normalization: d.normalization,
            batch_size: args.batch_size.or(file.batch_size).unwrap_or(d.batch_size),
            valid_batch_size: args
                .valid_batch_size
                .or(file.valid_batch_size)
                .unwrap_or(d.valid_batch_size),
            model: args.model.or(file.model).unwrap_or(d.model),
            optimizer: args.optimizer.or(file.optimizer).unwrap_or(d.optimizer),
            lr: args.lr.or(file.lr).unwrap_or(d.lr),
            criterion: args.criterion.or(file.criterion).unwrap_or(d.criterion),
            lr_decay_step: args
                .lr_decay_step
                .or(file.lr_decay_step)
                .unwrap_or(d.lr_decay_step),
            log_interval: args
                .log_interval
                .or(file.log_interval)
                .unwrap_or(d.log_interval),
            name: args.name.or(file.name).unwrap_or(d.name),
            strategy: args.strategy.or(file.strategy).unwrap_or(d.strategy),
            folds: args.folds.or(file.folds).unwrap_or(d.folds),
            patience: args.patience.or(file.patience).unwrap_or(d.patience),
            accumulation_steps: args
                .accumulation_steps
                .or(file.accumulation_steps)
                .unwrap_or(d.accumulation_steps),
            reset_policy: args
                .reset_policy
                .or(file.reset_policy)
                .unwrap_or(d.reset_policy),
            metrics_out: args.metrics_out.or(file.metrics_out),
            backend: args.backend.or(file.backend).unwrap_or(d.backend),
            paths: PathOpts::with_defaults(args.paths.or(file_paths)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.epochs == 0 {
            bail!("epochs must be positive");
        }
        if self.batch_size == 0 || self.valid_batch_size == 0 {
            bail!("batch sizes must be positive");
        }
        if self.folds < 2 {
            bail!("need at least 2 folds, got {}", self.folds);
        }
        if self.accumulation_steps == 0 {
            bail!("accumulation_steps must be positive");
        }
        if self.log_interval == 0 {
            bail!("log_interval must be positive");
        }
        if self.resize.0 == 0 || self.resize.1 == 0 {
            bail!("resize must be non-zero, got {:?}", self.resize);
        }
        if !(self.lr > 0.0) {
            bail!("lr must be positive, got {}", self.lr);
        }
        Ok(())
    }

    pub fn submission_path(&self) -> PathBuf {
        self.paths.output_dir.join(SUBMISSION_FILE)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "infer",
    about = "Ensemble the fold checkpoints of a finished run over the test set"
)]
pub struct InferArgs {
    /// Run directory containing run.json and fold*/ checkpoints.
    #[arg(long)]
    pub run_dir: PathBuf,
    /// Directory holding info.csv and images/.
    #[arg(long, env = "SM_CHANNEL_EVAL", default_value = cli_support::common::DEFAULT_EVAL_DIR)]
    pub eval_dir: PathBuf,
    /// Which checkpoint of each fold to use.
    #[arg(long, value_enum, default_value_t = CheckpointKind::Last)]
    pub checkpoint: CheckpointKind,
    /// Submission CSV path [default: <run-dir>/submission.csv].
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TrainConfig::merge(TrainArgs::default(), TrainConfigFile::default()).unwrap();
        assert_eq!(cfg, TrainConfig::default());
        assert_eq!(cfg.resize, (128, 96));
        assert_eq!(cfg.folds, 5);
        assert_eq!(cfg.accumulation_steps, 2);
    }

    #[test]
    fn cli_beats_file_beats_default() {
        let file: TrainConfigFile = toml::from_str(
            r#"
            epochs = 7
            lr = 0.01
            optimizer = "adam-w"
            strategy = "multi-head"
            resize = [64, 48]
            data_dir = "/from/file"
            "#,
        )
        .unwrap();
        let args = TrainArgs::try_parse_from(["train", "--epochs", "3", "--resize", "32", "24"]).unwrap();
        let cfg = TrainConfig::merge(args, file).unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.resize, (32, 24));
        assert_eq!(cfg.lr, 0.01);
        assert_eq!(cfg.optimizer, OptimizerKind::AdamW);
        assert_eq!(cfg.strategy, StrategyKind::MultiHead);
        assert_eq!(cfg.paths.data_dir, PathBuf::from("/from/file"));
        assert_eq!(cfg.batch_size, 64);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(TrainArgs::try_parse_from(["train", "--optimizer", "rmsprop"]).is_err());
        assert!(TrainArgs::try_parse_from(["train", "--model", "vit"]).is_err());
        assert!(toml::from_str::<TrainConfigFile>("critrion = \"focal\"").is_err());
    }

    #[test]
    fn enum_flags_parse() {
        let args = TrainArgs::try_parse_from([
            "train",
            "--dataset",
            "split-by-profile",
            "--augmentation",
            "custom",
            "--criterion",
            "label-smoothing",
            "--reset-policy",
            "reset",
            "--model",
            "tiny",
        ])
        .unwrap();
        assert_eq!(args.dataset, Some(DatasetKind::SplitByProfile));
        assert_eq!(args.augmentation, Some(AugmentationKind::Custom));
        assert_eq!(args.criterion, Some(Criterion::LabelSmoothing));
        assert_eq!(args.reset_policy, Some(ResetPolicy::Reset));
        assert_eq!(args.model, Some(ModelKind::Tiny));
    }

    #[test]
    fn single_fold_fails_validation() {
        let file = TrainConfigFile {
            folds: Some(1),
            ..Default::default()
        };
        assert!(TrainConfig::merge(TrainArgs::default(), file).is_err());
    }
}
