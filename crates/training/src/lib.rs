#![recursion_limit = "256"]

pub mod accumulate;
pub mod checkpoint;
pub mod config;
pub mod early_stop;
pub mod ensemble;
pub mod fold;
pub mod infer;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod util;

pub use accumulate::AccumulationSchedule;
pub use checkpoint::{increment_path, CheckpointKind, FoldCheckpoints};
pub use config::{InferArgs, OptimizerKind, TrainArgs, TrainConfig, TrainConfigFile};
pub use early_stop::{EarlyStopping, EpochVerdict, ResetPolicy, RunningBest};
pub use ensemble::{predict_probabilities, tta_logits, OofAccumulator};
pub use fold::{evaluate, run_kfold, FoldOutcome, KFoldSummary, ValidReport};
pub use infer::{ensemble_run, run_infer, InferSummary};
pub use loss::{Criterion, LossStrategy, StrategyKind};
pub use metrics::{JsonlSink, MetricsSink, NullSink, Stage};
pub use schedule::StepDecay;
pub use util::{run_train, validate_backend_choice};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
