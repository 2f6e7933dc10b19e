//! Re-run the fold ensemble of a finished run from its saved checkpoints.

use crate::checkpoint::{CheckpointKind, FoldCheckpoints};
use crate::config::InferArgs;
use crate::ensemble::{predict_probabilities, OofAccumulator};
use crate::loss::{LossStrategy, StrategyKind};
use crate::util::validate_backend_choice;
use crate::TrainBackend;
use anyhow::{anyhow, Context};
use burn::tensor::backend::Backend;
use burn_dataset::{
    build_decode_pool, default_decode_threads, BatchConfig, BatchIter, Normalization, TestSet,
    TransformPipeline,
};
use clap::ValueEnum;
use cli_support::init_tracing;
use data_contracts::{write_submission, RunManifest, NUM_CLASSES};
use models::{BaseModel, BaseModelConfig, ModelKind, TinyModel, TinyModelConfig};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InferSummary {
    pub submission: PathBuf,
    pub labels: Vec<u8>,
    pub folds: usize,
}

pub fn run_infer(args: InferArgs) -> anyhow::Result<()> {
    init_tracing();
    validate_backend_choice(args.backend)?;
    let device = <TrainBackend as Backend>::Device::default();
    let summary = ensemble_run::<TrainBackend>(&args, &device)?;
    info!(
        path = %summary.submission.display(),
        rows = summary.labels.len(),
        folds = summary.folds,
        "submission written"
    );
    Ok(())
}

/// Average the TTA probabilities of every fold checkpoint in `args.run_dir`
/// and write the argmax labels.
pub fn ensemble_run<B: Backend>(args: &InferArgs, device: &B::Device) -> anyhow::Result<InferSummary> {
    let manifest = RunManifest::load(&args.run_dir)
        .with_context(|| format!("reading run manifest in {}", args.run_dir.display()))?;
    let model = ModelKind::from_str(&manifest.model).map_err(|e| anyhow!(e))?;
    let strategy = LossStrategy::from(
        <StrategyKind as ValueEnum>::from_str(&manifest.strategy, true).map_err(|e| anyhow!(e))?,
    );
    let test_set = TestSet::load(&args.eval_dir)
        .with_context(|| format!("loading test set at {}", args.eval_dir.display()))?;
    let pipeline = TransformPipeline::eval(
        manifest.resize,
        Normalization {
            mean: manifest.mean,
            std: manifest.std,
        },
    );
    let pool = build_decode_pool(default_decode_threads())?;
    info!(
        run_dir = %args.run_dir.display(),
        folds = manifest.folds,
        model = %model,
        strategy = strategy.name(),
        checkpoint = ?args.checkpoint,
        "ensembling fold checkpoints"
    );

    let mut oof = OofAccumulator::new(test_set.len(), NUM_CLASSES);
    for fold in 0..manifest.folds {
        let mut iter = BatchIter::new(
            test_set.items(),
            pipeline.clone(),
            BatchConfig::eval(args.batch_size),
            pool.clone(),
        )?;
        let checkpoints = FoldCheckpoints::open(&args.run_dir, fold);
        let num_outputs = strategy.num_outputs();
        let probs = match model {
            ModelKind::Base => {
                let fresh = BaseModel::<B>::new(
                    BaseModelConfig {
                        num_outputs,
                        ..Default::default()
                    },
                    device,
                );
                let loaded = checkpoints.load::<B, _>(fresh, args.checkpoint, device)?;
                predict_probabilities::<B, _>(&loaded, strategy, &mut iter, device)?
            }
            ModelKind::Tiny => {
                let fresh = TinyModel::<B>::new(
                    TinyModelConfig {
                        num_outputs,
                        ..Default::default()
                    },
                    device,
                );
                let loaded = checkpoints.load::<B, _>(fresh, args.checkpoint, device)?;
                predict_probabilities::<B, _>(&loaded, strategy, &mut iter, device)?
            }
        };
        oof.add_fold(&probs, manifest.folds)?;
        info!(fold, "fold predictions added");
    }

    let labels = oof.argmax_rows();
    let path = output_path(args.output.as_deref(), &args.run_dir);
    let submission = write_submission(&path, &test_set.manifest, &labels)?;
    Ok(InferSummary {
        submission,
        labels,
        folds: oof.folds_added(),
    })
}

fn output_path(output: Option<&Path>, run_dir: &Path) -> PathBuf {
    output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| run_dir.join("submission.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_defaults_into_the_run_dir() {
        assert_eq!(
            output_path(None, Path::new("model/exp2")),
            Path::new("model/exp2/submission.csv")
        );
        assert_eq!(
            output_path(Some(Path::new("out.csv")), Path::new("model/exp2")),
            Path::new("out.csv")
        );
    }

    #[test]
    fn default_checkpoint_is_last() {
        assert_eq!(CheckpointKind::default(), CheckpointKind::Last);
    }
}
