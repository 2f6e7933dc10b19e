use crate::config::{TrainArgs, TrainConfig};
use crate::fold::{run_kfold, KFoldSummary};
use crate::metrics::{JsonlSink, MetricsSink, NullSink};
use crate::ADBackend;
use cli_support::{init_tracing, BackendKind};
use tracing::{info, warn};

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    init_tracing();
    let cfg = TrainConfig::resolve(args)?;
    validate_backend_choice(cfg.backend)?;

    let mut sink: Box<dyn MetricsSink> = match &cfg.metrics_out {
        Some(path) => {
            let sink = JsonlSink::create(path)?;
            info!(path = %sink.path().display(), "appending epoch metrics");
            Box::new(sink)
        }
        None => Box::new(NullSink),
    };
    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let summary = run_kfold::<ADBackend>(&cfg, &device, sink.as_mut())?;
    log_summary(&summary);
    Ok(())
}

fn log_summary(summary: &KFoldSummary) {
    for fold in &summary.folds {
        info!(
            fold = fold.fold,
            epochs = fold.epochs_run,
            stopped_early = fold.stopped_early,
            best_acc = fold.best.best_val_accuracy,
            best_loss = fold.best.best_val_loss,
            "fold summary"
        );
    }
    info!(
        run_dir = %summary.run_dir.display(),
        submission = %summary.submission.display(),
        "k-fold run complete"
    );
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; the WGPU backend is used despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndarray_is_always_available() {
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }

    #[cfg(not(feature = "backend-wgpu"))]
    #[test]
    fn wgpu_requires_the_feature() {
        let err = validate_backend_choice(BackendKind::Wgpu).unwrap_err();
        assert!(err.to_string().contains("backend-wgpu"));
    }
}
