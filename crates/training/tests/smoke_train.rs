//! End-to-end runs of the K-fold loop on a tiny synthetic dataset.

use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Distribution, Tensor};
use cli_support::{BackendKind, PathOpts};
use data_contracts::{read_submission, RunManifest, NUM_CLASSES};
use image::{Rgb, RgbImage};
use models::{ModelKind, TinyModel, TinyModelConfig};
use std::fs;
use std::path::Path;
use training::{
    ensemble_run, run_kfold, tta_logits, CheckpointKind, InferArgs, JsonlSink, NullSink,
    StrategyKind, TrainConfig,
};

type B = NdArray<f32>;
type AD = Autodiff<B>;

const STEMS: [&str; 7] = [
    "mask1",
    "mask2",
    "mask3",
    "mask4",
    "mask5",
    "incorrect_mask",
    "normal",
];

fn write_train_tree(root: &Path, profiles: usize) -> anyhow::Result<()> {
    for i in 0..profiles {
        let gender = if i % 2 == 0 { "male" } else { "female" };
        let age = [25, 40, 70][i % 3];
        let dir = root.join(format!("{:06}_{gender}_Asian_{age}", i + 1));
        fs::create_dir_all(&dir)?;
        for (s, stem) in STEMS.iter().enumerate() {
            let img = RgbImage::from_fn(10, 8, |x, y| {
                Rgb([(x * 20) as u8, (y * 25 + s as u32 * 10) as u8, (i * 15) as u8])
            });
            img.save(dir.join(format!("{stem}.jpg")))?;
        }
    }
    Ok(())
}

fn write_eval_tree(root: &Path, images: usize) -> anyhow::Result<()> {
    let image_dir = root.join("images");
    fs::create_dir_all(&image_dir)?;
    let mut info = String::from("ImageID,ans\n");
    for i in 0..images {
        let name = format!("test_{i}.jpg");
        RgbImage::from_pixel(10, 8, Rgb([(i * 30) as u8, 100, 200])).save(image_dir.join(&name))?;
        info.push_str(&format!("{name},0\n"));
    }
    fs::write(root.join("info.csv"), info)?;
    Ok(())
}

fn smoke_config(root: &Path, strategy: StrategyKind) -> anyhow::Result<TrainConfig> {
    let data_dir = root.join("train");
    let eval_dir = root.join("eval");
    write_train_tree(&data_dir, 10)?;
    write_eval_tree(&eval_dir, 3)?;
    Ok(TrainConfig {
        seed: 7,
        epochs: 2,
        resize: (8, 8),
        batch_size: 4,
        valid_batch_size: 5,
        model: ModelKind::Tiny,
        lr: 1e-2,
        log_interval: 3,
        name: "smoke".to_string(),
        strategy,
        folds: 5,
        accumulation_steps: 2,
        backend: BackendKind::NdArray,
        paths: PathOpts {
            data_dir,
            eval_dir,
            model_dir: root.join("model"),
            output_dir: root.join("output"),
        },
        ..TrainConfig::default()
    })
}

#[test]
fn combined_run_writes_checkpoints_manifest_and_submission() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = smoke_config(tmp.path(), StrategyKind::Combined)?;
    let metrics_path = tmp.path().join("metrics.jsonl");
    cfg.metrics_out = Some(metrics_path.clone());
    cfg.validate()?;

    let device = Default::default();
    let mut sink = JsonlSink::create(&metrics_path)?;
    let summary = run_kfold::<AD>(&cfg, &device, &mut sink)?;

    assert_eq!(summary.run_dir, tmp.path().join("model/smoke"));
    assert_eq!(summary.folds.len(), 5);
    for fold in &summary.folds {
        assert_eq!(fold.epochs_run, 2);
        assert!(!fold.stopped_early);
        assert_eq!(fold.train_samples + fold.valid_samples, 70);
        let batches = fold.train_samples / cfg.batch_size;
        assert_eq!(fold.optimizer_steps, cfg.epochs * (batches / 2));
        for kind in [CheckpointKind::Best, CheckpointKind::Last] {
            let path = summary
                .run_dir
                .join(format!("fold{}", fold.fold))
                .join(kind.file_name());
            assert!(path.is_file(), "missing {}", path.display());
        }
    }

    let manifest = RunManifest::load(&summary.run_dir)?;
    assert_eq!(manifest.folds, 5);
    assert_eq!(manifest.model, "tiny");
    assert_eq!(manifest.strategy, "combined");

    assert_eq!(summary.submission, tmp.path().join("output/skf_submission.csv"));
    let rows = read_submission(&summary.submission)?;
    let ids: Vec<_> = rows.iter().map(|r| r.image_id.as_str()).collect();
    assert_eq!(ids, ["test_0.jpg", "test_1.jpg", "test_2.jpg"]);
    assert!(rows.iter().all(|r| (r.ans as usize) < NUM_CLASSES));

    // Two stages per epoch for every fold.
    let lines = fs::read_to_string(&metrics_path)?.lines().count();
    assert_eq!(lines, 5 * 2 * 2);
    Ok(())
}

#[test]
fn second_run_gets_a_fresh_directory() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = smoke_config(tmp.path(), StrategyKind::Combined)?;
    cfg.epochs = 1;
    let device = Default::default();
    let first = run_kfold::<AD>(&cfg, &device, &mut NullSink)?;
    let second = run_kfold::<AD>(&cfg, &device, &mut NullSink)?;
    assert_eq!(first.run_dir, tmp.path().join("model/smoke"));
    assert_eq!(second.run_dir, tmp.path().join("model/smoke2"));
    Ok(())
}

#[test]
fn multi_head_run_and_checkpoint_ensemble_agree() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = smoke_config(tmp.path(), StrategyKind::MultiHead)?;
    cfg.epochs = 1;
    let device = Default::default();
    let summary = run_kfold::<AD>(&cfg, &device, &mut NullSink)?;
    assert_eq!(RunManifest::load(&summary.run_dir)?.strategy, "multi-head");

    // The fold loop predicts with the last weights, so re-ensembling the
    // last checkpoints reproduces the submission.
    let args = InferArgs {
        run_dir: summary.run_dir.clone(),
        eval_dir: cfg.paths.eval_dir.clone(),
        checkpoint: CheckpointKind::Last,
        output: None,
        batch_size: 5,
        backend: BackendKind::NdArray,
    };
    let replay = ensemble_run::<B>(&args, &device)?;
    assert_eq!(replay.folds, 5);
    assert_eq!(replay.submission, summary.run_dir.join("submission.csv"));
    assert_eq!(replay.labels, summary.labels);
    Ok(())
}

#[test]
fn tta_is_symmetric_under_horizontal_flip() {
    let device = Default::default();
    let model = TinyModel::<B>::new(TinyModelConfig::default(), &device);
    let images = Tensor::<B, 4>::random([2, 3, 8, 6], Distribution::Default, &device);
    let plain = tta_logits(&model, images.clone());
    let mirrored = tta_logits(&model, images.flip([3]));
    let diff: f32 = (plain - mirrored).abs().max().into_scalar();
    assert!(diff < 1e-5, "tta logits differ by {diff}");
}
