//! Run directories and per-fold model checkpoints.

use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointKind {
    /// Highest validation accuracy seen in the fold.
    Best,
    /// State at the end of the most recent epoch.
    #[default]
    Last,
}

impl CheckpointKind {
    pub fn file_name(self) -> &'static str {
        match self {
            CheckpointKind::Best => "best.bin",
            CheckpointKind::Last => "last.bin",
        }
    }
}

/// `base` when it does not exist yet, otherwise `base{n}` with `n` one past the
/// largest number directly following the stem in a sibling's name (starting
/// at 2). Trailing text after the digits is ignored, so `exp3_old` counts as 3.
pub fn increment_path(base: &Path) -> anyhow::Result<PathBuf> {
    if !base.exists() {
        return Ok(base.to_path_buf());
    }
    let stem = base
        .file_name()
        .and_then(|s| s.to_str())
        .with_context(|| format!("run path {} has no usable name", base.display()))?;
    let parent = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let entries =
        fs::read_dir(&parent).with_context(|| format!("listing {}", parent.display()))?;
    let next = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name();
            let suffix = name.to_str()?.strip_prefix(stem)?;
            let digits: String = suffix.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .map(|n| n + 1)
        .unwrap_or(2);
    Ok(base.with_file_name(format!("{stem}{next}")))
}

pub fn fold_dir(run_dir: &Path, fold: usize) -> PathBuf {
    run_dir.join(format!("fold{fold}"))
}

/// Checkpoint files of a single fold: `fold{i}/best.bin` and `fold{i}/last.bin`.
#[derive(Debug, Clone)]
pub struct FoldCheckpoints {
    dir: PathBuf,
}

impl FoldCheckpoints {
    pub fn create(run_dir: &Path, fold: usize) -> anyhow::Result<Self> {
        let dir = fold_dir(run_dir, fold);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn open(run_dir: &Path, fold: usize) -> Self {
        Self {
            dir: fold_dir(run_dir, fold),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: CheckpointKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn save<B: Backend, M: Module<B>>(&self, model: &M, kind: CheckpointKind) -> anyhow::Result<PathBuf> {
        let path = self.path(kind);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(path.clone(), &recorder)
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))?;
        Ok(path)
    }

    /// Load weights into `model`, which must have the same architecture.
    pub fn load<B: Backend, M: Module<B>>(
        &self,
        model: M,
        kind: CheckpointKind,
        device: &B::Device,
    ) -> anyhow::Result<M> {
        let path = self.path(kind);
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .load_file(path.clone(), &recorder, device)
            .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_exp_exp2_exp3() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let base = tmp.path().join("exp");
        let first = increment_path(&base)?;
        assert_eq!(first, base);
        fs::create_dir_all(&first)?;
        let second = increment_path(&base)?;
        assert_eq!(second, tmp.path().join("exp2"));
        fs::create_dir_all(&second)?;
        let third = increment_path(&base)?;
        assert_eq!(third, tmp.path().join("exp3"));
        Ok(())
    }

    #[test]
    fn gaps_continue_from_the_largest_suffix() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        for name in ["exp", "exp7", "experiment", "exp_old"] {
            fs::create_dir_all(tmp.path().join(name))?;
        }
        assert_eq!(increment_path(&tmp.path().join("exp"))?, tmp.path().join("exp8"));
        Ok(())
    }

    #[test]
    fn digits_followed_by_text_still_count() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        for name in ["exp", "exp3_old", "exp2.bak"] {
            fs::create_dir_all(tmp.path().join(name))?;
        }
        assert_eq!(increment_path(&tmp.path().join("exp"))?, tmp.path().join("exp4"));
        Ok(())
    }

    #[test]
    fn fold_paths() {
        let ckpt = FoldCheckpoints::open(Path::new("runs/exp"), 3);
        assert_eq!(ckpt.path(CheckpointKind::Best), Path::new("runs/exp/fold3/best.bin"));
        assert_eq!(ckpt.path(CheckpointKind::Last), Path::new("runs/exp/fold3/last.bin"));
    }
}
