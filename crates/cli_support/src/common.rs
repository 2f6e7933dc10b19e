use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "/opt/ml/input/data/train/images";
pub const DEFAULT_EVAL_DIR: &str = "/opt/ml/input/data/eval";
pub const DEFAULT_MODEL_DIR: &str = "./model";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

/// Compute backend for training and inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    #[value(name = "ndarray")]
    NdArray,
    Wgpu,
}

/// Input/output directories, each overridable from the environment.
///
/// Values stay optional here so a config file can fill the gaps before
/// [`PathOpts::with_defaults`] applies the built-in locations.
#[derive(Debug, Clone, Default, Args)]
pub struct PathArgs {
    /// Root of the per-profile training images.
    #[arg(long, env = "SM_CHANNEL_TRAIN")]
    pub data_dir: Option<PathBuf>,
    /// Directory holding `info.csv` and `images/` for the test set.
    #[arg(long, env = "SM_CHANNEL_EVAL")]
    pub eval_dir: Option<PathBuf>,
    /// Parent directory of numbered run directories.
    #[arg(long, env = "SM_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,
    /// Where the submission CSV is written.
    #[arg(long, env = "SM_OUTPUT_DATA_DIR")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOpts {
    pub data_dir: PathBuf,
    pub eval_dir: PathBuf,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl PathArgs {
    /// Fill unset fields from `other`, keeping values already present.
    pub fn or(self, other: PathArgs) -> PathArgs {
        PathArgs {
            data_dir: self.data_dir.or(other.data_dir),
            eval_dir: self.eval_dir.or(other.eval_dir),
            model_dir: self.model_dir.or(other.model_dir),
            output_dir: self.output_dir.or(other.output_dir),
        }
    }
}

impl PathOpts {
    pub fn with_defaults(args: PathArgs) -> Self {
        Self {
            data_dir: args
                .data_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            eval_dir: args
                .eval_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVAL_DIR)),
            model_dir: args
                .model_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR)),
            output_dir: args
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_win_over_fallbacks() {
        let cli = PathArgs {
            data_dir: Some("cli/train".into()),
            ..Default::default()
        };
        let file = PathArgs {
            data_dir: Some("file/train".into()),
            eval_dir: Some("file/eval".into()),
            ..Default::default()
        };
        let opts = PathOpts::with_defaults(cli.or(file));
        assert_eq!(opts.data_dir, PathBuf::from("cli/train"));
        assert_eq!(opts.eval_dir, PathBuf::from("file/eval"));
        assert_eq!(opts.model_dir, PathBuf::from(DEFAULT_MODEL_DIR));
    }
}
