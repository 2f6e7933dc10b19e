use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RUN_MANIFEST_FILE: &str = "run.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunManifestSchemaVersion {
    V1,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Everything needed to rebuild the fold models of a finished run.
///
/// Kind fields hold the command-line names (`base`, `multi-head`, ...) so this
/// crate stays independent of the model and training crates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub schema_version: RunManifestSchemaVersion,
    pub seed: u64,
    pub folds: usize,
    pub model: String,
    pub strategy: String,
    pub criterion: String,
    /// Target (height, width) fed to the model.
    pub resize: (u32, u32),
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub run_dir: PathBuf,
    pub started_at_unix: f64,
}

impl RunManifest {
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.started_at_unix.is_nan() || self.started_at_unix < 0.0 {
            return Err(ManifestError::Invalid(
                "started_at_unix must be non-negative".into(),
            ));
        }
        if self.folds < 2 {
            return Err(ManifestError::Invalid("folds must be at least 2".into()));
        }
        if self.resize.0 == 0 || self.resize.1 == 0 {
            return Err(ManifestError::Invalid("resize must be non-zero".into()));
        }
        if self.std.iter().any(|s| !(*s > 0.0)) {
            return Err(ManifestError::Invalid("std must be positive".into()));
        }
        Ok(())
    }

    pub fn write(&self, run_dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = run_dir.join(RUN_MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|source| ManifestError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(run_dir: &Path) -> Result<Self, ManifestError> {
        let path = run_dir.join(RUN_MANIFEST_FILE);
        let raw = fs::read(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: RunManifest =
            serde_json::from_slice(&raw).map_err(|source| ManifestError::Json {
                path: path.clone(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }
}
