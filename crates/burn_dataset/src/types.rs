//! Core types and error definitions for burn_dataset.

use data_contracts::{LabelError, ManifestError, MultiLabel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("bad profile directory name {path}: {msg}")]
    ProfileName { path: PathBuf, msg: String },
    #[error("label error at {path}: {source}")]
    Label {
        path: PathBuf,
        #[source]
        source: LabelError,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("cannot split {samples} samples into {folds} folds")]
    FoldCount { samples: usize, folds: usize },
    #[error("no images found under {0}")]
    Empty(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// One labelled training image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub image: PathBuf,
    pub label: MultiLabel,
    /// Index of the person (profile directory) the image belongs to.
    pub profile: usize,
}

/// How training samples are grouped when folds are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Every image is split independently.
    #[default]
    MaskBase,
    /// All images of one profile land in the same fold.
    SplitByProfile,
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mask-base" | "maskbasedataset" => Ok(Self::MaskBase),
            "split-by-profile" | "masksplitbyprofiledataset" => Ok(Self::SplitByProfile),
            other => Err(format!(
                "unknown dataset '{other}' (expected mask-base|split-by-profile)"
            )),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MaskBase => "mask-base",
            Self::SplitByProfile => "split-by-profile",
        })
    }
}

/// Samples indexed from a profile tree, with per-profile bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ProfileDataset {
    pub samples: Vec<Sample>,
    pub profiles: Vec<String>,
}

impl ProfileDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Combined class id of every sample, in sample order.
    pub fn combined_labels(&self) -> Vec<u8> {
        self.samples.iter().map(|s| s.label.encode()).collect()
    }

    pub fn profile_ids(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.profile).collect()
    }

    /// Per-class sample counts indexed by combined id.
    pub fn class_counts(&self) -> [usize; data_contracts::NUM_CLASSES] {
        let mut counts = [0usize; data_contracts::NUM_CLASSES];
        for s in &self.samples {
            counts[s.label.encode() as usize] += 1;
        }
        counts
    }
}
