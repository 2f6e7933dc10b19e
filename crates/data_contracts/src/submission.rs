//! Test-set manifest (`info.csv`) and the submission file written after ensembling.

use crate::manifest::ManifestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const TEST_MANIFEST_FILE: &str = "info.csv";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRow {
    #[serde(rename = "ImageID")]
    pub image_id: String,
    pub ans: u8,
}

#[derive(Debug, Deserialize)]
struct InfoRow {
    #[serde(rename = "ImageID")]
    image_id: String,
}

/// Ordered list of test image identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestManifest {
    pub image_ids: Vec<String>,
}

impl TestManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let csv_err = |source| ManifestError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(csv_err)?;
        let mut image_ids = Vec::new();
        for row in reader.deserialize::<InfoRow>() {
            let row = row.map_err(csv_err)?;
            image_ids.push(row.image_id);
        }
        Ok(Self { image_ids })
    }

    pub fn len(&self) -> usize {
        self.image_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty()
    }
}

/// Pairs every test id with its predicted class and writes `ImageID,ans` rows.
pub fn write_submission(
    path: &Path,
    manifest: &TestManifest,
    labels: &[u8],
) -> Result<PathBuf, ManifestError> {
    if manifest.len() != labels.len() {
        return Err(ManifestError::Invalid(format!(
            "{} predictions for {} test images",
            labels.len(),
            manifest.len()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let csv_err = |source| ManifestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for (image_id, ans) in manifest.image_ids.iter().zip(labels) {
        writer
            .serialize(SubmissionRow {
                image_id: image_id.clone(),
                ans: *ans,
            })
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

pub fn read_submission(path: &Path) -> Result<Vec<SubmissionRow>, ManifestError> {
    let csv_err = |source| ManifestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    reader
        .deserialize::<SubmissionRow>()
        .map(|row| row.map_err(csv_err))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_csv_keeps_order_and_ignores_ans() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(TEST_MANIFEST_FILE);
        fs::write(&path, "ImageID,ans\nb.jpg,0\na.jpg,0\n")?;
        let manifest = TestManifest::load(&path)?;
        assert_eq!(manifest.image_ids, vec!["b.jpg", "a.jpg"]);
        Ok(())
    }

    #[test]
    fn submission_rows_follow_manifest() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let manifest = TestManifest {
            image_ids: vec!["x.jpg".into(), "y.jpg".into()],
        };
        let path = tmp.path().join("out/submission.csv");
        write_submission(&path, &manifest, &[1, 17])?;
        let raw = fs::read_to_string(&path)?;
        assert!(raw.starts_with("ImageID,ans\n"));
        let rows = read_submission(&path)?;
        assert_eq!(rows[0].ans, 1);
        assert_eq!(rows[1].image_id, "y.jpg");
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let manifest = TestManifest {
            image_ids: vec!["x.jpg".into()],
        };
        let err = write_submission(Path::new("unused.csv"), &manifest, &[]).unwrap_err();
        assert!(matches!(err, ManifestError::Invalid(_)));
    }
}
