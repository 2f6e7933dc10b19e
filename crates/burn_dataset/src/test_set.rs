//! Held-out test images listed by `info.csv`.

use crate::batch::BatchItem;
use crate::types::{DatasetError, DatasetResult};
use data_contracts::{TestManifest, TEST_MANIFEST_FILE};
use std::path::{Path, PathBuf};

pub const TEST_IMAGE_DIR: &str = "images";

#[derive(Debug, Clone)]
pub struct TestSet {
    pub manifest: TestManifest,
    pub image_dir: PathBuf,
}

impl TestSet {
    /// Reads `eval_dir/info.csv` and checks every listed image exists under `eval_dir/images`.
    pub fn load(eval_dir: &Path) -> DatasetResult<Self> {
        let manifest = TestManifest::load(&eval_dir.join(TEST_MANIFEST_FILE))?;
        let image_dir = eval_dir.join(TEST_IMAGE_DIR);
        if let Some(missing) = manifest
            .image_ids
            .iter()
            .map(|id| image_dir.join(id))
            .find(|p| !p.is_file())
        {
            return Err(DatasetError::Io {
                path: missing,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "test image missing"),
            });
        }
        tracing::info!(images = manifest.len(), dir = %eval_dir.display(), "loaded test manifest");
        Ok(Self {
            manifest,
            image_dir,
        })
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Unlabelled batch items in manifest order.
    pub fn items(&self) -> Vec<BatchItem> {
        self.manifest
            .image_ids
            .iter()
            .enumerate()
            .map(|(i, id)| BatchItem {
                path: self.image_dir.join(id),
                label: None,
                key: i as u64,
            })
            .collect()
    }
}
