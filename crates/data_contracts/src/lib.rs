//! Shared data contracts: the attribute label codec, run manifests, and the
//! test manifest / submission file formats.

pub mod labels;
pub mod manifest;
pub mod submission;

pub use labels::{AgeLabel, GenderLabel, LabelError, MaskLabel, MultiLabel, HEAD_WIDTHS, NUM_CLASSES};
pub use manifest::{ManifestError, RunManifest, RunManifestSchemaVersion, RUN_MANIFEST_FILE};
pub use submission::{
    read_submission, write_submission, SubmissionRow, TestManifest, TEST_MANIFEST_FILE,
};
