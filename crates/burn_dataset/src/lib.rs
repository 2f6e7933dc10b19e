//! Dataset plumbing for maskfold: profile indexing, stratified folds,
//! augmentation and Burn batch assembly.

pub mod aug;
pub mod batch;
pub mod profiles;
pub mod splits;
pub mod test_set;
pub mod types;

pub use aug::{AugmentationKind, Normalization, TransformPipeline};
pub use batch::{
    build_decode_pool, default_decode_threads, BatchConfig, BatchItem, BatchIter, BatchLabels,
    ImageBatch,
};
pub use profiles::{index_profiles, parse_profile_name, ProfileMeta};
pub use splits::{FoldSplit, StratifiedKFold};
pub use test_set::{TestSet, TEST_IMAGE_DIR};
pub use types::{DatasetError, DatasetKind, DatasetResult, ProfileDataset, Sample};
