//! Shared CLI plumbing for the maskfold binaries.

pub mod common;
pub mod logging;

pub use common::{BackendKind, PathArgs, PathOpts};
pub use logging::init_tracing;
