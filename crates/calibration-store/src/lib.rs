//! Calibration Store
//!
//! Resolves and loads the per-model calibration artifacts (linear compensation
//! fits and confusion matrices) from the conventionally named data directory.

pub mod config;
pub mod fit;
pub mod matrix;
pub mod provider;

pub use config::{artifact_path, CompensationOptions, DataFile, DataStoreConfig, Dataset, SuffixTable};
pub use fit::CalibrationFit;
pub use matrix::{ClassMatrix, ConfusionMatrix};
pub use provider::{CalibrationProvider, FileStore};
