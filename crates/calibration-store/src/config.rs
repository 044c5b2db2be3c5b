use parasitemia_core::{CalibrationError, CalibrationResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the calibration data directory
pub const DATA_DIR_ENV: &str = "PARASITEMIA_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data_files";

/// Which reference data set a compensation fit was computed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Clinical samples compared against PCR
    #[default]
    Clinical,
    /// Cultured lab samples
    Cultured,
}

/// Selects one of the four compensation tables stored per model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompensationOptions {
    pub dataset: Dataset,
    /// Fit computed on heatmap-corrected counts
    pub heatmaps: bool,
}

/// A calibration artifact stored for each model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFile {
    ConfusionMean,
    InverseConfusionStd,
    Compensation(CompensationOptions),
}

/// File name suffixes appended to the model id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuffixTable {
    pub confusion_mean: String,
    pub inverse_confusion_std: String,
    pub clinical_compensation: String,
    pub cultured_compensation: String,
    pub with_heatmaps: String,
    pub no_heatmaps: String,
}

impl Default for SuffixTable {
    fn default() -> Self {
        Self {
            confusion_mean: "-cmatrix-mean.csv".to_string(),
            inverse_confusion_std: "-inv-cmatrix-std.csv".to_string(),
            clinical_compensation: "-clinical-compensation".to_string(),
            cultured_compensation: "-cultured-compensation".to_string(),
            with_heatmaps: "-with-heatmaps.csv".to_string(),
            no_heatmaps: "-no-heatmaps.csv".to_string(),
        }
    }
}

impl SuffixTable {
    pub fn suffix(&self, file: DataFile) -> String {
        match file {
            DataFile::ConfusionMean => self.confusion_mean.clone(),
            DataFile::InverseConfusionStd => self.inverse_confusion_std.clone(),
            DataFile::Compensation(opts) => {
                let dataset = match opts.dataset {
                    Dataset::Clinical => &self.clinical_compensation,
                    Dataset::Cultured => &self.cultured_compensation,
                };
                let variant = if opts.heatmaps {
                    &self.with_heatmaps
                } else {
                    &self.no_heatmaps
                };
                format!("{}{}", dataset, variant)
            }
        }
    }
}

/// Location and naming convention of the calibration data store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreConfig {
    pub root: PathBuf,
    pub suffixes: SuffixTable,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl DataStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffixes: SuffixTable::default(),
        }
    }

    pub fn from_env() -> Self {
        let root = env::var(DATA_DIR_ENV).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
        Self::new(root)
    }

    pub fn with_suffixes(mut self, suffixes: SuffixTable) -> Self {
        self.suffixes = suffixes;
        self
    }

    pub fn path_for(&self, model_id: &str, file: DataFile) -> PathBuf {
        artifact_path(&self.root, &self.suffixes, model_id, file)
    }
}

/// `<root>/<model_id>/<model_id><suffix>`
pub fn artifact_path(root: &Path, suffixes: &SuffixTable, model_id: &str, file: DataFile) -> PathBuf {
    root.join(model_id)
        .join(format!("{}{}", model_id, suffixes.suffix(file)))
}

/// Model ids name a directory, so they must be a single plain path component
pub fn validate_model_id(model_id: &str) -> CalibrationResult<()> {
    let trimmed = model_id.trim();
    if trimmed.is_empty() || trimmed != model_id {
        return Err(CalibrationError::not_found(model_id, "model id is empty or padded"));
    }
    if model_id == "." || model_id == ".." || model_id.contains(['/', '\\']) {
        return Err(CalibrationError::not_found(
            model_id,
            "model id must be a single path component",
        ));
    }
    Ok(())
}
