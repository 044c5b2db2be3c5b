use parasitemia_core::{CalibrationError, CalibrationResult};

use crate::config::{validate_model_id, CompensationOptions, DataFile, DataStoreConfig};
use crate::fit::{load_fit, CalibrationFit};
use crate::matrix::{load_matrix, ConfusionMatrix};

/// Source of calibration constants for a classifier model
pub trait CalibrationProvider: Send + Sync {
    /// Compensation fit computed at `confidence_threshold`
    fn load_fit(
        &self,
        model_id: &str,
        confidence_threshold: f64,
        options: CompensationOptions,
    ) -> CalibrationResult<CalibrationFit>;

    fn load_confusion(&self, model_id: &str) -> CalibrationResult<ConfusionMatrix>;
}

/// Reads calibration artifacts from the data directory
#[derive(Debug, Clone, Default)]
pub struct FileStore {
    config: DataStoreConfig,
}

impl FileStore {
    pub fn new(config: DataStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }
}

impl CalibrationProvider for FileStore {
    fn load_fit(
        &self,
        model_id: &str,
        confidence_threshold: f64,
        options: CompensationOptions,
    ) -> CalibrationResult<CalibrationFit> {
        validate_model_id(model_id)?;
        let path = self.config.path_for(model_id, DataFile::Compensation(options));
        tracing::debug!(model_id, path = %path.display(), "Resolving compensation fit");

        let fit = load_fit(&path, model_id, confidence_threshold)?;
        tracing::info!(
            model_id,
            threshold = fit.confidence_threshold,
            m = fit.m,
            b = fit.b,
            "Loaded compensation fit"
        );
        Ok(fit)
    }

    fn load_confusion(&self, model_id: &str) -> CalibrationResult<ConfusionMatrix> {
        validate_model_id(model_id)?;
        let mean_path = self.config.path_for(model_id, DataFile::ConfusionMean);
        let std_path = self.config.path_for(model_id, DataFile::InverseConfusionStd);
        tracing::debug!(
            model_id,
            mean = %mean_path.display(),
            inverse_std = %std_path.display(),
            "Resolving confusion matrix"
        );

        let mean = load_matrix(&mean_path, model_id, "confusion matrix mean")?;
        let inverse_std = load_matrix(&std_path, model_id, "inverse confusion matrix std")?;

        if inverse_std.iter().any(|&v| v < 0.0) {
            return Err(CalibrationError::malformed(
                &std_path,
                "standard errors must be non-negative",
            ));
        }

        let matrix = ConfusionMatrix::try_new(mean, inverse_std)
            .ok_or_else(|| CalibrationError::malformed(&mean_path, "confusion matrix is singular"))?;
        tracing::info!(model_id, "Loaded confusion matrix");
        Ok(matrix)
    }
}
