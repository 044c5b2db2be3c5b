use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration not found for model '{model_id}': {detail}")]
    CalibrationNotFound { model_id: String, detail: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed calibration file {}: {detail}", .path.display())]
    MalformedCalibration { path: PathBuf, detail: String },

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CalibrationError {
    pub fn not_found(model_id: impl Into<String>, detail: impl Into<String>) -> Self {
        CalibrationError::CalibrationNotFound {
            model_id: model_id.into(),
            detail: detail.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        CalibrationError::MalformedCalibration {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;
