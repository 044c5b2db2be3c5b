//! Per-model confusion matrices.
//!
//! Stored as headerless CSV, one row per true class and one column per
//! predicted class, in classifier output order.

use nalgebra::SMatrix;
use parasitemia_core::{CalibrationError, CalibrationResult, NUM_CLASSES};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub type ClassMatrix = SMatrix<f64, NUM_CLASSES, NUM_CLASSES>;

/// Mean confusion matrix with its precomputed inverse and the standard error
/// of each inverse entry.
///
/// Only built through [`ConfusionMatrix::try_new`] so the inverse always
/// matches the mean; serialization is one-way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfusionMatrix {
    mean: ClassMatrix,
    inverse: ClassMatrix,
    inverse_std: ClassMatrix,
}

impl ConfusionMatrix {
    /// Returns `None` when the mean matrix cannot be inverted
    pub fn try_new(mean: ClassMatrix, inverse_std: ClassMatrix) -> Option<Self> {
        let inverse = mean.try_inverse()?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self {
            mean,
            inverse,
            inverse_std,
        })
    }

    /// A classifier that never confuses classes
    pub fn identity() -> Self {
        Self {
            mean: ClassMatrix::identity(),
            inverse: ClassMatrix::identity(),
            inverse_std: ClassMatrix::zeros(),
        }
    }

    pub fn mean(&self) -> &ClassMatrix {
        &self.mean
    }

    pub fn inverse(&self) -> &ClassMatrix {
        &self.inverse
    }

    pub fn inverse_std(&self) -> &ClassMatrix {
        &self.inverse_std
    }
}

/// Parse a 7x7 matrix from headerless CSV
pub fn parse_matrix<R: Read>(reader: R, path: &Path) -> CalibrationResult<ClassMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut matrix = ClassMatrix::zeros();
    let mut rows = 0;
    for result in reader.records() {
        let record = result.map_err(|e| CalibrationError::malformed(path, e.to_string()))?;
        if rows >= NUM_CLASSES {
            return Err(CalibrationError::malformed(
                path,
                format!("expected {} rows, found more", NUM_CLASSES),
            ));
        }
        if record.len() != NUM_CLASSES {
            return Err(CalibrationError::malformed(
                path,
                format!(
                    "row {}: expected {} columns, got {}",
                    rows + 1,
                    NUM_CLASSES,
                    record.len()
                ),
            ));
        }

        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| {
                CalibrationError::malformed(
                    path,
                    format!("row {}, column {}: '{}' is not a number", rows + 1, col + 1, field),
                )
            })?;
            if !value.is_finite() {
                return Err(CalibrationError::malformed(
                    path,
                    format!("row {}, column {}: non-finite value", rows + 1, col + 1),
                ));
            }
            matrix[(rows, col)] = value;
        }
        rows += 1;
    }

    if rows != NUM_CLASSES {
        return Err(CalibrationError::malformed(
            path,
            format!("expected {} rows, got {}", NUM_CLASSES, rows),
        ));
    }

    Ok(matrix)
}

/// Load a matrix file, reporting a missing file as absent calibration
pub fn load_matrix(path: &Path, model_id: &str, what: &str) -> CalibrationResult<ClassMatrix> {
    if !path.is_file() {
        return Err(CalibrationError::not_found(
            model_id,
            format!("could not find {} ({})", what, path.display()),
        ));
    }

    let file = File::open(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix(file, path)
}
