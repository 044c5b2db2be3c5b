//! Linear compensation fits (y = m x + b) against a reference measurement.
//!
//! Each model ships CSV tables with one fit per confidence threshold:
//!
//! ```text
//! conf_val,fit_m,fit_b,cov_m,cov_b[,cov_mb]
//! 0.9,1.12,410.0,0.05,120.0
//! ```
//!
//! `fit_b`, `cov_b` and `cov_mb` are stored in parasites/uL and converted to
//! fractions on load. `cov_m` and `cov_b` hold standard deviations.

use parasitemia_core::{CalibrationError, CalibrationResult, RBCS_PER_UL};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Two thresholds closer than this select the same fit row
pub const THRESHOLD_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Deserialize)]
struct FitRow {
    conf_val: f64,
    fit_m: f64,
    fit_b: f64,
    cov_m: f64,
    cov_b: f64,
    #[serde(default)]
    cov_mb: Option<f64>,
}

/// Affine calibration y = m x + b with parameter uncertainty, in fraction units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFit {
    pub confidence_threshold: f64,
    pub m: f64,
    pub b: f64,
    /// Standard deviation of m
    pub std_m: f64,
    /// Standard deviation of b
    pub std_b: f64,
    /// Covariance of m and b
    pub cov_mb: f64,
}

impl CalibrationFit {
    /// Fit that leaves parasitemia untouched and adds no uncertainty
    pub fn identity(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
            m: 1.0,
            b: 0.0,
            std_m: 0.0,
            std_b: 0.0,
            cov_mb: 0.0,
        }
    }

    fn from_row(row: &FitRow) -> Self {
        Self {
            confidence_threshold: row.conf_val,
            m: row.fit_m,
            b: row.fit_b / RBCS_PER_UL,
            std_m: row.cov_m,
            std_b: row.cov_b / RBCS_PER_UL,
            cov_mb: row.cov_mb.unwrap_or(0.0) / RBCS_PER_UL,
        }
    }

    /// A negative intercept is not physical: drop it together with its uncertainty
    pub fn without_negative_intercept(self) -> Self {
        if self.b >= 0.0 {
            return self;
        }
        Self {
            b: 0.0,
            std_b: 0.0,
            cov_mb: 0.0,
            ..self
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        self.m * raw + self.b
    }

    /// First-order variance of `apply(raw)` given the variance of `raw`
    pub fn propagate_variance(&self, raw: f64, raw_variance: f64) -> f64 {
        let var = self.m.powi(2) * raw_variance
            + raw.powi(2) * self.std_m.powi(2)
            + self.std_b.powi(2)
            + 2.0 * raw * self.cov_mb;
        var.max(0.0)
    }

    pub fn matches_threshold(&self, threshold: f64) -> bool {
        (self.confidence_threshold - threshold).abs() <= THRESHOLD_TOLERANCE
    }
}

/// Parse every row of a compensation table
pub fn parse_fit_table<R: Read>(reader: R, path: &Path) -> CalibrationResult<Vec<CalibrationFit>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut fits = Vec::new();
    for (line, result) in reader.deserialize::<FitRow>().enumerate() {
        let row = result.map_err(|e| {
            CalibrationError::malformed(path, format!("row {}: {}", line + 1, e))
        })?;

        let values = [row.conf_val, row.fit_m, row.fit_b, row.cov_m, row.cov_b];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::malformed(
                path,
                format!("row {}: non-finite fit value", line + 1),
            ));
        }
        if row.fit_m <= 0.0 {
            return Err(CalibrationError::malformed(
                path,
                format!("row {}: slope must be positive, got {}", line + 1, row.fit_m),
            ));
        }

        fits.push(CalibrationFit::from_row(&row));
    }

    tracing::debug!(path = %path.display(), rows = fits.len(), "Parsed compensation table");
    Ok(fits)
}

/// Pick the fit computed at `threshold`
pub fn select_threshold(
    fits: &[CalibrationFit],
    threshold: f64,
    model_id: &str,
) -> CalibrationResult<CalibrationFit> {
    fits.iter()
        .filter(|fit| fit.matches_threshold(threshold))
        .min_by(|a, b| {
            let da = (a.confidence_threshold - threshold).abs();
            let db = (b.confidence_threshold - threshold).abs();
            da.total_cmp(&db)
        })
        .copied()
        .ok_or_else(|| {
            let defined: Vec<String> = fits
                .iter()
                .map(|f| format!("{}", f.confidence_threshold))
                .collect();
            CalibrationError::not_found(
                model_id,
                format!(
                    "no compensation fit for confidence threshold {} (defined: [{}])",
                    threshold,
                    defined.join(", ")
                ),
            )
        })
}

/// Load the fit for `threshold` from the table at `path`
pub fn load_fit(path: &Path, model_id: &str, threshold: f64) -> CalibrationResult<CalibrationFit> {
    if !path.is_file() {
        return Err(CalibrationError::not_found(
            model_id,
            format!("could not find compensation metrics ({})", path.display()),
        ));
    }

    let file = File::open(path).map_err(|source| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let fits = parse_fit_table(file, path)?;
    select_threshold(&fits, threshold, model_id)
}
