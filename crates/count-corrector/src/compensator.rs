//! Linear Count Compensation
//!
//! Corrects raw parasitemia with a y = m x + b fit computed by comparing the
//! instrument's estimates against a reference (clinical PCR or cultured
//! samples). The interval combines binomial counting error on the raw ratio
//! with the fit's own parameter uncertainty.

use calibration_store::{
    CalibrationFit, CalibrationProvider, CompensationOptions, DataStoreConfig, FileStore,
};
use parasitemia_core::{
    CalibrationError, CalibrationResult, ClassCounts, ClassSchema, ParasitemiaResult, Units,
};
use serde::{Deserialize, Serialize};

use crate::corrector::{confidence_interval, counting_variance, require_countable};

/// Threshold the instrument runs its classifier at by default
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.90;

/// Options for building a [`CountCompensator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensatorConfig {
    /// Selects the fit row; must lie in (0, 1]
    pub confidence_threshold: f64,
    /// Bypass the affine correction and report raw statistics
    pub skip: bool,
    /// Which compensation table to read
    pub options: CompensationOptions,
    pub schema: ClassSchema,
}

impl Default for CompensatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl CompensatorConfig {
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold,
            skip: false,
            options: CompensationOptions::default(),
            schema: ClassSchema::default(),
        }
    }

    /// Raw statistics only, no fit is loaded
    pub fn skipped(confidence_threshold: f64) -> Self {
        Self {
            skip: true,
            ..Self::new(confidence_threshold)
        }
    }

    pub fn with_options(mut self, options: CompensationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_schema(mut self, schema: ClassSchema) -> Self {
        self.schema = schema;
        self
    }

    fn validate(&self) -> CalibrationResult<()> {
        let t = self.confidence_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "confidence threshold must be in (0, 1], got {}",
                t
            )));
        }
        Ok(())
    }
}

/// Calibrated parasitemia estimates for one model and confidence threshold
#[derive(Debug, Clone)]
pub struct CountCompensator {
    model_id: String,
    config: CompensatorConfig,
    fit: CalibrationFit,
}

impl CountCompensator {
    pub fn new<P>(provider: &P, model_id: &str, config: CompensatorConfig) -> CalibrationResult<Self>
    where
        P: CalibrationProvider + ?Sized,
    {
        config.validate()?;

        let fit = if config.skip {
            CalibrationFit::identity(config.confidence_threshold)
        } else {
            let fit = provider.load_fit(model_id, config.confidence_threshold, config.options)?;
            if fit.b < 0.0 {
                tracing::warn!(model_id, b = fit.b, "Ignoring negative compensation intercept");
            }
            fit.without_negative_intercept()
        };

        Ok(Self {
            model_id: model_id.to_string(),
            config,
            fit,
        })
    }

    /// Build against the on-disk data store
    pub fn from_store(
        store: &DataStoreConfig,
        model_id: &str,
        config: CompensatorConfig,
    ) -> CalibrationResult<Self> {
        Self::new(&FileStore::new(store.clone()), model_id, config)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn fit(&self) -> &CalibrationFit {
        &self.fit
    }

    pub fn is_skipped(&self) -> bool {
        self.config.skip
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    pub fn schema(&self) -> &ClassSchema {
        &self.config.schema
    }

    /// Raw parasitemia as a fraction of countable cells
    pub fn calc_parasitemia(&self, counts: &ClassCounts) -> CalibrationResult<f64> {
        let (parasites, total) = self.tally(counts)?;
        Ok(parasites / total)
    }

    /// Compensated parasitemia and its 95% confidence bounds
    pub fn get_res_from_counts(
        &self,
        counts: &ClassCounts,
        units: Units,
    ) -> CalibrationResult<ParasitemiaResult> {
        let (parasites, total) = self.tally(counts)?;
        Ok(self.compensate(parasites, total, units))
    }

    /// Compensate a parasitemia that was computed elsewhere.
    ///
    /// `total_cells` is the countable cell total the raw value was derived
    /// from; it sets the counting error. Negative raw values are treated as 0.
    pub fn compensate_parasitemia(
        &self,
        raw_parasitemia: f64,
        total_cells: f64,
        units_in: Units,
        units_out: Units,
    ) -> CalibrationResult<ParasitemiaResult> {
        let total = require_countable(total_cells, "the supplied cell total")?;
        if !raw_parasitemia.is_finite() {
            return Err(CalibrationError::InvalidInput(format!(
                "raw parasitemia must be finite, got {}",
                raw_parasitemia
            )));
        }

        let fraction = units_in.to_fraction(raw_parasitemia.max(0.0));
        if fraction > 1.0 {
            return Err(CalibrationError::InvalidInput(format!(
                "raw parasitemia {} {} exceeds every cell",
                raw_parasitemia, units_in
            )));
        }

        Ok(self.compensate(fraction * total, total, units_out))
    }

    fn tally(&self, counts: &ClassCounts) -> CalibrationResult<(f64, f64)> {
        let values = counts.to_f64();
        let total = require_countable(self.config.schema.countable_total(&values), "class counts")?;
        Ok((self.config.schema.parasite_total(&values), total))
    }

    fn compensate(&self, parasites: f64, total: f64, units: Units) -> ParasitemiaResult {
        let raw = parasites / total;
        let raw_variance = counting_variance(parasites, total);

        let estimate = self.fit.apply(raw);
        let variance = self.fit.propagate_variance(raw, raw_variance);

        confidence_interval(estimate, variance, units)
    }
}
