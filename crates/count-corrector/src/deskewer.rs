//! Confusion-Matrix Deskewing (experimental)
//!
//! Observed counts are modelled as `observed = true · C` where C is the
//! model's row-normalized confusion matrix, so `true ≈ observed · C⁻¹`.
//! The inverse is built from the mean of k confusion matrices computed on
//! disjoint partitions of the training data; the standard deviation of each
//! inverse entry across those partitions feeds the uncertainty.
//!
//! Negative deskewed counts are clamped to zero and the clamped mass is not
//! redistributed, so the deskewed total may differ from the raw total. This
//! is auxiliary tooling; the compensator is the production path.

use calibration_store::{CalibrationProvider, ConfusionMatrix, DataStoreConfig, FileStore};
use nalgebra::RowSVector;
use parasitemia_core::{
    CalibrationResult, ClassCounts, ClassSchema, DeskewedCounts, ParasitemiaResult, Units,
    NUM_CLASSES,
};

use crate::corrector::{confidence_interval, require_countable, zero_count_variance};

type CountRow = RowSVector<f64, NUM_CLASSES>;

#[derive(Debug, Clone)]
pub struct CountDeskewer {
    model_id: String,
    matrix: ConfusionMatrix,
    schema: ClassSchema,
}

impl CountDeskewer {
    pub fn new<P>(provider: &P, model_id: &str) -> CalibrationResult<Self>
    where
        P: CalibrationProvider + ?Sized,
    {
        let matrix = provider.load_confusion(model_id)?;
        Ok(Self::from_matrix(model_id, matrix))
    }

    pub fn from_store(store: &DataStoreConfig, model_id: &str) -> CalibrationResult<Self> {
        Self::new(&FileStore::new(store.clone()), model_id)
    }

    pub fn from_matrix(model_id: &str, matrix: ConfusionMatrix) -> Self {
        Self {
            model_id: model_id.to_string(),
            matrix,
            schema: ClassSchema::default(),
        }
    }

    pub fn with_schema(mut self, schema: ClassSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    pub fn schema(&self) -> &ClassSchema {
        &self.schema
    }

    /// Estimate the true class distribution behind `counts`
    pub fn deskew(&self, counts: &ClassCounts) -> DeskewedCounts {
        let corrected = row_of(counts) * self.matrix.inverse();
        DeskewedCounts::clamped(std::array::from_fn(|j| corrected[j]))
    }

    /// Variance of each deskewed class count.
    ///
    /// Sum of the Poisson term `Σ_i n_i · inv_ij²` and the matrix estimation
    /// term `Σ_i n_i² · σ_ij²`.
    pub fn count_variances(&self, counts: &ClassCounts) -> [f64; NUM_CLASSES] {
        let row = row_of(counts);
        let inverse = self.matrix.inverse();
        let inverse_std = self.matrix.inverse_std();

        let poisson = row * inverse.component_mul(inverse);
        let deskew = row.component_mul(&row) * inverse_std.component_mul(inverse_std);

        std::array::from_fn(|j| poisson[j] + deskew[j])
    }

    /// Parasitemia fraction of the deskewed counts
    pub fn calc_parasitemia(&self, counts: &ClassCounts) -> CalibrationResult<f64> {
        let deskewed = self.deskew(counts);
        let total = require_countable(
            self.schema.countable_total(deskewed.as_array()),
            "deskewed counts",
        )?;
        Ok(self.schema.parasite_total(deskewed.as_array()) / total)
    }

    /// Deskewed parasitemia with a 95% interval from Poisson and matrix error
    pub fn deskewed_parasitemia_interval(
        &self,
        counts: &ClassCounts,
        units: Units,
    ) -> CalibrationResult<ParasitemiaResult> {
        self.deskew_with_interval(counts, units).map(|(_, res)| res)
    }

    /// Deskewed counts together with the resulting parasitemia interval
    pub fn deskew_with_interval(
        &self,
        counts: &ClassCounts,
        units: Units,
    ) -> CalibrationResult<(DeskewedCounts, ParasitemiaResult)> {
        let deskewed = self.deskew(counts);
        let values = deskewed.as_array();

        let total = require_countable(self.schema.countable_total(values), "deskewed counts")?;
        let parasites = self.schema.parasite_total(values);

        let variance = if parasites <= 0.0 {
            zero_count_variance(total)
        } else {
            let count_vars = self.count_variances(counts);
            let parasite_var: f64 = self
                .schema
                .parasites()
                .iter()
                .map(|class| count_vars[class.index()])
                .sum();
            parasite_var / total.powi(2)
        };

        let res = confidence_interval(parasites / total, variance, units);
        Ok((deskewed, res))
    }
}

fn row_of(counts: &ClassCounts) -> CountRow {
    CountRow::from_row_slice(&counts.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use calibration_store::{ClassMatrix, CompensationOptions, CalibrationFit};
    use parasitemia_core::{CalibrationError, CellClass};
    use std::fs;
    use tempfile::TempDir;

    const MODEL: &str = "frightful-wendigo-1931";

    /// 10% of true rings are called healthy
    fn ring_leak() -> ConfusionMatrix {
        let mut mean = ClassMatrix::identity();
        mean[(1, 0)] = 0.1;
        mean[(1, 1)] = 0.9;
        ConfusionMatrix::try_new(mean, ClassMatrix::zeros()).unwrap()
    }

    struct Fixed(Option<ConfusionMatrix>);

    impl CalibrationProvider for Fixed {
        fn load_fit(
            &self,
            model_id: &str,
            _threshold: f64,
            _options: CompensationOptions,
        ) -> CalibrationResult<CalibrationFit> {
            Err(CalibrationError::not_found(model_id, "no fits"))
        }

        fn load_confusion(&self, model_id: &str) -> CalibrationResult<ConfusionMatrix> {
            self.0
                .clone()
                .ok_or_else(|| CalibrationError::not_found(model_id, "no confusion data"))
        }
    }

    #[test]
    fn test_identity_matrix_leaves_counts_unchanged() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ConfusionMatrix::identity());
        let counts = ClassCounts::new([100000, 60, 40, 20, 10, 150, 200]);

        let deskewed = deskewer.deskew(&counts);
        assert_eq!(deskewed.as_array(), &counts.to_f64());
    }

    #[test]
    fn test_deskew_recovers_true_counts() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ring_leak());

        // true [1000, 100, 0, 0, 0, 10, 0] observed through the leak
        let observed = ClassCounts::new([1010, 90, 0, 0, 0, 10, 0]);
        let deskewed = deskewer.deskew(&observed);

        assert_relative_eq!(deskewed.get(CellClass::Healthy), 1000.0, epsilon = 1e-9);
        assert_relative_eq!(deskewed.get(CellClass::Ring), 100.0, epsilon = 1e-9);
        assert_relative_eq!(deskewed.get(CellClass::Wbc), 10.0, epsilon = 1e-9);

        let p = deskewer.calc_parasitemia(&observed).unwrap();
        assert_relative_eq!(p, 100.0 / 1110.0, max_relative = 1e-9);
    }

    #[test]
    fn test_negative_counts_clamped_without_renormalizing() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ring_leak());

        // healthy = 0 - 9 / 9 = -1 before clamping
        let observed = ClassCounts::new([0, 9, 0, 0, 0, 0, 0]);
        let deskewed = deskewer.deskew(&observed);

        assert_eq!(deskewed.get(CellClass::Healthy), 0.0);
        assert_relative_eq!(deskewed.get(CellClass::Ring), 10.0, epsilon = 1e-9);
        assert_relative_eq!(deskewed.total(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_count_variances_identity() {
        let mut inverse_std = ClassMatrix::zeros();
        inverse_std[(1, 1)] = 0.1;
        let matrix = ConfusionMatrix::try_new(ClassMatrix::identity(), inverse_std).unwrap();
        let deskewer = CountDeskewer::from_matrix(MODEL, matrix);

        let counts = ClassCounts::new([1000, 50, 0, 0, 0, 0, 0]);
        let vars = deskewer.count_variances(&counts);

        assert_relative_eq!(vars[0], 1000.0, max_relative = 1e-12);
        // 50 (Poisson) + 50² · 0.1² (matrix)
        assert_relative_eq!(vars[1], 75.0, max_relative = 1e-12);
        assert_eq!(vars[2], 0.0);
    }

    #[test]
    fn test_interval_identity_matches_poisson() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ConfusionMatrix::identity());
        let counts = ClassCounts::new([1000, 40, 0, 0, 0, 0, 0]);

        let res = deskewer
            .deskewed_parasitemia_interval(&counts, Units::Fraction)
            .unwrap();
        assert_relative_eq!(res.estimate, 40.0 / 1040.0, max_relative = 1e-12);
        assert_relative_eq!(
            res.half_width(),
            1.96 * 40.0f64.sqrt() / 1040.0,
            max_relative = 1e-9
        );
        assert!(res.lower > 0.0 && res.lower < res.estimate);
    }

    #[test]
    fn test_interval_zero_parasites_uses_rule_of_three() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ConfusionMatrix::identity());
        let counts = ClassCounts::new([2000, 0, 0, 0, 0, 0, 0]);

        let res = deskewer
            .deskewed_parasitemia_interval(&counts, Units::Percent)
            .unwrap();
        assert_eq!(res.estimate, 0.0);
        assert_eq!(res.lower, 0.0);
        assert_relative_eq!(res.upper, 100.0 * 3.0 / 2000.0, max_relative = 1e-9);
    }

    #[test]
    fn test_interval_units_and_bounds() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ring_leak());
        let counts = ClassCounts::new([1010, 90, 0, 0, 0, 10, 0]);

        let (deskewed, pct) = deskewer.deskew_with_interval(&counts, Units::Percent).unwrap();
        let ul = deskewer
            .deskewed_parasitemia_interval(&counts, Units::PerMicroliter)
            .unwrap();

        assert_relative_eq!(deskewed.get(CellClass::Ring), 100.0, epsilon = 1e-9);
        assert_relative_eq!(pct.estimate * 50_000.0, ul.estimate, max_relative = 1e-12);
        assert!(ul.lower <= ul.estimate && ul.estimate <= ul.upper);
        assert!(ul.lower >= 0.0);
    }

    #[test]
    fn test_all_zero_counts_rejected() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ConfusionMatrix::identity());
        let err = deskewer
            .deskewed_parasitemia_interval(&ClassCounts::default(), Units::Percent)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidInput(_)));
        assert!(deskewer.calc_parasitemia(&ClassCounts::default()).is_err());
    }

    #[test]
    fn test_construction_via_provider() {
        let deskewer = CountDeskewer::new(&Fixed(Some(ring_leak())), MODEL).unwrap();
        assert_eq!(deskewer.model_id(), MODEL);
        assert_eq!(deskewer.matrix(), &ring_leak());

        let err = CountDeskewer::new(&Fixed(None), "no-such-model-1").unwrap_err();
        assert!(matches!(err, CalibrationError::CalibrationNotFound { .. }));
    }

    #[test]
    fn test_unknown_model_in_store() {
        let dir = TempDir::new().unwrap();
        let store = DataStoreConfig::new(dir.path());

        let err = CountDeskewer::from_store(&store, "no-such-model-1").unwrap_err();
        assert!(matches!(err, CalibrationError::CalibrationNotFound { .. }));
    }

    #[test]
    fn test_from_store() {
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join(MODEL);
        fs::create_dir_all(&model_dir).unwrap();

        let identity = "1,0,0,0,0,0,0\n0,1,0,0,0,0,0\n0,0,1,0,0,0,0\n0,0,0,1,0,0,0\n\
                        0,0,0,0,1,0,0\n0,0,0,0,0,1,0\n0,0,0,0,0,0,1\n";
        let zeros = "0,0,0,0,0,0,0\n".repeat(7);
        fs::write(model_dir.join(format!("{MODEL}-cmatrix-mean.csv")), identity).unwrap();
        fs::write(model_dir.join(format!("{MODEL}-inv-cmatrix-std.csv")), zeros).unwrap();

        let deskewer = CountDeskewer::from_store(&DataStoreConfig::new(dir.path()), MODEL).unwrap();
        let counts = ClassCounts::new([500, 5, 0, 0, 0, 1, 0]);
        assert_eq!(deskewer.deskew(&counts).as_array(), &counts.to_f64());
    }

    #[test]
    fn test_custom_schema() {
        let deskewer = CountDeskewer::from_matrix(MODEL, ConfusionMatrix::identity())
            .with_schema(ClassSchema::asexual_rbc());
        let counts = ClassCounts::new([990, 5, 3, 2, 4, 100, 7]);

        let p = deskewer.calc_parasitemia(&counts).unwrap();
        assert_relative_eq!(p, 10.0 / 1000.0, max_relative = 1e-12);
    }

    #[test]
    fn test_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CountDeskewer>();
    }
}
