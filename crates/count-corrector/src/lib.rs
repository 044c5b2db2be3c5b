//! Count Corrector
//!
//! Turns raw classifier cell counts into a calibrated parasitemia estimate with
//! a 95% confidence interval. Two strategies share the same propagation rules:
//! linear compensation against a reference measurement, and (experimental)
//! confusion-matrix deskewing.

pub mod compensator;
pub mod corrector;
pub mod deskewer;

pub use compensator::{CompensatorConfig, CountCompensator};
pub use deskewer::CountDeskewer;

pub use calibration_store::{
    CalibrationFit, CalibrationProvider, CompensationOptions, ConfusionMatrix, DataStoreConfig,
    Dataset, FileStore,
};
pub use parasitemia_core::{
    CalibrationError, CalibrationResult, CellClass, ClassCounts, ClassSchema, DeskewedCounts,
    ParasitemiaResult, Units,
};
