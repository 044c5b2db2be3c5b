//! Uncertainty rules shared by the compensator and the deskewer.
//!
//! Both strategies reduce to a parasite count P out of N countable cells plus
//! a variance on the ratio P/N. The 95% interval is a normal approximation
//! (estimate +/- 1.96 sigma) with the lower bound clamped at zero. When no
//! parasites were seen the binomial variance collapses, so the rule of three
//! (3/N as the 95% upper bound) is used instead.

use parasitemia_core::{CalibrationError, CalibrationResult, ParasitemiaResult, Units};

/// Two-sided 95% z-score
pub const Z_95: f64 = 1.96;

/// 95% upper bound on the event count when none were observed
pub const RULE_OF_THREE: f64 = 3.0;

/// Variance of an observed proportion `p` over `n` trials
pub fn binomial_variance(p: f64, n: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    p * (1.0 - p) / n
}

/// Variance whose 95% half-width equals the rule-of-three bound 3/n
pub fn zero_count_variance(n: f64) -> f64 {
    (RULE_OF_THREE / (Z_95 * n)).powi(2)
}

/// Counting variance of the ratio `parasites / total`
pub fn counting_variance(parasites: f64, total: f64) -> f64 {
    if parasites <= 0.0 {
        zero_count_variance(total)
    } else {
        binomial_variance(parasites / total, total)
    }
}

/// Reject a zero (or non-finite) denominator
pub fn require_countable(total: f64, what: &str) -> CalibrationResult<f64> {
    if total > 0.0 && total.is_finite() {
        Ok(total)
    } else {
        Err(CalibrationError::InvalidInput(format!(
            "no countable cells in {}: parasitemia is undefined",
            what
        )))
    }
}

/// 95% interval around a fraction-valued estimate, expressed in `units`
pub fn confidence_interval(estimate: f64, variance: f64, units: Units) -> ParasitemiaResult {
    let estimate = estimate.max(0.0);
    let half_width = Z_95 * variance.max(0.0).sqrt();

    let lower = (estimate - half_width).max(0.0);
    let upper = estimate + half_width;

    ParasitemiaResult::from_fraction(estimate, lower, upper, units)
}
