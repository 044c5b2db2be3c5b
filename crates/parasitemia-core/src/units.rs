//! Parasitemia units and the result type shared by every correction strategy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Red blood cells per microliter of whole blood assumed by the instrument.
/// parasites/uL = parasitemia fraction x RBCS_PER_UL
pub const RBCS_PER_UL: f64 = 5e6;

/// Output unit for a parasitemia estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    /// Dimensionless ratio in [0, 1]
    Fraction,
    /// Ratio x 100
    #[default]
    Percent,
    /// Parasites per microliter of blood
    PerMicroliter,
}

impl Units {
    /// Multiplier that turns a fraction into this unit
    pub fn scale(&self) -> f64 {
        match self {
            Units::Fraction => 1.0,
            Units::Percent => 100.0,
            Units::PerMicroliter => RBCS_PER_UL,
        }
    }

    /// Express a fraction in this unit
    pub fn convert(self, fraction: f64) -> f64 {
        fraction * self.scale()
    }

    pub fn to_fraction(self, value: f64) -> f64 {
        value / self.scale()
    }

    /// Shorthand for the `units_ul_out` flag used by instrument callers
    pub fn from_ul_flag(units_ul_out: bool) -> Self {
        if units_ul_out {
            Units::PerMicroliter
        } else {
            Units::Percent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Fraction => "fraction",
            Units::Percent => "percent",
            Units::PerMicroliter => "parasites/uL",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fraction" => Ok(Units::Fraction),
            "percent" | "%" => Ok(Units::Percent),
            "ul" | "per_ul" | "per_microliter" | "parasites/ul" => Ok(Units::PerMicroliter),
            other => Err(format!("unknown units '{}'", other)),
        }
    }
}

/// Point estimate with a 95% confidence interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParasitemiaResult {
    pub estimate: f64,
    /// Lower bound, never negative
    pub lower: f64,
    pub upper: f64,
    pub units: Units,
}

impl ParasitemiaResult {
    /// Build a result from fraction-valued estimate and bounds
    pub fn from_fraction(estimate: f64, lower: f64, upper: f64, units: Units) -> Self {
        Self {
            estimate: units.convert(estimate),
            lower: units.convert(lower),
            upper: units.convert(upper),
            units,
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn as_tuple(&self) -> (f64, (f64, f64)) {
        (self.estimate, self.bounds())
    }

    /// Distance from the estimate to the upper bound
    pub fn half_width(&self) -> f64 {
        self.upper - self.estimate
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn to_units(&self, units: Units) -> Self {
        let factor = units.scale() / self.units.scale();
        Self {
            estimate: self.estimate * factor,
            lower: self.lower * factor,
            upper: self.upper * factor,
            units,
        }
    }
}

impl fmt::Display for ParasitemiaResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {} (95% CI {:.6}..{:.6})",
            self.estimate, self.units, self.lower, self.upper
        )
    }
}
