use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CalibrationError, CalibrationResult};

/// Number of classes emitted by the cell classifier
pub const NUM_CLASSES: usize = 7;

/// Cell classes in the classifier's output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellClass {
    Healthy,
    Ring,
    Trophozoite,
    Schizont,
    Gametocyte,
    Wbc,
    Misc,
}

impl CellClass {
    pub const ALL: [CellClass; NUM_CLASSES] = [
        CellClass::Healthy,
        CellClass::Ring,
        CellClass::Trophozoite,
        CellClass::Schizont,
        CellClass::Gametocyte,
        CellClass::Wbc,
        CellClass::Misc,
    ];

    /// Column index of this class in a count vector
    pub fn index(&self) -> usize {
        match self {
            CellClass::Healthy => 0,
            CellClass::Ring => 1,
            CellClass::Trophozoite => 2,
            CellClass::Schizont => 3,
            CellClass::Gametocyte => 4,
            CellClass::Wbc => 5,
            CellClass::Misc => 6,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CellClass::Healthy => "healthy",
            CellClass::Ring => "ring",
            CellClass::Trophozoite => "trophozoite",
            CellClass::Schizont => "schizont",
            CellClass::Gametocyte => "gametocyte",
            CellClass::Wbc => "wbc",
            CellClass::Misc => "misc",
        }
    }
}

impl fmt::Display for CellClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw per-class cell counts from the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassCounts([u64; NUM_CLASSES]);

impl ClassCounts {
    pub fn new(counts: [u64; NUM_CLASSES]) -> Self {
        Self(counts)
    }

    /// Validate an untrusted count vector.
    ///
    /// Fails when the slice does not hold exactly one entry per class or any
    /// entry is negative.
    pub fn try_from_slice(counts: &[i64]) -> CalibrationResult<Self> {
        if counts.len() != NUM_CLASSES {
            return Err(CalibrationError::InvalidInput(format!(
                "expected {} class counts, got {}",
                NUM_CLASSES,
                counts.len()
            )));
        }

        let mut out = [0u64; NUM_CLASSES];
        for (idx, &count) in counts.iter().enumerate() {
            if count < 0 {
                return Err(CalibrationError::InvalidInput(format!(
                    "negative count {} for class '{}'",
                    count,
                    CellClass::ALL[idx]
                )));
            }
            out[idx] = count as u64;
        }

        Ok(Self(out))
    }

    pub fn get(&self, class: CellClass) -> u64 {
        self.0[class.index()]
    }

    pub fn as_array(&self) -> &[u64; NUM_CLASSES] {
        &self.0
    }

    pub fn to_f64(&self) -> [f64; NUM_CLASSES] {
        self.0.map(|c| c as f64)
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }
}

impl From<[u64; NUM_CLASSES]> for ClassCounts {
    fn from(counts: [u64; NUM_CLASSES]) -> Self {
        Self(counts)
    }
}

impl TryFrom<&[i64]> for ClassCounts {
    type Error = CalibrationError;

    fn try_from(counts: &[i64]) -> CalibrationResult<Self> {
        Self::try_from_slice(counts)
    }
}

/// Counts after confusion-matrix deskewing.
///
/// Entries are fractional and never negative. The total is not renormalized
/// against the raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeskewedCounts([f64; NUM_CLASSES]);

impl DeskewedCounts {
    /// Build from an unconstrained vector, clamping negative (and NaN) entries to zero
    pub fn clamped(values: [f64; NUM_CLASSES]) -> Self {
        Self(values.map(|v| if v > 0.0 { v } else { 0.0 }))
    }

    pub fn get(&self, class: CellClass) -> f64 {
        self.0[class.index()]
    }

    pub fn as_array(&self) -> &[f64; NUM_CLASSES] {
        &self.0
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }
}

/// Which classes count as parasites and which make up the denominator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema")]
pub struct ClassSchema {
    parasites: Vec<CellClass>,
    countable: Vec<CellClass>,
}

impl Default for ClassSchema {
    /// All parasite stages over every countable cell (misc excluded)
    fn default() -> Self {
        Self {
            parasites: vec![
                CellClass::Ring,
                CellClass::Trophozoite,
                CellClass::Schizont,
                CellClass::Gametocyte,
            ],
            countable: vec![
                CellClass::Healthy,
                CellClass::Ring,
                CellClass::Trophozoite,
                CellClass::Schizont,
                CellClass::Gametocyte,
                CellClass::Wbc,
            ],
        }
    }
}

impl ClassSchema {
    pub fn new(parasites: Vec<CellClass>, countable: Vec<CellClass>) -> CalibrationResult<Self> {
        ensure_unique(&parasites, "parasite")?;
        ensure_unique(&countable, "countable")?;
        if parasites.is_empty() {
            return Err(CalibrationError::InvalidInput(
                "schema needs at least one parasite class".to_string(),
            ));
        }
        if let Some(stray) = parasites.iter().find(|c| !countable.contains(c)) {
            return Err(CalibrationError::InvalidInput(format!(
                "parasite class '{}' is not part of the countable cells",
                stray
            )));
        }

        Ok(Self {
            parasites,
            countable,
        })
    }

    /// Asexual stages over red blood cells only
    pub fn asexual_rbc() -> Self {
        Self {
            parasites: vec![CellClass::Ring, CellClass::Trophozoite, CellClass::Schizont],
            countable: vec![
                CellClass::Healthy,
                CellClass::Ring,
                CellClass::Trophozoite,
                CellClass::Schizont,
            ],
        }
    }

    pub fn parasites(&self) -> &[CellClass] {
        &self.parasites
    }

    pub fn countable(&self) -> &[CellClass] {
        &self.countable
    }

    pub fn is_parasite(&self, class: CellClass) -> bool {
        self.parasites.contains(&class)
    }

    pub fn parasite_total(&self, counts: &[f64; NUM_CLASSES]) -> f64 {
        self.parasites.iter().map(|c| counts[c.index()]).sum()
    }

    pub fn countable_total(&self, counts: &[f64; NUM_CLASSES]) -> f64 {
        self.countable.iter().map(|c| counts[c.index()]).sum()
    }
}

#[derive(Deserialize)]
struct RawSchema {
    parasites: Vec<CellClass>,
    countable: Vec<CellClass>,
}

impl TryFrom<RawSchema> for ClassSchema {
    type Error = CalibrationError;

    fn try_from(raw: RawSchema) -> CalibrationResult<Self> {
        Self::new(raw.parasites, raw.countable)
    }
}

/// A class listed twice would be summed twice
fn ensure_unique(classes: &[CellClass], role: &str) -> CalibrationResult<()> {
    let mut seen = [false; NUM_CLASSES];
    for class in classes {
        if std::mem::replace(&mut seen[class.index()], true) {
            return Err(CalibrationError::InvalidInput(format!(
                "{} class '{}' is listed more than once",
                role, class
            )));
        }
    }
    Ok(())
}
