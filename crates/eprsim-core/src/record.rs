//! Per-trial records and the per-station result arrays.
//!
//! A [`ResultSet`] is filled by exactly one station during a run and is
//! read-only afterwards. Row `i` of Alice's set and row `i` of Bob's set come
//! from the same emission event.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Ternary measurement outcome. `Undetected` is the non-detection channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Minus,
    #[default]
    Undetected,
    Plus,
}

impl Outcome {
    /// `+1` for positive, `-1` for negative, undetected for zero or NaN.
    pub fn from_sign(x: f64) -> Self {
        if x > 0.0 {
            Outcome::Plus
        } else if x < 0.0 {
            Outcome::Minus
        } else {
            Outcome::Undetected
        }
    }

    /// Decode a persisted outcome value. NaN is the legacy encoding of a
    /// non-detection and maps to [`Outcome::Undetected`].
    pub fn from_f64(value: f64, row: usize) -> Result<Self> {
        if value.is_nan() || value == 0.0 {
            Ok(Outcome::Undetected)
        } else if value == 1.0 {
            Ok(Outcome::Plus)
        } else if value == -1.0 {
            Ok(Outcome::Minus)
        } else {
            Err(SimError::InvalidOutcome { row, value })
        }
    }

    pub fn value(self) -> i8 {
        match self {
            Outcome::Minus => -1,
            Outcome::Undetected => 0,
            Outcome::Plus => 1,
        }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.value())
    }

    pub fn is_detected(self) -> bool {
        self != Outcome::Undetected
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minus => write!(f, "-"),
            Self::Undetected => write!(f, "0"),
            Self::Plus => write!(f, "+"),
        }
    }
}

/// One station's view of one trial: the setting it used and what it saw.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Detector orientation in radians, `[0, 2π)`.
    pub setting: f64,
    pub outcome: Outcome,
}

/// Hidden variables of the particle a station received in one trial.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HiddenVariables {
    pub emission_angle: f64,
    pub hidden_parameter: f64,
}

/// Fixed-length, ordered trial records of one station.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    records: Vec<TrialRecord>,
}

impl ResultSet {
    pub fn from_records(records: Vec<TrialRecord>) -> Self {
        Self { records }
    }

    /// Build from persisted `(setting, outcome)` rows, validating every row.
    pub fn from_rows(rows: &[[f64; 2]]) -> Result<Self> {
        let mut records = Vec::with_capacity(rows.len());
        for (row, &[setting, outcome]) in rows.iter().enumerate() {
            if !setting.is_finite() {
                return Err(SimError::NonFinite {
                    row,
                    column: "setting",
                });
            }
            records.push(TrialRecord {
                setting,
                outcome: Outcome::from_f64(outcome, row)?,
            });
        }
        Ok(Self { records })
    }

    /// Persistable `(setting, outcome)` rows.
    pub fn to_rows(&self) -> Vec<[f64; 2]> {
        self.records
            .iter()
            .map(|r| [r.setting, r.outcome.as_f64()])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&TrialRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrialRecord> {
        self.records.iter()
    }

    /// Number of trials with a non-zero outcome.
    pub fn detections(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_detected()).count()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a TrialRecord;
    type IntoIter = std::slice::Iter<'a, TrialRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Persistable `(emission_angle, hidden_parameter)` rows.
pub fn hidden_to_rows(hidden: &[HiddenVariables]) -> Vec<[f64; 2]> {
    hidden
        .iter()
        .map(|h| [h.emission_angle, h.hidden_parameter])
        .collect()
}

/// Companion rows back into hidden variables; both columns must be finite.
pub fn hidden_from_rows(rows: &[[f64; 2]]) -> Result<Vec<HiddenVariables>> {
    rows.iter()
        .enumerate()
        .map(|(row, &[emission_angle, hidden_parameter])| {
            if !emission_angle.is_finite() {
                return Err(SimError::NonFinite {
                    row,
                    column: "emission angle",
                });
            }
            if !hidden_parameter.is_finite() {
                return Err(SimError::NonFinite {
                    row,
                    column: "hidden parameter",
                });
            }
            Ok(HiddenVariables {
                emission_angle,
                hidden_parameter,
            })
        })
        .collect()
}
