//! Hidden-variable diagnostics.
//!
//! These look behind the outcomes: how the hidden parameter of detected
//! particles differs from the emitted population, how correlations depend on
//! the absolute station settings, and whether stored hidden variables really
//! reproduce the stored outcomes row by row.

use std::collections::{BTreeSet, HashMap};

use eprsim_core::{
    HiddenParameterPolicy, HiddenTrack, HiddenVariables, Outcome, Particle, RandomSource, Result,
    ResultSet, SimError, SimulationConfig, SimulationRun, SpinTagPolicy, build_rule,
};
use serde::Serialize;

use crate::grid::AngleGrid;

// ---------------------------------------------------------------------------
// Hidden-parameter histograms
// ---------------------------------------------------------------------------

/// Densities of Alice's hidden parameter for three populations sharing the
/// same bin edges. Each density integrates to 1 unless its population is
/// empty, in which case it is all zeros.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HiddenParameterHistograms {
    /// `bins + 1` ascending edges.
    pub edges: Vec<f64>,
    pub emitted: Vec<f64>,
    /// Trials detected on at least one side.
    pub detected_one_side: Vec<f64>,
    /// Trials detected on both sides.
    pub detected_both: Vec<f64>,
}

pub fn hidden_parameter_histograms(
    alice: &ResultSet,
    bob: &ResultSet,
    alice_hidden: &[HiddenVariables],
    bins: usize,
) -> Result<HiddenParameterHistograms> {
    if alice.len() != bob.len() {
        return Err(SimError::SizeMismatch {
            alice: alice.len(),
            bob: bob.len(),
        });
    }
    if alice_hidden.len() != alice.len() {
        return Err(SimError::HiddenLength {
            results: alice.len(),
            hidden: alice_hidden.len(),
        });
    }
    if bins == 0 {
        return Err(SimError::Config("histogram needs at least one bin".into()));
    }
    if let Some(row) = alice_hidden
        .iter()
        .position(|h| !h.hidden_parameter.is_finite())
    {
        return Err(SimError::NonFinite {
            row,
            column: "hidden parameter",
        });
    }

    let (lo, hi) = match alice_hidden
        .iter()
        .map(|h| h.hidden_parameter)
        .fold(None, |acc: Option<(f64, f64)>, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        }) {
        None => (0.0, 1.0),
        Some((lo, hi)) if lo == hi => (lo - 0.5, hi + 0.5),
        Some(range) => range,
    };
    let width = (hi - lo) / bins as f64;
    let edges = (0..=bins).map(|i| lo + width * i as f64).collect();

    let bin_of = |p: f64| (((p - lo) / width) as usize).min(bins - 1);
    let mut emitted = vec![0u64; bins];
    let mut one_side = vec![0u64; bins];
    let mut both = vec![0u64; bins];
    for ((a, b), h) in alice.iter().zip(bob).zip(alice_hidden) {
        let k = bin_of(h.hidden_parameter);
        emitted[k] += 1;
        if a.outcome.is_detected() || b.outcome.is_detected() {
            one_side[k] += 1;
        }
        if a.outcome.is_detected() && b.outcome.is_detected() {
            both[k] += 1;
        }
    }

    Ok(HiddenParameterHistograms {
        edges,
        emitted: density(&emitted, width),
        detected_one_side: density(&one_side, width),
        detected_both: density(&both, width),
    })
}

fn density(counts: &[u64], width: f64) -> Vec<f64> {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts
        .iter()
        .map(|&c| c as f64 / (total as f64 * width))
        .collect()
}

// ---------------------------------------------------------------------------
// Setting correlation matrix
// ---------------------------------------------------------------------------

/// Mean coincidence product for every unordered pair of absolute settings.
///
/// Cell `(i, j)` pools the ordered pairs `(x, y)`, `(y, x)` and their mirror
/// images `(360 − x, 360 − y)`, `(360 − y, 360 − x)`, so the matrix is
/// symmetric. Cells without coincidences are 0.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingCorrelationMatrix {
    /// Discretized settings seen in coincidences, ascending, in degrees.
    pub angles: Vec<f64>,
    pub values: Vec<Vec<f64>>,
    pub counts: Vec<Vec<u64>>,
}

impl SettingCorrelationMatrix {
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i][j]
    }
}

pub fn setting_correlation_matrix(
    alice: &ResultSet,
    bob: &ResultSet,
    grid: &AngleGrid,
) -> Result<SettingCorrelationMatrix> {
    if alice.len() != bob.len() {
        return Err(SimError::SizeMismatch {
            alice: alice.len(),
            bob: bob.len(),
        });
    }
    let mut cells: HashMap<(usize, usize), (i64, u64)> = HashMap::new();
    let mut seen = BTreeSet::new();
    for (row, (a, b)) in alice.iter().zip(bob).enumerate() {
        if !a.setting.is_finite() || !b.setting.is_finite() {
            return Err(SimError::NonFinite {
                row,
                column: "setting",
            });
        }
        if !(a.outcome.is_detected() && b.outcome.is_detected()) {
            continue;
        }
        let key = (grid.index_rad(a.setting), grid.index_rad(b.setting));
        seen.insert(key.0);
        seen.insert(key.1);
        let cell = cells.entry(key).or_default();
        cell.0 += i64::from(a.outcome.value() * b.outcome.value());
        cell.1 += 1;
    }

    let indices: Vec<usize> = seen.into_iter().collect();
    let n = indices.len();
    let mut values = vec![vec![0.0; n]; n];
    let mut counts = vec![vec![0u64; n]; n];
    for i in 0..n {
        for j in i..n {
            let (x, y) = (indices[i], indices[j]);
            let keys: BTreeSet<(usize, usize)> = [
                (x, y),
                (y, x),
                (grid.mirror(x), grid.mirror(y)),
                (grid.mirror(y), grid.mirror(x)),
            ]
            .into_iter()
            .collect();
            let (sum, count) = keys
                .iter()
                .filter_map(|k| cells.get(k))
                .fold((0i64, 0u64), |(s, c), &(cs, cc)| (s + cs, c + cc));
            let mean = if count == 0 { 0.0 } else { sum as f64 / count as f64 };
            values[i][j] = mean;
            values[j][i] = mean;
            counts[i][j] = count;
            counts[j][i] = count;
        }
    }

    Ok(SettingCorrelationMatrix {
        angles: indices.iter().map(|&k| grid.value(k)).collect(),
        values,
        counts,
    })
}

// ---------------------------------------------------------------------------
// Pairing verification
// ---------------------------------------------------------------------------

/// Outcome of re-deriving a run from its stored hidden variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairingReport {
    pub trials: u64,
    /// Rows whose two hidden-variable records break the emitter relations.
    pub relation_mismatches: u64,
    /// Rows whose stored outcome the rule does not reproduce.
    pub outcome_mismatches: u64,
    /// Whether outcomes were fully re-derived. Rules that draw extra
    /// randomness only have the sign of detected outcomes checked.
    pub outcomes_rederived: bool,
    pub first_mismatch: Option<usize>,
}

impl PairingReport {
    pub fn is_consistent(&self) -> bool {
        self.relation_mismatches == 0 && self.outcome_mismatches == 0
    }
}

/// Check that row `i` of both stations came from one emission event.
///
/// Requires a run with hidden variables tracked and the configuration it was
/// generated with.
pub fn verify_pairing(run: &SimulationRun, config: &SimulationConfig) -> Result<PairingReport> {
    let hidden: &HiddenTrack = run.hidden.as_ref().ok_or_else(|| {
        SimError::Config("run has no hidden-variable companion arrays".into())
    })?;
    let n = run.alice.len();
    if run.bob.len() != n {
        return Err(SimError::SizeMismatch {
            alice: n,
            bob: run.bob.len(),
        });
    }
    for track in [&hidden.alice, &hidden.bob] {
        if track.len() != n {
            return Err(SimError::HiddenLength {
                results: n,
                hidden: track.len(),
            });
        }
    }

    let rule = build_rule(config.rule);
    let deterministic = rule.is_deterministic();
    let right_tag = match config.spin_tags {
        SpinTagPolicy::Shared => config.spin,
        SpinTagPolicy::Mirrored => -config.spin,
    };
    // Deterministic rules never draw from the stream.
    let mut unused = RandomSource::seeded(0);
    let mut report = PairingReport {
        trials: n as u64,
        outcomes_rederived: deterministic,
        ..PairingReport::default()
    };

    let rows = run
        .alice
        .iter()
        .zip(&run.bob)
        .zip(hidden.alice.iter().zip(&hidden.bob));
    for (i, ((ra, rb), (ha, hb))) in rows.enumerate() {
        let related = hb.emission_angle == ha.emission_angle + config.phase_offset
            && match config.hidden_policy {
                HiddenParameterPolicy::Shared => hb.hidden_parameter == ha.hidden_parameter,
                HiddenParameterPolicy::Complementary => {
                    hb.hidden_parameter == 1.0 - ha.hidden_parameter
                }
                HiddenParameterPolicy::Independent => true,
            };

        let left = Particle {
            emission_angle: ha.emission_angle,
            hidden_parameter: ha.hidden_parameter,
            spin_tag: config.spin,
        };
        let right = Particle {
            emission_angle: hb.emission_angle,
            hidden_parameter: hb.hidden_parameter,
            spin_tag: right_tag,
        };
        let reproduced = [(left, ra), (right, rb)].iter().all(|(particle, record)| {
            if deterministic {
                rule.detect(particle, record.setting, &mut unused) == record.outcome
            } else {
                record.outcome == Outcome::Undetected
                    || record.outcome
                        == Outcome::from_sign(rule.amplitude(particle, record.setting))
            }
        });

        if !related {
            report.relation_mismatches += 1;
        }
        if !reproduced {
            report.outcome_mismatches += 1;
        }
        if (!related || !reproduced) && report.first_mismatch.is_none() {
            report.first_mismatch = Some(i);
        }
    }

    if !report.is_consistent() {
        log::warn!(
            "pairing check failed: {} relation and {} outcome mismatches in {n} trials",
            report.relation_mismatches,
            report.outcome_mismatches
        );
    }
    Ok(report)
}
