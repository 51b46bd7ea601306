//! Coincidence statistics over angle-difference bins.
//!
//! One pass over the paired records fills integer counters per difference
//! bin and per `(alice setting, bob setting)` pair. Every derived value is a
//! ratio of those counters, so analysing the same arrays twice, on any
//! number of workers, gives bit-identical statistics.

use std::collections::{BTreeSet, HashMap};

use eprsim_core::{Outcome, Result, ResultSet, SimError, TrialRecord};
use serde::Serialize;

use crate::chsh::{
    ChshAngles, ChshReport, ExpectationTerm, PairCounts, classical_correlation,
    quantum_correlation, ratio,
};
use crate::grid::AngleGrid;

/// Records per worker below which the analyzer stays on one thread.
const MIN_CHUNK: usize = 1 << 16;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Raw outcome counts for one bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BinCounts {
    pub trials: u64,
    pub plus_plus: u64,
    pub minus_minus: u64,
    pub plus_minus: u64,
    pub minus_plus: u64,
    pub alice_plus: u64,
    pub alice_minus: u64,
    pub bob_plus: u64,
    pub bob_minus: u64,
    /// Trials with at least one detection (single or double).
    pub detected: u64,
    /// Trials with both sides detected.
    pub coincidences: u64,
}

impl BinCounts {
    pub fn add(&mut self, alice: Outcome, bob: Outcome) {
        self.trials += 1;
        match alice {
            Outcome::Plus => self.alice_plus += 1,
            Outcome::Minus => self.alice_minus += 1,
            Outcome::Undetected => {}
        }
        match bob {
            Outcome::Plus => self.bob_plus += 1,
            Outcome::Minus => self.bob_minus += 1,
            Outcome::Undetected => {}
        }
        match (alice, bob) {
            (Outcome::Plus, Outcome::Plus) => self.plus_plus += 1,
            (Outcome::Minus, Outcome::Minus) => self.minus_minus += 1,
            (Outcome::Plus, Outcome::Minus) => self.plus_minus += 1,
            (Outcome::Minus, Outcome::Plus) => self.minus_plus += 1,
            _ => {}
        }
        if alice.is_detected() || bob.is_detected() {
            self.detected += 1;
        }
        if alice.is_detected() && bob.is_detected() {
            self.coincidences += 1;
        }
    }

    pub fn merge(&mut self, other: &BinCounts) {
        self.trials += other.trials;
        self.plus_plus += other.plus_plus;
        self.minus_minus += other.minus_minus;
        self.plus_minus += other.plus_minus;
        self.minus_plus += other.minus_plus;
        self.alice_plus += other.alice_plus;
        self.alice_minus += other.alice_minus;
        self.bob_plus += other.bob_plus;
        self.bob_minus += other.bob_minus;
        self.detected += other.detected;
        self.coincidences += other.coincidences;
    }
}

// ---------------------------------------------------------------------------
// Derived statistics
// ---------------------------------------------------------------------------

/// Probabilities and rates for one angle-difference bin. Every ratio with a
/// zero denominator is 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BinStatistics {
    /// Bin angle `a − b` in degrees.
    pub angle: f64,
    pub counts: BinCounts,
    pub p_plus_plus: f64,
    pub p_minus_minus: f64,
    pub p_plus_minus: f64,
    pub p_minus_plus: f64,
    /// `P+(A)` over Alice's detections in the bin.
    pub alice_plus: f64,
    /// `P+(B)` over Bob's detections in the bin.
    pub bob_plus: f64,
    /// `E(a,b) = P++ + P−− − P+− − P−+`.
    pub correlation: f64,
    /// `E_QM` at this angle.
    pub quantum: f64,
    /// Double detections over trials with any detection.
    pub coincidence_rate: f64,
    /// Trials with any detection over all trials in the bin.
    pub detection_efficiency: f64,
}

impl BinStatistics {
    pub fn from_counts(angle: f64, counts: BinCounts, spin: f64) -> Self {
        let double = counts.coincidences as f64;
        let p_plus_plus = ratio(counts.plus_plus as f64, double);
        let p_minus_minus = ratio(counts.minus_minus as f64, double);
        let p_plus_minus = ratio(counts.plus_minus as f64, double);
        let p_minus_plus = ratio(counts.minus_plus as f64, double);
        Self {
            angle,
            counts,
            p_plus_plus,
            p_minus_minus,
            p_plus_minus,
            p_minus_plus,
            alice_plus: ratio(
                counts.alice_plus as f64,
                (counts.alice_plus + counts.alice_minus) as f64,
            ),
            bob_plus: ratio(
                counts.bob_plus as f64,
                (counts.bob_plus + counts.bob_minus) as f64,
            ),
            correlation: p_plus_plus + p_minus_minus - p_plus_minus - p_minus_plus,
            quantum: quantum_correlation(angle, spin),
            coincidence_rate: ratio(double, counts.detected as f64),
            detection_efficiency: ratio(counts.detected as f64, counts.trials as f64),
        }
    }
}

/// Mean coincidence product at one fixed relative orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AngleCheck {
    /// Relative orientation in degrees.
    pub angle: f64,
    pub coincidences: u64,
    /// Mean product over those coincidences, 0.0 without any.
    pub correlation: f64,
    pub quantum: f64,
}

impl AngleCheck {
    fn from_counts(angle: f64, counts: &PairCounts, spin: f64) -> Self {
        Self {
            angle,
            coincidences: counts.coincidences,
            correlation: counts.conditioned_mean(),
            quantum: quantum_correlation(angle, spin),
        }
    }
}

/// Everything [`CoincidenceAnalyzer::analyze`] computes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoincidenceStatistics {
    pub resolution: f64,
    pub spin: f64,
    pub trials: u64,
    /// One entry per difference bin, in ascending angle order.
    pub bins: Vec<BinStatistics>,
    /// Trials with any detection over all trials.
    pub detection_efficiency: f64,
    /// Double detections over trials with any detection.
    pub coincidence_rate: f64,
    /// Coincidences whose discretized settings are equal.
    pub same_angle: AngleCheck,
    /// Coincidences whose discretized settings differ by 180°.
    pub opposite_angle: AngleCheck,
    pub chsh: ChshReport,
}

impl CoincidenceStatistics {
    /// `(angle, E(a,b))` over the difference grid.
    pub fn curve(&self) -> Vec<(f64, f64)> {
        self.bins.iter().map(|b| (b.angle, b.correlation)).collect()
    }

    /// `(angle, E_QM)` over the same grid.
    pub fn quantum_curve(&self) -> Vec<(f64, f64)> {
        self.bins.iter().map(|b| (b.angle, b.quantum)).collect()
    }

    /// `(angle, E_Bell)` for the linear local model over the same grid.
    pub fn classical_curve(&self) -> Vec<(f64, f64)> {
        self.bins
            .iter()
            .map(|b| (b.angle, classical_correlation(b.angle, self.spin)))
            .collect()
    }

    pub fn efficiency_curve(&self) -> Vec<(f64, f64)> {
        self.bins
            .iter()
            .map(|b| (b.angle, b.detection_efficiency))
            .collect()
    }

    pub fn coincidence_curve(&self) -> Vec<(f64, f64)> {
        self.bins.iter().map(|b| (b.angle, b.coincidence_rate)).collect()
    }

    /// Bins over `[0°, 180°]`, each pooled with its mirror bin `360° − θ`.
    pub fn folded_bins(&self) -> Vec<BinStatistics> {
        let n = self.bins.len();
        (0..=n / 2)
            .map(|i| {
                let mirror = (n - i) % n;
                let mut counts = self.bins[i].counts;
                if mirror != i {
                    counts.merge(&self.bins[mirror].counts);
                }
                BinStatistics::from_counts(self.bins[i].angle, counts, self.spin)
            })
            .collect()
    }

    /// `(angle, E(a,b))` from [`folded_bins`](Self::folded_bins).
    pub fn folded_curve(&self) -> Vec<(f64, f64)> {
        self.folded_bins()
            .iter()
            .map(|b| (b.angle, b.correlation))
            .collect()
    }

    /// Statistics of the bin containing `angle_deg`.
    pub fn bin(&self, angle_deg: f64) -> Option<&BinStatistics> {
        let grid = AngleGrid::new(self.resolution).ok()?;
        self.bins.get(grid.index_deg(angle_deg))
    }
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Tally {
    total: BinCounts,
    differences: Vec<BinCounts>,
    pairs: HashMap<(usize, usize), PairCounts>,
    same: PairCounts,
    opposite: PairCounts,
}

impl Tally {
    fn new(bins: usize) -> Self {
        Self {
            differences: vec![BinCounts::default(); bins],
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Tally) {
        self.total.merge(&other.total);
        for (mine, theirs) in self.differences.iter_mut().zip(&other.differences) {
            mine.merge(theirs);
        }
        for (key, counts) in other.pairs {
            self.pairs.entry(key).or_default().merge(&counts);
        }
        self.same.merge(&other.same);
        self.opposite.merge(&other.opposite);
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Bins paired records and derives correlation statistics.
#[derive(Debug, Clone)]
pub struct CoincidenceAnalyzer {
    grid: AngleGrid,
    spin: f64,
    chsh: Option<ChshAngles>,
    workers: Option<usize>,
}

impl CoincidenceAnalyzer {
    /// Analyzer at `resolution_deg` for particles of `spin`.
    ///
    /// Unless angles are set with [`with_chsh_angles`](Self::with_chsh_angles),
    /// CHSH uses the stations' settings when exactly two are in use on each
    /// side, and [`ChshAngles::for_spin`] otherwise.
    pub fn new(resolution_deg: f64, spin: f64) -> Result<Self> {
        if !spin.is_finite() || spin <= 0.0 || ((2.0 * spin) - (2.0 * spin).round()).abs() > 1e-9
        {
            return Err(SimError::Config(format!(
                "spin must be a positive multiple of 1/2, got {spin}"
            )));
        }
        Ok(Self {
            grid: AngleGrid::new(resolution_deg)?,
            spin,
            chsh: None,
            workers: None,
        })
    }

    pub fn with_chsh_angles(mut self, angles: ChshAngles) -> Self {
        self.chsh = Some(angles);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn grid(&self) -> &AngleGrid {
        &self.grid
    }

    pub fn spin(&self) -> f64 {
        self.spin
    }

    /// Explicitly configured CHSH angles, if any.
    pub fn chsh_angles(&self) -> Option<&ChshAngles> {
        self.chsh.as_ref()
    }

    /// Analyse persisted `(setting, outcome)` rows.
    pub fn analyze_rows(
        &self,
        alice: &[[f64; 2]],
        bob: &[[f64; 2]],
    ) -> Result<CoincidenceStatistics> {
        check_lengths(alice.len(), bob.len())?;
        self.analyze(&ResultSet::from_rows(alice)?, &ResultSet::from_rows(bob)?)
    }

    /// Analyse two paired result sets. Fails on unequal lengths or a
    /// non-finite setting before any statistics are produced.
    pub fn analyze(&self, alice: &ResultSet, bob: &ResultSet) -> Result<CoincidenceStatistics> {
        check_lengths(alice.len(), bob.len())?;
        let n = alice.len();
        let workers = self
            .workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .min(n.div_ceil(MIN_CHUNK))
            .max(1);

        let tally = if workers == 1 {
            self.tally(alice.records(), bob.records(), 0)?
        } else {
            let chunk = n.div_ceil(workers);
            log::debug!("analysing {n} trials on {workers} workers");
            let partials: Vec<Result<Tally>> = std::thread::scope(|s| {
                let handles: Vec<_> = alice
                    .records()
                    .chunks(chunk)
                    .zip(bob.records().chunks(chunk))
                    .enumerate()
                    .map(|(k, (a, b))| s.spawn(move || self.tally(a, b, k * chunk)))
                    .collect();
                handles.into_iter().map(|h| joined(h.join())).collect()
            });
            let mut total = Tally::new(self.grid.bins());
            for partial in partials {
                total.merge(partial?);
            }
            total
        };

        let stats = self.finish(n as u64, tally);
        log::info!(
            "analysed {} trials: efficiency {:.3}, coincidences {:.3}, S = {:.3} (all trials {:.3}, qm {:.3})",
            stats.trials,
            stats.detection_efficiency,
            stats.coincidence_rate,
            stats.chsh.s_coincidence,
            stats.chsh.s_unconditioned,
            stats.chsh.s_quantum
        );
        Ok(stats)
    }

    fn tally(&self, alice: &[TrialRecord], bob: &[TrialRecord], offset: usize) -> Result<Tally> {
        let grid = &self.grid;
        let bins = grid.bins();
        let opposite = grid.opposite_index();
        let mut tally = Tally::new(bins);
        for (i, (a, b)) in alice.iter().zip(bob).enumerate() {
            for (setting, column) in [(a.setting, "alice setting"), (b.setting, "bob setting")] {
                if !setting.is_finite() {
                    return Err(SimError::NonFinite {
                        row: offset + i,
                        column,
                    });
                }
            }
            let ia = grid.index_rad(a.setting);
            let ib = grid.index_rad(b.setting);
            let id = grid.difference_index(a.setting, b.setting);

            tally.total.add(a.outcome, b.outcome);
            tally.differences[id].add(a.outcome, b.outcome);
            tally.pairs.entry((ia, ib)).or_default().add(a.outcome, b.outcome);
            if ia == ib {
                tally.same.add(a.outcome, b.outcome);
            }
            if Some((ia + bins - ib) % bins) == opposite {
                tally.opposite.add(a.outcome, b.outcome);
            }
        }
        Ok(tally)
    }

    fn finish(&self, trials: u64, tally: Tally) -> CoincidenceStatistics {
        let grid = &self.grid;
        let bins = tally
            .differences
            .iter()
            .enumerate()
            .map(|(i, counts)| BinStatistics::from_counts(grid.value(i), *counts, self.spin))
            .collect();

        let angles = self
            .chsh
            .or_else(|| two_by_two_settings(&tally.pairs, grid))
            .unwrap_or_else(|| ChshAngles::for_spin(self.spin));
        let terms = angles.pairs().map(|(a, b)| {
            let key = (grid.index_deg(a), grid.index_deg(b));
            let counts = tally.pairs.get(&key).copied().unwrap_or_default();
            ExpectationTerm::from_counts(grid.value(key.0), grid.value(key.1), &counts, self.spin)
        });

        CoincidenceStatistics {
            resolution: grid.resolution(),
            spin: self.spin,
            trials,
            bins,
            detection_efficiency: ratio(tally.total.detected as f64, tally.total.trials as f64),
            coincidence_rate: ratio(
                tally.total.coincidences as f64,
                tally.total.detected as f64,
            ),
            same_angle: AngleCheck::from_counts(0.0, &tally.same, self.spin),
            opposite_angle: AngleCheck::from_counts(180.0, &tally.opposite, self.spin),
            chsh: ChshReport::from_terms(angles, terms),
        }
    }
}

/// CHSH angles from the settings actually used, when each station used
/// exactly two. The smaller setting is `a` (`b`), the larger `a′` (`b′`).
fn two_by_two_settings(
    pairs: &HashMap<(usize, usize), PairCounts>,
    grid: &AngleGrid,
) -> Option<ChshAngles> {
    let used = pairs.iter().filter(|(_, c)| c.trials > 0).map(|(k, _)| *k);
    let alice: BTreeSet<usize> = used.clone().map(|(a, _)| a).collect();
    let bob: BTreeSet<usize> = used.map(|(_, b)| b).collect();
    match (alice.len(), bob.len()) {
        (2, 2) => {
            let (a, a_prime) = (alice.first()?, alice.last()?);
            let (b, b_prime) = (bob.first()?, bob.last()?);
            Some(ChshAngles {
                a: grid.value(*a),
                a_prime: grid.value(*a_prime),
                b: grid.value(*b),
                b_prime: grid.value(*b_prime),
            })
        }
        _ => None,
    }
}

/// Result of a joined tally worker; a panic becomes [`SimError::Worker`].
fn joined<T>(outcome: std::thread::Result<Result<T>>) -> Result<T> {
    outcome.unwrap_or_else(|payload| Err(SimError::worker_panic(payload.as_ref())))
}

fn check_lengths(alice: usize, bob: usize) -> Result<()> {
    if alice != bob {
        return Err(SimError::SizeMismatch { alice, bob });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(setting_deg: f64, outcome: Outcome) -> TrialRecord {
        TrialRecord {
            setting: setting_deg.to_radians(),
            outcome,
        }
    }

    fn sets(rows: &[(f64, Outcome, f64, Outcome)]) -> (ResultSet, ResultSet) {
        let alice = rows.iter().map(|&(a, oa, _, _)| record(a, oa)).collect();
        let bob = rows.iter().map(|&(_, _, b, ob)| record(b, ob)).collect();
        (ResultSet::from_records(alice), ResultSet::from_records(bob))
    }

    #[test]
    fn test_size_mismatch() {
        let analyzer = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
        let alice = ResultSet::from_records(vec![TrialRecord::default(); 3]);
        let bob = ResultSet::from_records(vec![TrialRecord::default(); 2]);
        assert!(matches!(
            analyzer.analyze(&alice, &bob),
            Err(SimError::SizeMismatch { alice: 3, bob: 2 })
        ));
        assert!(matches!(
            analyzer.analyze_rows(&[[0.0, 1.0]], &[]),
            Err(SimError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(CoincidenceAnalyzer::new(0.0, 0.5).is_err());
        assert!(CoincidenceAnalyzer::new(7.0, 0.5).is_err());
        assert!(CoincidenceAnalyzer::new(7.5, 0.0).is_err());
        assert!(CoincidenceAnalyzer::new(7.5, 0.7).is_err());
    }

    #[test]
    fn test_non_finite_setting_is_rejected() {
        let analyzer = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
        let alice = ResultSet::from_records(vec![
            record(0.0, Outcome::Plus),
            TrialRecord {
                setting: f64::INFINITY,
                outcome: Outcome::Plus,
            },
        ]);
        let bob = ResultSet::from_records(vec![record(0.0, Outcome::Plus); 2]);
        assert!(matches!(
            analyzer.analyze(&alice, &bob),
            Err(SimError::NonFinite { row: 1, .. })
        ));
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let analyzer = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
        let stats = analyzer
            .analyze(&ResultSet::default(), &ResultSet::default())
            .unwrap();
        assert_eq!(stats.trials, 0);
        assert_eq!(stats.bins.len(), 48);
        assert_eq!(stats.detection_efficiency, 0.0);
        assert_eq!(stats.coincidence_rate, 0.0);
        assert_eq!(stats.chsh.s_coincidence, 0.0);
        for bin in &stats.bins {
            assert_eq!(bin.correlation, 0.0);
            assert_eq!(bin.p_plus_plus, 0.0);
            assert_eq!(bin.alice_plus, 0.0);
            assert_eq!(bin.coincidence_rate, 0.0);
            assert_eq!(bin.detection_efficiency, 0.0);
        }
    }

    #[test]
    fn test_bin_probabilities() {
        use Outcome::{Minus, Plus, Undetected};
        let (alice, bob) = sets(&[
            (30.0, Plus, 0.0, Plus),
            (30.0, Plus, 0.0, Minus),
            (30.0, Minus, 0.0, Minus),
            (30.0, Minus, 0.0, Minus),
            (30.0, Plus, 0.0, Undetected),
            (30.0, Undetected, 0.0, Undetected),
        ]);
        let analyzer = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
        let stats = analyzer.analyze(&alice, &bob).unwrap();
        let bin = stats.bin(30.0).unwrap();
        assert_eq!(bin.angle, 30.0);
        assert_eq!(bin.counts.trials, 6);
        assert_eq!(bin.counts.coincidences, 4);
        assert_eq!(bin.p_plus_plus, 0.25);
        assert_eq!(bin.p_minus_minus, 0.5);
        assert_eq!(bin.p_plus_minus, 0.25);
        assert_eq!(bin.p_minus_plus, 0.0);
        assert_eq!(bin.correlation, 0.5);
        assert_eq!(bin.alice_plus, 0.6);
        assert_eq!(bin.bob_plus, 0.25);
        assert_eq!(bin.coincidence_rate, 0.8);
        assert!((bin.detection_efficiency - 5.0 / 6.0).abs() < 1e-12);
        // Every other bin is empty.
        assert!(stats.bins.iter().filter(|b| b.angle != 30.0).all(|b| b.counts.trials == 0));
        assert!((stats.detection_efficiency - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_same_and_opposite_checks() {
        use Outcome::{Minus, Plus, Undetected};
        let (alice, bob) = sets(&[
            (10.0, Plus, 10.0, Minus),
            (10.0, Minus, 10.0, Plus),
            (200.0, Plus, 20.0, Plus),
            (200.0, Minus, 20.0, Minus),
            (200.0, Undetected, 20.0, Minus),
        ]);
        let stats = CoincidenceAnalyzer::new(7.5, 0.5)
            .unwrap()
            .analyze(&alice, &bob)
            .unwrap();
        assert_eq!(stats.same_angle.coincidences, 2);
        assert_eq!(stats.same_angle.correlation, -1.0);
        assert_eq!(stats.same_angle.quantum, -1.0);
        assert_eq!(stats.opposite_angle.coincidences, 2);
        assert_eq!(stats.opposite_angle.correlation, 1.0);
        assert!((stats.opposite_angle.quantum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_chsh_selection_by_setting_pair() {
        use Outcome::{Minus, Plus};
        let mut rows = Vec::new();
        for _ in 0..10 {
            rows.push((0.0, Plus, 45.0, Minus));
            rows.push((0.0, Plus, 135.0, Plus));
            rows.push((90.0, Plus, 45.0, Minus));
            rows.push((90.0, Plus, 135.0, Minus));
        }
        let (alice, bob) = sets(&rows);
        let stats = CoincidenceAnalyzer::new(7.5, 0.5)
            .unwrap()
            .analyze(&alice, &bob)
            .unwrap();
        let chsh = &stats.chsh;
        assert_eq!(chsh.terms.map(|t| t.correlation), [-1.0, 1.0, -1.0, -1.0]);
        assert_eq!(chsh.terms.map(|t| t.trials), [10; 4]);
        assert_eq!(chsh.s_coincidence, 4.0);
        assert_eq!(chsh.s_unconditioned, 4.0);
        assert!(!chsh.respects_classical_bound());
    }

    #[test]
    fn test_custom_chsh_angles() {
        let analyzer = CoincidenceAnalyzer::new(7.5, 1.0)
            .unwrap()
            .with_chsh_angles(ChshAngles::canonical());
        assert_eq!(analyzer.chsh_angles(), Some(&ChshAngles::canonical()));
        assert_eq!(CoincidenceAnalyzer::new(7.5, 0.5).unwrap().chsh_angles(), None);
    }

    #[test]
    fn test_two_by_two_settings_pick_chsh_angles() {
        use Outcome::{Minus, Plus};
        let mut rows = Vec::new();
        for _ in 0..5 {
            rows.push((60.0, Plus, 30.0, Minus));
            rows.push((15.0, Plus, 105.0, Plus));
            rows.push((15.0, Minus, 30.0, Minus));
            rows.push((60.0, Minus, 105.0, Plus));
        }
        let (alice, bob) = sets(&rows);
        let analyzer = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
        let stats = analyzer.analyze(&alice, &bob).unwrap();
        assert_eq!(
            stats.chsh.angles,
            ChshAngles {
                a: 15.0,
                a_prime: 60.0,
                b: 30.0,
                b_prime: 105.0,
            }
        );
        assert!(stats.chsh.terms.iter().all(|t| t.trials == 5));

        // A third alice setting falls back to the spin's default angles.
        rows.push((90.0, Plus, 30.0, Plus));
        let (alice, bob) = sets(&rows);
        let stats = analyzer.analyze(&alice, &bob).unwrap();
        assert_eq!(stats.chsh.angles, ChshAngles::for_spin(0.5));

        // Explicit angles always win.
        let stats = analyzer
            .clone()
            .with_chsh_angles(ChshAngles::canonical())
            .analyze(&alice, &bob)
            .unwrap();
        assert_eq!(stats.chsh.angles, ChshAngles::canonical());
    }

    #[test]
    fn test_folded_curve_pools_mirror_bins() {
        use Outcome::{Minus, Plus};
        let (alice, bob) = sets(&[
            (30.0, Plus, 0.0, Plus),
            (0.0, Plus, 30.0, Minus),
            (0.0, Minus, 30.0, Plus),
            (0.0, Plus, 30.0, Minus),
            (180.0, Plus, 0.0, Plus),
        ]);
        let stats = CoincidenceAnalyzer::new(7.5, 0.5)
            .unwrap()
            .analyze(&alice, &bob)
            .unwrap();
        let folded = stats.folded_bins();
        assert_eq!(folded.len(), 25);
        assert_eq!(folded[0].angle, 0.0);
        assert_eq!(folded[24].angle, 180.0);
        assert_eq!(folded[4].angle, 30.0);
        assert_eq!(folded[4].counts.coincidences, 4);
        assert_eq!(folded[4].correlation, -0.5);
        // 180° is its own mirror and is counted once.
        assert_eq!(folded[24].counts.trials, 1);
        assert_eq!(stats.folded_curve()[24], (180.0, 1.0));
    }

    #[test]
    fn test_panicked_worker_is_a_worker_error() {
        let outcome: std::thread::Result<Result<()>> = Err(Box::new("tally exploded"));
        assert!(matches!(joined(outcome), Err(SimError::Worker(ref m)) if m == "tally exploded"));
        assert!(matches!(joined(Ok(Ok(3))), Ok(3)));
    }

    #[test]
    fn test_curves_cover_grid() {
        let stats = CoincidenceAnalyzer::new(90.0, 0.5)
            .unwrap()
            .analyze(&ResultSet::default(), &ResultSet::default())
            .unwrap();
        let angles: Vec<f64> = stats.curve().iter().map(|p| p.0).collect();
        assert_eq!(angles, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(stats.classical_curve()[2], (180.0, 1.0));
        assert!((stats.quantum_curve()[0].1 + 1.0).abs() < 1e-12);
        assert_eq!(stats.efficiency_curve().len(), 4);
        assert_eq!(stats.coincidence_curve().len(), 4);
    }
}
