//! CHSH evaluation and the quantum / classical reference correlations.
//!
//! `S = |E(a,b) − E(a,b′) + E(a′,b) + E(a′,b′)|` is computed twice: over
//! coincidences only (what a post-selecting experiment reports) and over all
//! trials with non-detection counted as 0. Any local model must keep the
//! second one at or below 2. The first may exceed 2 when detection depends on
//! the setting.

use eprsim_core::Outcome;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Classical CHSH bound.
pub const CLASSICAL_BOUND: f64 = 2.0;

/// `(-1)^n · cos(n·θ)` with `n = 2·spin`: `−cos θ` for spin ½, `cos 2θ` for
/// spin 1.
pub fn quantum_correlation(theta_deg: f64, spin: f64) -> f64 {
    let n = (2.0 * spin).round() as i32;
    let parity = if n % 2 == 0 { 1.0 } else { -1.0 };
    parity * (f64::from(n) * theta_deg.to_radians()).cos()
}

/// Bell's linear local-model correlation: a triangle wave with the same
/// period and extremes as [`quantum_correlation`].
pub fn classical_correlation(theta_deg: f64, spin: f64) -> f64 {
    let n = (2.0 * spin).round().max(1.0);
    let parity = if n as i64 % 2 == 0 { 1.0 } else { -1.0 };
    let period = 360.0 / n;
    let t = theta_deg.rem_euclid(period) / period;
    let wave = if t <= 0.5 { 1.0 - 4.0 * t } else { 4.0 * t - 3.0 };
    parity * wave
}

// ---------------------------------------------------------------------------
// Angles
// ---------------------------------------------------------------------------

/// The four detector settings of a CHSH test, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChshAngles {
    pub a: f64,
    pub a_prime: f64,
    pub b: f64,
    pub b_prime: f64,
}

impl ChshAngles {
    /// `a = 0°, a′ = 45°, b = 22.5°, b′ = 67.5°`, maximal for spin 1.
    pub fn canonical() -> Self {
        Self {
            a: 0.0,
            a_prime: 45.0,
            b: 22.5,
            b_prime: 67.5,
        }
    }

    /// Canonical angles scaled by `1/spin`: spin ½ gives
    /// `(0°, 90°, 45°, 135°)`, spin 1 the canonical set.
    pub fn for_spin(spin: f64) -> Self {
        let c = Self::canonical();
        let k = 1.0 / spin;
        Self {
            a: c.a * k,
            a_prime: c.a_prime * k,
            b: c.b * k,
            b_prime: c.b_prime * k,
        }
    }

    /// `(a,b), (a,b′), (a′,b), (a′,b′)`.
    pub fn pairs(&self) -> [(f64, f64); 4] {
        [
            (self.a, self.b),
            (self.a, self.b_prime),
            (self.a_prime, self.b),
            (self.a_prime, self.b_prime),
        ]
    }

    /// `|E₁ − E₂ + E₃ + E₄|` for the quantum prediction at these angles.
    pub fn quantum_s(&self, spin: f64) -> f64 {
        let e = self.pairs().map(|(a, b)| quantum_correlation(b - a, spin));
        combine(&e)
    }
}

impl Default for ChshAngles {
    fn default() -> Self {
        Self::canonical()
    }
}

// ---------------------------------------------------------------------------
// Per-setting-pair counts
// ---------------------------------------------------------------------------

/// Outcome counts for one `(alice setting, bob setting)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PairCounts {
    pub trials: u64,
    pub coincidences: u64,
    /// Sum of `A·B` over coincidences (equivalently over all trials).
    pub product_sum: i64,
}

impl PairCounts {
    pub fn add(&mut self, alice: Outcome, bob: Outcome) {
        self.trials += 1;
        if alice.is_detected() && bob.is_detected() {
            self.coincidences += 1;
            self.product_sum += i64::from(alice.value() * bob.value());
        }
    }

    pub fn merge(&mut self, other: &PairCounts) {
        self.trials += other.trials;
        self.coincidences += other.coincidences;
        self.product_sum += other.product_sum;
    }

    /// Mean product over coincidences, 0.0 without any.
    pub fn conditioned_mean(&self) -> f64 {
        ratio(self.product_sum as f64, self.coincidences as f64)
    }

    /// Mean product over all trials, non-detection counting as 0.
    pub fn unconditioned_mean(&self) -> f64 {
        ratio(self.product_sum as f64, self.trials as f64)
    }

    /// Standard error of [`conditioned_mean`](Self::conditioned_mean).
    pub fn conditioned_std_error(&self) -> f64 {
        let e = self.conditioned_mean();
        std_error(1.0 - e * e, self.coincidences)
    }

    /// Standard error of [`unconditioned_mean`](Self::unconditioned_mean).
    pub fn unconditioned_std_error(&self) -> f64 {
        let m = self.unconditioned_mean();
        let second_moment = ratio(self.coincidences as f64, self.trials as f64);
        std_error(second_moment - m * m, self.trials)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One of the four expectation values entering `S`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExpectationTerm {
    pub a: f64,
    pub b: f64,
    pub trials: u64,
    pub coincidences: u64,
    /// Mean product over coincidences.
    pub correlation: f64,
    pub correlation_std_error: f64,
    /// Mean product over all trials of the pair.
    pub unconditioned: f64,
    pub unconditioned_std_error: f64,
    /// `E_QM(b − a)`.
    pub quantum: f64,
}

impl ExpectationTerm {
    pub fn from_counts(a: f64, b: f64, counts: &PairCounts, spin: f64) -> Self {
        Self {
            a,
            b,
            trials: counts.trials,
            coincidences: counts.coincidences,
            correlation: counts.conditioned_mean(),
            correlation_std_error: counts.conditioned_std_error(),
            unconditioned: counts.unconditioned_mean(),
            unconditioned_std_error: counts.unconditioned_std_error(),
            quantum: quantum_correlation(b - a, spin),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChshReport {
    pub angles: ChshAngles,
    pub terms: [ExpectationTerm; 4],
    /// `S` over coincidences.
    pub s_coincidence: f64,
    pub s_coincidence_std_error: f64,
    /// `(S − 2)/σ`; `None` when σ is zero.
    pub z_coincidence: Option<f64>,
    /// One-sided p-value for `S > 2`.
    pub p_value_coincidence: Option<f64>,
    /// `S` over all trials.
    pub s_unconditioned: f64,
    pub s_unconditioned_std_error: f64,
    pub z_unconditioned: Option<f64>,
    pub p_value_unconditioned: Option<f64>,
    /// Quantum prediction at the same angles.
    pub s_quantum: f64,
}

impl ChshReport {
    pub fn from_terms(angles: ChshAngles, terms: [ExpectationTerm; 4]) -> Self {
        let s_coincidence = combine(&terms.map(|t| t.correlation));
        let s_coincidence_std_error = quadrature(&terms.map(|t| t.correlation_std_error));
        let s_unconditioned = combine(&terms.map(|t| t.unconditioned));
        let s_unconditioned_std_error = quadrature(&terms.map(|t| t.unconditioned_std_error));
        let s_quantum = combine(&terms.map(|t| t.quantum));
        let (z_coincidence, p_value_coincidence) =
            significance(s_coincidence, s_coincidence_std_error);
        let (z_unconditioned, p_value_unconditioned) =
            significance(s_unconditioned, s_unconditioned_std_error);
        Self {
            angles,
            terms,
            s_coincidence,
            s_coincidence_std_error,
            z_coincidence,
            p_value_coincidence,
            s_unconditioned,
            s_unconditioned_std_error,
            z_unconditioned,
            p_value_unconditioned,
            s_quantum,
        }
    }

    /// Whether the unconditioned `S` stays within the classical bound.
    pub fn respects_classical_bound(&self) -> bool {
        self.s_unconditioned <= CLASSICAL_BOUND
    }

    /// Whether the coincidence-only `S` exceeds the classical bound.
    pub fn coincidences_exceed_bound(&self) -> bool {
        self.s_coincidence > CLASSICAL_BOUND
    }
}

impl std::fmt::Display for ChshReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "settings", "n_ab", "<AB>_sim", "<AB>_qm", "stderr"
        )?;
        for t in &self.terms {
            writeln!(
                f,
                "{:>12} {:>10} {:>10.3} {:>10.3} {:>10.3}",
                format!("{}, {}", t.a, t.b),
                t.coincidences,
                t.correlation,
                t.quantum,
                t.correlation_std_error
            )?;
        }
        write!(
            f,
            "CHSH <= 2.0: coincidences {:.3} ± {:.3}, all trials {:.3} ± {:.3}, qm {:.3}",
            self.s_coincidence,
            self.s_coincidence_std_error,
            self.s_unconditioned,
            self.s_unconditioned_std_error,
            self.s_quantum
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `num / den`, or 0.0 when `den` is zero.
pub(crate) fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

fn std_error(variance: f64, n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        (variance.max(0.0) / n as f64).sqrt()
    }
}

fn combine(e: &[f64; 4]) -> f64 {
    (e[0] - e[1] + e[2] + e[3]).abs()
}

fn quadrature(se: &[f64; 4]) -> f64 {
    se.iter().map(|s| s * s).sum::<f64>().sqrt()
}

fn significance(s: f64, sigma: f64) -> (Option<f64>, Option<f64>) {
    if sigma <= 0.0 || !sigma.is_finite() {
        return (None, None);
    }
    let z = (s - CLASSICAL_BOUND) / sigma;
    let p = 1.0 - Normal::standard().cdf(z);
    (Some(z), Some(p))
}
