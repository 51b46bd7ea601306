//! Hidden-variable decision rules.
//!
//! A station turns `(particle, setting)` into an [`Outcome`] through a
//! [`DecisionRule`]. The three historical variants of the model share this
//! interface and are selected by [`RuleVariant`]:
//!
//! - cosine-power: `C = (-1)^n cos(n(a − e)) / 2`, detected when `p` lies on
//!   the detection side of `(abs(C) + ½)²`.
//! - squared-cosine: `C = cos²(s(e − a)) − p`, detected when `abs(C) > τ` for a
//!   fresh `τ ~ U(0,1)`.
//! - direct-threshold: `C = (-1)^n cos(n(a − e))`, detected when `p < abs(C)`.
//!
//! with `n = 2·|s|` for spin tag `s`. A detected particle reports `sign(C)`.

use crate::config::RuleVariant;
use crate::particle::Particle;
use crate::record::Outcome;
use crate::rng::RandomSource;

/// Strategy that decides a single measurement outcome.
pub trait DecisionRule: Send + Sync {
    /// Which variant this is.
    fn variant(&self) -> RuleVariant;

    /// Deterministic correlation amplitude for `particle` at `setting`.
    fn amplitude(&self, particle: &Particle, setting: f64) -> f64;

    /// Measure `particle` at `setting`. Rules that need extra randomness draw
    /// it from the station's own stream.
    fn detect(&self, particle: &Particle, setting: f64, rng: &mut RandomSource) -> Outcome;

    /// Whether [`detect`](Self::detect) is a pure function of the particle and
    /// setting (no draws from `rng`).
    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Instantiate the rule for a configured variant.
pub fn build_rule(variant: RuleVariant) -> Box<dyn DecisionRule> {
    match variant {
        RuleVariant::CosinePower => Box::new(CosinePower),
        RuleVariant::SquaredCosine => Box::new(SquaredCosine),
        RuleVariant::DirectThreshold => Box::new(DirectThreshold),
    }
}

/// Harmonic `n = 2·|spin_tag|` as an integer.
fn harmonic(spin_tag: f64) -> u32 {
    (2.0 * spin_tag.abs()).round() as u32
}

/// `(-1)^n · cos(n·(setting − e))`.
fn signed_cosine(particle: &Particle, setting: f64) -> f64 {
    let n = harmonic(particle.spin_tag);
    let parity = if n % 2 == 0 { 1.0 } else { -1.0 };
    parity * (f64::from(n) * (setting - particle.emission_angle)).cos()
}

// ---------------------------------------------------------------------------
// Cosine-power
// ---------------------------------------------------------------------------

/// Detection probability shaped as `(|C| + ½)²`.
///
/// For a positive spin tag the particle is lost when `p > Cd`; for a negative
/// tag the threshold is flipped to `1 − Cd` and the particle is lost when
/// `p < 1 − Cd`. Paired with complementary `p` this gives both arms the same
/// detection region.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosinePower;

impl DecisionRule for CosinePower {
    fn variant(&self) -> RuleVariant {
        RuleVariant::CosinePower
    }

    fn amplitude(&self, particle: &Particle, setting: f64) -> f64 {
        signed_cosine(particle, setting) / 2.0
    }

    fn detect(&self, particle: &Particle, setting: f64, _rng: &mut RandomSource) -> Outcome {
        let c = self.amplitude(particle, setting);
        let mut cd = (c.abs() + 0.5).powi(2);
        let positive = particle.spin_tag > 0.0;
        if !positive {
            cd = 1.0 - cd;
        }
        let p = particle.hidden_parameter;
        if (positive && p > cd) || (!positive && p < cd) {
            Outcome::Undetected
        } else {
            Outcome::from_sign(c)
        }
    }
}

// ---------------------------------------------------------------------------
// Squared-cosine
// ---------------------------------------------------------------------------

/// Compares `cos²(s·(e − a)) − p` with a per-measurement uniform threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredCosine;

impl DecisionRule for SquaredCosine {
    fn variant(&self) -> RuleVariant {
        RuleVariant::SquaredCosine
    }

    fn amplitude(&self, particle: &Particle, setting: f64) -> f64 {
        (particle.spin_tag * (particle.emission_angle - setting))
            .cos()
            .powi(2)
            - particle.hidden_parameter
    }

    fn detect(&self, particle: &Particle, setting: f64, rng: &mut RandomSource) -> Outcome {
        let c = self.amplitude(particle, setting);
        let tau = rng.uniform();
        if c.abs() > tau {
            Outcome::from_sign(c)
        } else {
            Outcome::Undetected
        }
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Direct-threshold
// ---------------------------------------------------------------------------

/// Detects whenever the hidden parameter lies below `|C|`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectThreshold;

impl DecisionRule for DirectThreshold {
    fn variant(&self) -> RuleVariant {
        RuleVariant::DirectThreshold
    }

    fn amplitude(&self, particle: &Particle, setting: f64) -> f64 {
        signed_cosine(particle, setting)
    }

    fn detect(&self, particle: &Particle, setting: f64, _rng: &mut RandomSource) -> Outcome {
        let c = self.amplitude(particle, setting);
        if particle.hidden_parameter < c.abs() {
            Outcome::from_sign(c)
        } else {
            Outcome::Undetected
        }
    }
}
