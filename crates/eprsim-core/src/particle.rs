//! Correlated particle pairs and the source that emits them.

use std::f64::consts::{FRAC_PI_2, TAU};

use crate::config::{
    EmissionAngles, HiddenParameterDistribution, HiddenParameterPolicy, SimulationConfig,
    SpinTagPolicy,
};
use crate::error::Result;
use crate::record::HiddenVariables;
use crate::rng::RandomSource;

/// One particle of an emitted pair. Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    /// Emission angle in radians. The right particle's angle is offset by the
    /// configured phase and not wrapped.
    pub emission_angle: f64,
    /// Hidden parameter `p`.
    pub hidden_parameter: f64,
    /// Signed spin. Its magnitude sets the harmonic `n = 2·|spin_tag|`; its
    /// sign selects the detection channel in the cosine-power rule.
    pub spin_tag: f64,
}

impl Particle {
    pub fn hidden_variables(&self) -> HiddenVariables {
        HiddenVariables {
            emission_angle: self.emission_angle,
            hidden_parameter: self.hidden_parameter,
        }
    }
}

/// Generates correlated pairs from hidden variables.
///
/// Stateless between calls: every pair depends only on the random stream it
/// is handed.
#[derive(Debug, Clone)]
pub struct ParticleEmitter {
    spin: f64,
    phase: f64,
    angle_grid: Option<Vec<f64>>,
    hidden_table: Option<Vec<f64>>,
    policy: HiddenParameterPolicy,
    spin_tags: SpinTagPolicy,
}

impl ParticleEmitter {
    /// Build the emitter described by a validated configuration.
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let angle_grid = match config.emission_angles {
            EmissionAngles::Continuous => None,
            EmissionAngles::Grid { points } => Some(linspace(0.0, TAU, points)),
        };
        let hidden_table = match config.hidden_distribution {
            HiddenParameterDistribution::Uniform => None,
            HiddenParameterDistribution::SineSquared { points } => Some(
                linspace(0.0, FRAC_PI_2, points)
                    .into_iter()
                    .map(|x| 0.5 * x.sin().powi(2))
                    .collect(),
            ),
        };
        Ok(Self {
            spin: config.spin,
            phase: config.phase_offset,
            angle_grid,
            hidden_table,
            policy: config.hidden_policy,
            spin_tags: config.spin_tags,
        })
    }

    /// Emit one `(left, right)` pair.
    pub fn emit(&self, rng: &mut RandomSource) -> (Particle, Particle) {
        let e = match &self.angle_grid {
            Some(grid) => rng.pick(grid),
            None => rng.angle(),
        };
        let p_left = self.draw_hidden(rng);
        let p_right = match self.policy {
            HiddenParameterPolicy::Shared => p_left,
            HiddenParameterPolicy::Complementary => 1.0 - p_left,
            HiddenParameterPolicy::Independent => self.draw_hidden(rng),
        };
        let right_tag = match self.spin_tags {
            SpinTagPolicy::Shared => self.spin,
            SpinTagPolicy::Mirrored => -self.spin,
        };
        (
            Particle {
                emission_angle: e,
                hidden_parameter: p_left,
                spin_tag: self.spin,
            },
            Particle {
                emission_angle: e + self.phase,
                hidden_parameter: p_right,
                spin_tag: right_tag,
            },
        )
    }

    pub fn spin(&self) -> f64 {
        self.spin
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    fn draw_hidden(&self, rng: &mut RandomSource) -> f64 {
        match &self.hidden_table {
            Some(table) => rng.pick(table),
            None => rng.uniform(),
        }
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}
