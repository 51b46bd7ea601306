//! Simulation configuration.
//!
//! A [`SimulationConfig`] fully determines a run (together with its seed).
//! It is plain data: serde-serializable, validated once up front by
//! [`SimulationConfig::validate`] so that no trial work starts on a bad
//! configuration.

use std::f64::consts::PI;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// Default number of trials, matching the reference experiment.
pub const DEFAULT_TRIAL_COUNT: u64 = 10_000_000;
/// Default analysis grid resolution in degrees.
pub const DEFAULT_ANGLE_RESOLUTION_DEG: f64 = 7.5;
/// Points in the inclusive emission-angle grid `linspace(0, 2π, n)`.
pub const DEFAULT_EMISSION_GRID_POINTS: usize = 33;
/// Points in the sine-squared hidden-parameter table.
pub const DEFAULT_HIDDEN_TABLE_POINTS: usize = 1000;

// ---------------------------------------------------------------------------
// Strategy selectors
// ---------------------------------------------------------------------------

/// Which hidden-variable decision rule the stations apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVariant {
    /// Thresholds `p` against `(|C| + ½)²`, inverted for negative spin tags.
    #[default]
    CosinePower,
    /// Thresholds `cos²(s·Δ) − p` against a fresh uniform draw.
    SquaredCosine,
    /// Detects when `p < |C|`.
    DirectThreshold,
}

impl std::fmt::Display for RuleVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CosinePower => write!(f, "cosine-power"),
            Self::SquaredCosine => write!(f, "squared-cosine"),
            Self::DirectThreshold => write!(f, "direct-threshold"),
        }
    }
}

impl FromStr for RuleVariant {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine-power" | "cosine_power" => Ok(Self::CosinePower),
            "squared-cosine" | "squared_cosine" => Ok(Self::SquaredCosine),
            "direct-threshold" | "direct_threshold" => Ok(Self::DirectThreshold),
            other => Err(SimError::config(format!("unknown detection rule '{other}'"))),
        }
    }
}

/// How a station chooses its detector orientation each trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SettingMode {
    /// Uniform in `[0, 2π)`, drawn afresh every trial (fast switching).
    #[default]
    UniformContinuous,
    /// Uniform choice among fixed orientations, in degrees.
    DiscreteGrid { angles_deg: Vec<f64> },
    /// One orientation for the whole run, in degrees.
    Fixed { angle_deg: f64 },
}

impl SettingMode {
    /// `n` equally spaced orientations covering the full circle.
    pub fn evenly_spaced(n: usize) -> Self {
        let step = 360.0 / n as f64;
        SettingMode::DiscreteGrid {
            angles_deg: (0..n).map(|i| i as f64 * step).collect(),
        }
    }
}

/// Where emission angles come from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EmissionAngles {
    /// Uniform in `[0, 2π)`.
    #[default]
    Continuous,
    /// Uniform choice from `linspace(0, 2π, points)`.
    Grid { points: usize },
}

/// How the two particles of a pair obtain their hidden parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HiddenParameterPolicy {
    /// Both particles carry the same `p`.
    Shared,
    /// Left gets `p`, right gets `1 − p`.
    #[default]
    Complementary,
    /// Each particle draws its own `p`.
    Independent,
}

/// Distribution of a single hidden-parameter draw.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HiddenParameterDistribution {
    /// Uniform in `[0, 1)`.
    #[default]
    Uniform,
    /// Uniform choice from `½·sin²(linspace(0, π/2, points))`.
    SineSquared { points: usize },
}

/// Spin tag carried by the right-hand particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpinTagPolicy {
    /// Both particles carry `+spin`.
    Shared,
    /// The right particle carries `−spin`.
    #[default]
    Mirrored,
}

/// Per-station configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StationConfig {
    pub settings: SettingMode,
}

impl StationConfig {
    pub fn fixed(angle_deg: f64) -> Self {
        Self {
            settings: SettingMode::Fixed { angle_deg },
        }
    }

    pub fn grid(angles_deg: &[f64]) -> Self {
        Self {
            settings: SettingMode::DiscreteGrid {
                angles_deg: angles_deg.to_vec(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation config
// ---------------------------------------------------------------------------

/// Everything needed to run and analyse one simulated Bell experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub trial_count: u64,
    /// Master seed. `None` draws one from the OS; the drawn seed is recorded
    /// with the run.
    pub seed: Option<u64>,
    pub spin: f64,
    /// Angle added to the right particle's emission angle, radians.
    pub phase_offset: f64,
    pub emission_angles: EmissionAngles,
    pub hidden_policy: HiddenParameterPolicy,
    pub hidden_distribution: HiddenParameterDistribution,
    pub spin_tags: SpinTagPolicy,
    pub rule: RuleVariant,
    pub alice: StationConfig,
    pub bob: StationConfig,
    pub angle_resolution_deg: f64,
    /// Keep `(emission angle, p)` companion arrays for each station.
    pub track_hidden_variables: bool,
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::cosine_power()
    }
}

impl SimulationConfig {
    /// Spin-½ pairs with complementary hidden parameters and the
    /// cosine-power rule under fast-switching uniform settings.
    pub fn cosine_power() -> Self {
        Self {
            trial_count: DEFAULT_TRIAL_COUNT,
            seed: None,
            spin: 0.5,
            phase_offset: PI,
            emission_angles: EmissionAngles::Continuous,
            hidden_policy: HiddenParameterPolicy::Complementary,
            hidden_distribution: HiddenParameterDistribution::Uniform,
            spin_tags: SpinTagPolicy::Mirrored,
            rule: RuleVariant::CosinePower,
            alice: StationConfig::default(),
            bob: StationConfig::default(),
            angle_resolution_deg: DEFAULT_ANGLE_RESOLUTION_DEG,
            track_hidden_variables: false,
            workers: None,
        }
    }

    /// Spin-1 pairs from a discrete emission grid with a shared sine-squared
    /// hidden parameter, detected by the direct-threshold rule on a 32-point
    /// setting grid.
    pub fn direct_threshold() -> Self {
        let spin = 1.0;
        Self {
            spin,
            phase_offset: 2.0 * spin * PI,
            emission_angles: EmissionAngles::Grid {
                points: DEFAULT_EMISSION_GRID_POINTS,
            },
            hidden_policy: HiddenParameterPolicy::Shared,
            hidden_distribution: HiddenParameterDistribution::SineSquared {
                points: DEFAULT_HIDDEN_TABLE_POINTS,
            },
            spin_tags: SpinTagPolicy::Shared,
            rule: RuleVariant::DirectThreshold,
            alice: StationConfig {
                settings: SettingMode::evenly_spaced(32),
            },
            bob: StationConfig {
                settings: SettingMode::evenly_spaced(32),
            },
            angle_resolution_deg: 3.75,
            ..Self::cosine_power()
        }
    }

    /// Spin-½ pairs sharing `p`, detected by the squared-cosine rule.
    pub fn squared_cosine() -> Self {
        Self {
            hidden_policy: HiddenParameterPolicy::Shared,
            spin_tags: SpinTagPolicy::Shared,
            rule: RuleVariant::SquaredCosine,
            ..Self::cosine_power()
        }
    }

    pub fn with_trials(mut self, trial_count: u64) -> Self {
        self.trial_count = trial_count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Harmonic `n = 2·spin`, valid after [`validate`](Self::validate).
    pub fn harmonic(&self) -> u32 {
        (2.0 * self.spin).round() as u32
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.trial_count == 0 {
            return Err(SimError::config("trial_count must be positive"));
        }
        if usize::try_from(self.trial_count).is_err() {
            return Err(SimError::config(format!(
                "trial_count {} exceeds addressable memory",
                self.trial_count
            )));
        }
        if !self.spin.is_finite() || self.spin <= 0.0 {
            return Err(SimError::config(format!(
                "spin must be positive, got {}",
                self.spin
            )));
        }
        let n = 2.0 * self.spin;
        if (n - n.round()).abs() > 1e-9 {
            return Err(SimError::config(format!(
                "spin must be a multiple of 1/2, got {}",
                self.spin
            )));
        }
        if !self.phase_offset.is_finite() {
            return Err(SimError::config("phase_offset must be finite"));
        }
        validate_resolution(self.angle_resolution_deg)?;
        if let EmissionAngles::Grid { points } = self.emission_angles {
            if points < 2 {
                return Err(SimError::config("emission grid needs at least 2 points"));
            }
        }
        if let HiddenParameterDistribution::SineSquared { points } = self.hidden_distribution {
            if points < 2 {
                return Err(SimError::config(
                    "hidden-parameter table needs at least 2 points",
                ));
            }
        }
        validate_station("alice", &self.alice)?;
        validate_station("bob", &self.bob)?;
        if self.workers == Some(0) {
            return Err(SimError::config("workers must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SimError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| SimError::from_io(e, path))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A grid resolution must be positive and divide the full circle.
pub fn validate_resolution(resolution_deg: f64) -> Result<()> {
    if !resolution_deg.is_finite() || resolution_deg <= 0.0 {
        return Err(SimError::config(format!(
            "angle resolution must be positive, got {resolution_deg}"
        )));
    }
    let bins = 360.0 / resolution_deg;
    if (bins - bins.round()).abs() > 1e-9 {
        return Err(SimError::config(format!(
            "angle resolution {resolution_deg}° does not divide 360°: difference \
             bins wrap modulo 360°, so the last bin would be narrower than the rest \
             and 0° and 360° would land in different bins"
        )));
    }
    Ok(())
}

fn validate_station(name: &str, station: &StationConfig) -> Result<()> {
    match &station.settings {
        SettingMode::UniformContinuous => Ok(()),
        SettingMode::DiscreteGrid { angles_deg } => {
            if angles_deg.is_empty() {
                return Err(SimError::config(format!("{name}: setting grid is empty")));
            }
            if angles_deg.iter().any(|a| !a.is_finite()) {
                return Err(SimError::config(format!(
                    "{name}: setting grid contains a non-finite angle"
                )));
            }
            Ok(())
        }
        SettingMode::Fixed { angle_deg } => {
            if !angle_deg.is_finite() {
                return Err(SimError::config(format!("{name}: fixed angle is not finite")));
            }
            Ok(())
        }
    }
}
