//! Detector stations.
//!
//! A station owns its setting policy and decision rule. It never owns a
//! random stream: the driver hands each station its own stream per block, so
//! the two arms stay independent however trials are fanned out.

use std::f64::consts::TAU;

use crate::config::{RuleVariant, SettingMode, StationConfig};
use crate::error::{Result, SimError};
use crate::particle::Particle;
use crate::record::{Outcome, TrialRecord};
use crate::rng::RandomSource;
use crate::rule::{DecisionRule, build_rule};

/// Resolved setting policy, angles in radians within `[0, 2π)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingSource {
    Uniform,
    Grid(Vec<f64>),
    Fixed(f64),
}

impl SettingSource {
    pub fn from_mode(mode: &SettingMode) -> Result<Self> {
        match mode {
            SettingMode::UniformContinuous => Ok(Self::Uniform),
            SettingMode::DiscreteGrid { angles_deg } => {
                if angles_deg.is_empty() {
                    return Err(SimError::Config("setting grid is empty".into()));
                }
                angles_deg
                    .iter()
                    .map(|&a| normalize_degrees(a))
                    .collect::<Result<Vec<_>>>()
                    .map(Self::Grid)
            }
            SettingMode::Fixed { angle_deg } => normalize_degrees(*angle_deg).map(Self::Fixed),
        }
    }

    /// The setting for the next trial.
    pub fn next(&self, rng: &mut RandomSource) -> f64 {
        match self {
            Self::Uniform => rng.angle(),
            Self::Grid(angles) => rng.pick(angles),
            Self::Fixed(angle) => *angle,
        }
    }
}

fn normalize_degrees(deg: f64) -> Result<f64> {
    if !deg.is_finite() {
        return Err(SimError::Config(format!("setting angle {deg} is not finite")));
    }
    let rad = deg.to_radians().rem_euclid(TAU);
    // rem_euclid can round up to exactly 2π for tiny negative inputs.
    Ok(if rad >= TAU { 0.0 } else { rad })
}

/// Sequential writer over a station's pre-sized slice of the result array.
///
/// The index advances exactly once per [`push`](Self::push); the driver keeps
/// both stations' writers in lock step.
pub struct ResultWriter<'a> {
    slots: &'a mut [TrialRecord],
    next: usize,
}

impl<'a> ResultWriter<'a> {
    pub fn new(slots: &'a mut [TrialRecord]) -> Self {
        Self { slots, next: 0 }
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.slots[self.next] = record;
        self.next += 1;
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.next
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// One measuring arm of the experiment.
pub struct DetectorStation {
    name: String,
    settings: SettingSource,
    rule: Box<dyn DecisionRule>,
}

impl DetectorStation {
    pub fn new(name: impl Into<String>, config: &StationConfig, rule: RuleVariant) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            settings: SettingSource::from_mode(&config.settings)?,
            rule: build_rule(rule),
        })
    }

    /// Replace the decision rule with a custom strategy.
    pub fn with_rule(mut self, rule: Box<dyn DecisionRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &dyn DecisionRule {
        self.rule.as_ref()
    }

    pub fn settings(&self) -> &SettingSource {
        &self.settings
    }

    /// Draw this station's setting.
    pub fn get_setting(&self, rng: &mut RandomSource) -> f64 {
        self.settings.next(rng)
    }

    /// Choose a setting, measure `particle` and return the record.
    pub fn measure(&self, particle: &Particle, rng: &mut RandomSource) -> TrialRecord {
        let setting = self.get_setting(rng);
        let outcome = self.rule.detect(particle, setting, rng);
        TrialRecord { setting, outcome }
    }

    /// Measure `particle` and append the record to `out`.
    pub fn detect(
        &self,
        particle: &Particle,
        rng: &mut RandomSource,
        out: &mut ResultWriter<'_>,
    ) -> Outcome {
        let record = self.measure(particle, rng);
        out.push(record);
        record.outcome
    }
}

impl std::fmt::Debug for DetectorStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorStation")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("rule", &self.rule.variant())
            .finish()
    }
}
