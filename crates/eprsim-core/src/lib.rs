//! # eprsim-core
//!
//! Local hidden-variable simulation of EPR/Bell-test pair measurements.
//!
//! ## Quick Start
//!
//! ```no_run
//! use eprsim_core::{SimulationConfig, TrialDriver};
//!
//! let config = SimulationConfig::cosine_power().with_seed(7);
//! let driver = TrialDriver::new(config).unwrap();
//! let run = driver.run(1_000_000).unwrap();
//! assert_eq!(run.alice.len(), run.bob.len());
//! ```
//!
//! ## Architecture
//!
//! RandomSource → ParticleEmitter → (left, right) → two DetectorStations →
//! TrialDriver → ResultSets (→ RunArchive on disk)
//!
//! Each station applies a [`DecisionRule`] to the particle it receives and a
//! setting it draws from its own random stream. Row `i` of both result sets
//! always comes from the same emission event.

pub mod archive;
pub mod config;
pub mod driver;
pub mod error;
pub mod npy;
pub mod particle;
pub mod record;
pub mod rng;
pub mod rule;
pub mod station;

pub use archive::{ArchivedRun, MachineInfo, RunArchive, RunMeta};
pub use config::{
    EmissionAngles, HiddenParameterDistribution, HiddenParameterPolicy, RuleVariant, SettingMode,
    SimulationConfig, SpinTagPolicy, StationConfig, validate_resolution,
};
pub use driver::{
    BLOCK_SIZE, CancelToken, HiddenTrack, RunControl, SimulationRun, TrialDriver, simulate,
};
pub use error::{Result, SimError};
pub use particle::{Particle, ParticleEmitter};
pub use record::{HiddenVariables, Outcome, ResultSet, TrialRecord};
pub use rng::RandomSource;
pub use rule::{CosinePower, DecisionRule, DirectThreshold, SquaredCosine, build_rule};
pub use station::{DetectorStation, ResultWriter, SettingSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
