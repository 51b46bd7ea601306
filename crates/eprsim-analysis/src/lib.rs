//! # eprsim-analysis
//!
//! Coincidence statistics for paired EPR simulation records.
//!
//! ```no_run
//! use eprsim_core::{SimulationConfig, TrialDriver};
//!
//! let run = TrialDriver::new(SimulationConfig::cosine_power().with_seed(1))
//!     .unwrap()
//!     .run(1_000_000)
//!     .unwrap();
//! let stats = eprsim_analysis::analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
//! println!("{}", stats.chsh);
//! ```
//!
//! Settings and setting differences are binned on an [`AngleGrid`]; each
//! difference bin yields joint/marginal outcome probabilities and `E(a,b)`.
//! [`ChshReport`] evaluates `S` at four setting pairs against the quantum
//! prediction and the classical bound. Nothing here renders or prints; the
//! returned structures are plain, serializable data.

pub mod chsh;
pub mod coincidence;
pub mod grid;
pub mod internals;

use std::path::Path;

use eprsim_core::{Result, ResultSet, RunArchive};

pub use chsh::{
    CLASSICAL_BOUND, ChshAngles, ChshReport, ExpectationTerm, PairCounts, classical_correlation,
    quantum_correlation,
};
pub use coincidence::{
    AngleCheck, BinCounts, BinStatistics, CoincidenceAnalyzer, CoincidenceStatistics,
};
pub use grid::AngleGrid;
pub use internals::{
    HiddenParameterHistograms, PairingReport, SettingCorrelationMatrix,
    hidden_parameter_histograms, setting_correlation_matrix, verify_pairing,
};

/// Analyse two paired result sets at `resolution_deg` for particles of `spin`.
pub fn analyze(
    alice: &ResultSet,
    bob: &ResultSet,
    resolution_deg: f64,
    spin: f64,
) -> Result<CoincidenceStatistics> {
    CoincidenceAnalyzer::new(resolution_deg, spin)?.analyze(alice, bob)
}

/// Load a run archive and analyse it with the archived spin. `None` uses the
/// resolution the run was configured with.
pub fn analyze_archive(path: &Path, resolution_deg: Option<f64>) -> Result<CoincidenceStatistics> {
    let archived = RunArchive::load(path)?;
    let config = &archived.meta.config;
    let resolution = resolution_deg.unwrap_or(config.angle_resolution_deg);
    CoincidenceAnalyzer::new(resolution, config.spin)?.analyze(&archived.alice, &archived.bob)
}
