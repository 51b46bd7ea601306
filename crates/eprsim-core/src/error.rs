//! Error type shared by the simulation and analysis crates.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout eprsim.
pub type Result<T> = std::result::Result<T, SimError>;

/// Every failure the simulator or analyzer can report.
#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid configuration, detected before any trial runs.
    #[error("configuration error: {0}")]
    Config(String),

    /// The two stations' result arrays differ in length.
    #[error("size mismatch: alice has {alice} records, bob has {bob}")]
    SizeMismatch { alice: usize, bob: usize },

    /// A hidden-variable companion array differs in length from the result
    /// array it belongs to.
    #[error("hidden-variable track has {hidden} rows, results have {results}")]
    HiddenLength { results: usize, hidden: usize },

    /// A setting angle (or hidden variable) is NaN or infinite.
    #[error("non-finite {column} at row {row}")]
    NonFinite { row: usize, column: &'static str },

    /// An outcome column value outside {-1, 0, +1, NaN}.
    #[error("invalid outcome {value} at row {row}")]
    InvalidOutcome { row: usize, value: f64 },

    /// A persisted array or metadata file does not exist.
    #[error("resource not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A persisted file exists but cannot be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Result storage for the requested trial count could not be reserved.
    #[error("cannot allocate result storage for {trials} trials")]
    Allocation { trials: u64 },

    /// A simulation or analysis worker thread panicked.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The interrupt handler could not be installed.
    #[error("interrupt handler error: {0}")]
    Interrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Map an I/O error on `path`, turning `NotFound` into [`SimError::NotFound`].
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SimError::NotFound(path.into())
        } else {
            SimError::Io(err)
        }
    }

    /// Turn a joined thread's panic payload into [`SimError::Worker`].
    pub fn worker_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string());
        SimError::Worker(msg)
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }
}
