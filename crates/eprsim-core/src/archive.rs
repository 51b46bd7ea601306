//! Run archives for offline analysis.
//!
//! An archive is a directory containing:
//! - `run.json`: metadata (configuration, seed, timing, machine info)
//! - `Alice.npy.gz`, `Bob.npy.gz`: `(setting, outcome)` rows
//! - `Alice-hv.npy.gz`, `Bob-hv.npy.gz`: `(emission angle, hidden parameter)`
//!   rows, present when hidden variables were tracked

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::driver::{HiddenTrack, SimulationRun};
use crate::error::{Result, SimError};
use crate::npy::{read_npy_gz, write_npy_gz};
use crate::record::{ResultSet, hidden_from_rows, hidden_to_rows};

pub const META_FILE: &str = "run.json";
pub const ALICE_FILE: &str = "Alice.npy.gz";
pub const BOB_FILE: &str = "Bob.npy.gz";
pub const ALICE_HIDDEN_FILE: &str = "Alice-hv.npy.gz";
pub const BOB_HIDDEN_FILE: &str = "Bob-hv.npy.gz";

const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Machine info
// ---------------------------------------------------------------------------

/// Host the run was archived on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub os: String,
    pub arch: String,
    pub cores: usize,
}

impl MachineInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata (run.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub version: u32,
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub config: SimulationConfig,
    pub seed: u64,
    pub requested: u64,
    pub completed: u64,
    pub cancelled: bool,
    pub hidden_variables: bool,
    pub machine: MachineInfo,
    pub eprsim_version: String,
}

/// A run read back from disk.
#[derive(Debug, Clone)]
pub struct ArchivedRun {
    pub meta: RunMeta,
    pub alice: ResultSet,
    pub bob: ResultSet,
    pub hidden: Option<HiddenTrack>,
}

impl ArchivedRun {
    /// Rebuild the in-memory run.
    pub fn into_run(self) -> SimulationRun {
        SimulationRun {
            seed: self.meta.seed,
            requested: self.meta.requested,
            alice: self.alice,
            bob: self.bob,
            hidden: self.hidden,
            cancelled: self.meta.cancelled,
            started_at: SystemTime::from(self.meta.started_at),
            elapsed: Duration::from_millis(self.meta.duration_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

pub struct RunArchive;

impl RunArchive {
    /// Write `run` into a new directory under `dir` and return its path.
    ///
    /// The directory name is `{timestamp}-{rule}-{short id}`.
    pub fn save(run: &SimulationRun, config: &SimulationConfig, dir: &Path) -> Result<PathBuf> {
        if run.alice.len() != run.bob.len() {
            return Err(SimError::SizeMismatch {
                alice: run.alice.len(),
                bob: run.bob.len(),
            });
        }
        let id = Uuid::new_v4().to_string();
        let started = DateTime::<Utc>::from(run.started_at);
        let ended = DateTime::<Utc>::from(run.started_at + run.elapsed);

        let dir_name = format!("{}-{}-{}", compact_timestamp(&started), config.rule, &id[..8]);
        let run_dir = dir.join(dir_name);
        fs::create_dir_all(&run_dir).map_err(|e| SimError::from_io(e, &run_dir))?;

        write_npy_gz(&run_dir.join(ALICE_FILE), &run.alice.to_rows())?;
        write_npy_gz(&run_dir.join(BOB_FILE), &run.bob.to_rows())?;
        if let Some(hidden) = &run.hidden {
            write_npy_gz(&run_dir.join(ALICE_HIDDEN_FILE), &hidden_to_rows(&hidden.alice))?;
            write_npy_gz(&run_dir.join(BOB_HIDDEN_FILE), &hidden_to_rows(&hidden.bob))?;
        }

        let meta = RunMeta {
            version: FORMAT_VERSION,
            id,
            started_at: started,
            ended_at: ended,
            duration_ms: run.elapsed.as_millis() as u64,
            config: config.clone(),
            seed: run.seed,
            requested: run.requested,
            completed: run.completed(),
            cancelled: run.cancelled,
            hidden_variables: run.hidden.is_some(),
            machine: MachineInfo::current(),
            eprsim_version: crate::VERSION.to_string(),
        };
        fs::write(run_dir.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;

        log::info!(
            "archived {} trials (started {}) to {}",
            meta.completed,
            display_timestamp(&meta.started_at),
            run_dir.display()
        );
        Ok(run_dir)
    }

    /// Read an archive directory written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<ArchivedRun> {
        let meta_path = path.join(META_FILE);
        let json = fs::read_to_string(&meta_path).map_err(|e| SimError::from_io(e, &meta_path))?;
        let meta: RunMeta = serde_json::from_str(&json)
            .map_err(|e| SimError::Decode(format!("{}: {e}", meta_path.display())))?;
        if meta.version != FORMAT_VERSION {
            return Err(SimError::Decode(format!(
                "unsupported archive version {}",
                meta.version
            )));
        }

        let alice = ResultSet::from_rows(&read_npy_gz(&path.join(ALICE_FILE))?)?;
        let bob = ResultSet::from_rows(&read_npy_gz(&path.join(BOB_FILE))?)?;
        if alice.len() != bob.len() {
            return Err(SimError::SizeMismatch {
                alice: alice.len(),
                bob: bob.len(),
            });
        }
        if alice.len() as u64 != meta.completed {
            return Err(SimError::Decode(format!(
                "archive lists {} trials but arrays hold {}",
                meta.completed,
                alice.len()
            )));
        }

        let hidden = if meta.hidden_variables {
            let alice_hv = hidden_from_rows(&read_npy_gz(&path.join(ALICE_HIDDEN_FILE))?)?;
            let bob_hv = hidden_from_rows(&read_npy_gz(&path.join(BOB_HIDDEN_FILE))?)?;
            if alice_hv.len() != alice.len() || bob_hv.len() != alice.len() {
                return Err(SimError::Decode(
                    "hidden-variable arrays do not match the result arrays".into(),
                ));
            }
            Some(HiddenTrack {
                alice: alice_hv,
                bob: bob_hv,
            })
        } else {
            None
        };

        log::info!("loaded {} trials from {}", alice.len(), path.display());
        Ok(ArchivedRun {
            meta,
            alice,
            bob,
            hidden,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Second-resolution UTC timestamp without colons, e.g. `2026-10-19T013000Z`.
fn compact_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H%M%SZ").to_string()
}

/// Second-resolution RFC 3339 timestamp, e.g. `2026-10-19T01:30:00Z`.
fn display_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
