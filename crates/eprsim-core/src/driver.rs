//! Trial driver: fans blocks of trials out over scoped worker threads.
//!
//! The run is split into fixed blocks of [`BLOCK_SIZE`] trials. Block `k`
//! draws from its own `source`, `alice` and `bob` streams derived from the
//! master seed, and writes only rows `[k·BLOCK_SIZE, (k+1)·BLOCK_SIZE)` of the
//! pre-allocated arrays. Blocks are dealt round-robin to workers, so the
//! result is bit-identical for any worker count.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::particle::ParticleEmitter;
use crate::record::{HiddenVariables, ResultSet, TrialRecord};
use crate::rng::{RandomSource, os_seed};
use crate::station::{DetectorStation, ResultWriter};

/// Trials per independently seeded block.
pub const BLOCK_SIZE: usize = 65_536;

/// Trials between cancellation checks and progress updates.
const CHECK_STRIDE: usize = 4096;

// ---------------------------------------------------------------------------
// Cancellation and progress
// ---------------------------------------------------------------------------

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Cancel this token on Ctrl-C. Only one handler can be installed per
    /// process.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let flag = Arc::clone(&self.0);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .map_err(|e| SimError::Interrupt(e.to_string()))
    }
}

/// Optional hooks for a run. None of them affect the generated data.
#[derive(Default, Clone, Copy)]
pub struct RunControl<'a> {
    progress: Option<&'a (dyn Fn(u64, u64) + Sync)>,
    cancel: Option<&'a CancelToken>,
    workers: Option<usize>,
}

impl<'a> RunControl<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(completed, total)` from worker threads, and once more
    /// with the final count when the run ends.
    pub fn with_progress(mut self, progress: &'a (dyn Fn(u64, u64) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Override the configured worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    fn report(&self, completed: u64, total: u64) {
        if let Some(progress) = self.progress {
            progress(completed, total);
        }
    }
}

impl std::fmt::Debug for RunControl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .field("workers", &self.workers)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Run output
// ---------------------------------------------------------------------------

/// Hidden-variable companion arrays, indexed like the result arrays.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HiddenTrack {
    pub alice: Vec<HiddenVariables>,
    pub bob: Vec<HiddenVariables>,
}

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone)]
pub struct SimulationRun {
    /// Master seed every stream was derived from.
    pub seed: u64,
    pub requested: u64,
    pub alice: ResultSet,
    pub bob: ResultSet,
    pub hidden: Option<HiddenTrack>,
    /// True when a [`CancelToken`] stopped the run before `requested` trials.
    pub cancelled: bool,
    pub started_at: SystemTime,
    pub elapsed: Duration,
}

impl SimulationRun {
    /// Trials present in both result sets.
    pub fn completed(&self) -> u64 {
        self.alice.len() as u64
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// One block's disjoint slices of the output arrays.
struct BlockJob<'a> {
    index: usize,
    alice: &'a mut [TrialRecord],
    bob: &'a mut [TrialRecord],
    hidden: Option<(&'a mut [HiddenVariables], &'a mut [HiddenVariables])>,
}

/// Owns the emitter and both stations for a configured experiment.
#[derive(Debug)]
pub struct TrialDriver {
    config: SimulationConfig,
    emitter: ParticleEmitter,
    alice: DetectorStation,
    bob: DetectorStation,
}

impl TrialDriver {
    /// Validate `config` and build the emitter and stations.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let emitter = ParticleEmitter::new(&config)?;
        let alice = DetectorStation::new("alice", &config.alice, config.rule)?;
        let bob = DetectorStation::new("bob", &config.bob, config.rule)?;
        Ok(Self {
            config,
            emitter,
            alice,
            bob,
        })
    }

    /// Replace the stations, e.g. to plug in a custom decision rule.
    pub fn with_stations(mut self, alice: DetectorStation, bob: DetectorStation) -> Self {
        self.alice = alice;
        self.bob = bob;
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn emitter(&self) -> &ParticleEmitter {
        &self.emitter
    }

    pub fn alice(&self) -> &DetectorStation {
        &self.alice
    }

    pub fn bob(&self) -> &DetectorStation {
        &self.bob
    }

    /// Run the configured trial count.
    pub fn run_configured(&self) -> Result<SimulationRun> {
        self.run(self.config.trial_count)
    }

    /// Run `trial_count` trials with default controls.
    pub fn run(&self, trial_count: u64) -> Result<SimulationRun> {
        self.run_with(trial_count, &RunControl::default())
    }

    /// Run `trial_count` trials.
    ///
    /// On cancellation the arrays are cut to the longest prefix in which every
    /// trial completed for both stations. A panicking decision rule fails the
    /// whole run with [`SimError::Worker`].
    pub fn run_with(&self, trial_count: u64, control: &RunControl<'_>) -> Result<SimulationRun> {
        if trial_count == 0 {
            return Err(SimError::Config("trial count must be positive".into()));
        }
        let n = usize::try_from(trial_count).map_err(|_| SimError::Allocation {
            trials: trial_count,
        })?;
        let seed = match self.config.seed {
            Some(seed) => seed,
            None => os_seed()?,
        };

        let mut alice = allocate::<TrialRecord>(n, trial_count)?;
        let mut bob = allocate::<TrialRecord>(n, trial_count)?;
        let mut hidden = if self.config.track_hidden_variables {
            Some((
                allocate::<HiddenVariables>(n, trial_count)?,
                allocate::<HiddenVariables>(n, trial_count)?,
            ))
        } else {
            None
        };

        let blocks = n.div_ceil(BLOCK_SIZE);
        let workers = control
            .workers
            .or(self.config.workers)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .clamp(1, blocks);

        log::info!(
            "running {trial_count} trials ({} rule, seed {seed}) in {blocks} blocks on {workers} workers",
            self.config.rule
        );

        let started_at = SystemTime::now();
        let t0 = Instant::now();
        let counter = AtomicU64::new(0);

        let mut queues: Vec<Vec<BlockJob<'_>>> = (0..workers).map(|_| Vec::new()).collect();
        let mut hidden_chunks = hidden.as_mut().map(|(a, b)| {
            a.chunks_mut(BLOCK_SIZE).zip(b.chunks_mut(BLOCK_SIZE))
        });
        for (index, (a, b)) in alice
            .chunks_mut(BLOCK_SIZE)
            .zip(bob.chunks_mut(BLOCK_SIZE))
            .enumerate()
        {
            let hv = hidden_chunks.as_mut().and_then(Iterator::next);
            queues[index % workers].push(BlockJob {
                index,
                alice: a,
                bob: b,
                hidden: hv,
            });
        }

        let mut done = vec![0usize; blocks];
        let mut failure = None;
        std::thread::scope(|s| {
            let handles: Vec<_> = queues
                .into_iter()
                .enumerate()
                .map(|(worker, jobs)| {
                    let counter = &counter;
                    s.spawn(move || {
                        log::debug!("worker {worker}: {} blocks", jobs.len());
                        jobs.into_iter()
                            .map(|job| {
                                let index = job.index;
                                (index, self.run_block(seed, job, control, counter, trial_count))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(results) => {
                        for (index, completed) in results {
                            done[index] = completed;
                        }
                    }
                    Err(payload) => {
                        failure.get_or_insert_with(|| SimError::worker_panic(payload.as_ref()));
                    }
                }
            }
        });
        if let Some(err) = failure {
            log::error!("run aborted: {err}");
            return Err(err);
        }

        let mut prefix = 0usize;
        for (index, &completed) in done.iter().enumerate() {
            prefix += completed;
            let len = BLOCK_SIZE.min(n - index * BLOCK_SIZE);
            if completed < len {
                break;
            }
        }
        let cancelled = prefix < n;
        if cancelled {
            log::warn!("run stopped after {prefix} of {trial_count} trials");
            alice.truncate(prefix);
            bob.truncate(prefix);
            if let Some((a, b)) = hidden.as_mut() {
                a.truncate(prefix);
                b.truncate(prefix);
            }
        }
        control.report(prefix as u64, trial_count);

        let run = SimulationRun {
            seed,
            requested: trial_count,
            alice: ResultSet::from_records(alice),
            bob: ResultSet::from_records(bob),
            hidden: hidden.map(|(alice, bob)| HiddenTrack { alice, bob }),
            cancelled,
            started_at,
            elapsed: t0.elapsed(),
        };
        log::info!(
            "completed {} trials in {:.2?}: alice detected {}, bob detected {}",
            run.completed(),
            run.elapsed,
            run.alice.detections(),
            run.bob.detections()
        );
        Ok(run)
    }

    /// Fill one block. Returns the number of trials written to both stations.
    fn run_block(
        &self,
        seed: u64,
        job: BlockJob<'_>,
        control: &RunControl<'_>,
        counter: &AtomicU64,
        total: u64,
    ) -> usize {
        let BlockJob {
            index,
            alice,
            bob,
            mut hidden,
        } = job;
        let block = index as u64;
        let mut source_rng = RandomSource::stream(seed, "source", block);
        let mut alice_rng = RandomSource::stream(seed, "alice", block);
        let mut bob_rng = RandomSource::stream(seed, "bob", block);
        let len = alice.len();
        let mut alice_out = ResultWriter::new(alice);
        let mut bob_out = ResultWriter::new(bob);
        let mut reported = 0usize;

        for i in 0..len {
            if i % CHECK_STRIDE == 0 {
                if i > reported {
                    let done = counter.fetch_add((i - reported) as u64, Ordering::Relaxed);
                    control.report(done + (i - reported) as u64, total);
                    reported = i;
                }
                if control.is_cancelled() {
                    return i;
                }
            }
            let (left, right) = self.emitter.emit(&mut source_rng);
            self.alice.detect(&left, &mut alice_rng, &mut alice_out);
            self.bob.detect(&right, &mut bob_rng, &mut bob_out);
            if let Some((ha, hb)) = hidden.as_mut() {
                ha[i] = left.hidden_variables();
                hb[i] = right.hidden_variables();
            }
        }
        if len > reported {
            let done = counter.fetch_add((len - reported) as u64, Ordering::Relaxed);
            control.report(done + (len - reported) as u64, total);
        }
        debug_assert_eq!(alice_out.written(), bob_out.written());
        len
    }
}

/// Run `config.trial_count` trials of `config`.
pub fn simulate(config: SimulationConfig) -> Result<SimulationRun> {
    TrialDriver::new(config)?.run_configured()
}

fn allocate<T: Clone + Default>(n: usize, trials: u64) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| SimError::Allocation { trials })?;
    v.resize(n, T::default());
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleVariant, StationConfig};
    use crate::particle::Particle;
    use crate::record::Outcome;
    use crate::rule::DecisionRule;
    use std::sync::Mutex;

    fn config(seed: u64) -> SimulationConfig {
        SimulationConfig::cosine_power().with_seed(seed)
    }

    #[test]
    fn test_equal_lengths() {
        let driver = TrialDriver::new(config(1)).unwrap();
        let run = driver.run(10_000).unwrap();
        assert_eq!(run.alice.len(), 10_000);
        assert_eq!(run.bob.len(), 10_000);
        assert_eq!(run.completed(), 10_000);
        assert!(!run.cancelled);
        assert_eq!(run.seed, 1);
    }

    #[test]
    fn test_zero_trials_is_config_error() {
        let driver = TrialDriver::new(config(1)).unwrap();
        assert!(matches!(driver.run(0), Err(SimError::Config(_))));
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let driver = TrialDriver::new(config(42)).unwrap();
        let n = (2 * BLOCK_SIZE + 1234) as u64;
        let one = driver
            .run_with(n, &RunControl::new().with_workers(1))
            .unwrap();
        let three = driver
            .run_with(n, &RunControl::new().with_workers(3))
            .unwrap();
        assert_eq!(one.alice, three.alice);
        assert_eq!(one.bob, three.bob);
    }

    #[test]
    fn test_same_seed_reproduces() {
        let a = TrialDriver::new(config(7)).unwrap().run(5000).unwrap();
        let b = TrialDriver::new(config(7)).unwrap().run(5000).unwrap();
        let c = TrialDriver::new(config(8)).unwrap().run(5000).unwrap();
        assert_eq!(a.alice, b.alice);
        assert_ne!(a.alice, c.alice);
    }

    #[test]
    fn test_precancelled_run_is_empty() {
        let driver = TrialDriver::new(config(3)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let run = driver
            .run_with(50_000, &RunControl::new().with_cancel(&token))
            .unwrap();
        assert!(run.cancelled);
        assert!(run.alice.is_empty());
        assert!(run.bob.is_empty());
    }

    #[test]
    fn test_midrun_cancel_keeps_valid_prefix() {
        let driver = TrialDriver::new(config(5)).unwrap();
        let n = (3 * BLOCK_SIZE) as u64;
        let token = CancelToken::new();
        let cancel_at = |done: u64, _total: u64| {
            if done >= BLOCK_SIZE as u64 + 10_000 {
                token.cancel();
            }
        };
        let control = RunControl::new()
            .with_workers(1)
            .with_cancel(&token)
            .with_progress(&cancel_at);
        let partial = driver.run_with(n, &control).unwrap();
        assert!(partial.cancelled);
        assert_eq!(partial.alice.len(), partial.bob.len());
        assert!(partial.completed() > BLOCK_SIZE as u64);
        assert!(partial.completed() < n);

        let full = driver.run(n).unwrap();
        let k = partial.alice.len();
        assert_eq!(partial.alice.records(), &full.alice.records()[..k]);
        assert_eq!(partial.bob.records(), &full.bob.records()[..k]);
    }

    #[test]
    fn test_progress_ends_at_total() {
        let driver = TrialDriver::new(config(9)).unwrap();
        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));
        let n = (BLOCK_SIZE + 100) as u64;
        driver
            .run_with(n, &RunControl::new().with_workers(2).with_progress(&progress))
            .unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.last(), Some(&(n, n)));
        assert!(seen.iter().all(|&(d, t)| d <= t && t == n));
    }

    #[test]
    fn test_hidden_tracks_pairing() {
        let mut cfg = config(11);
        cfg.track_hidden_variables = true;
        let driver = TrialDriver::new(cfg).unwrap();
        let run = driver.run(20_000).unwrap();
        let hidden = run.hidden.as_ref().unwrap();
        assert_eq!(hidden.alice.len(), 20_000);
        assert_eq!(hidden.bob.len(), 20_000);
        for (l, r) in hidden.alice.iter().zip(&hidden.bob) {
            assert_eq!(r.emission_angle, l.emission_angle + std::f64::consts::PI);
            assert_eq!(r.hidden_parameter, 1.0 - l.hidden_parameter);
        }
    }

    #[test]
    fn test_same_fixed_setting_is_anticorrelated() {
        let mut cfg = config(13);
        cfg.alice = StationConfig::fixed(0.0);
        cfg.bob = StationConfig::fixed(0.0);
        let run = TrialDriver::new(cfg).unwrap().run(20_000).unwrap();
        let mut coincidences = 0;
        for (a, b) in run.alice.iter().zip(&run.bob) {
            if a.outcome.is_detected() && b.outcome.is_detected() {
                coincidences += 1;
                assert_eq!(a.outcome.value() * b.outcome.value(), -1);
            }
        }
        assert!(coincidences > 10_000);
    }

    #[test]
    fn test_squared_cosine_runs_with_station_streams() {
        let cfg = SimulationConfig::squared_cosine().with_seed(4);
        assert_eq!(cfg.rule, RuleVariant::SquaredCosine);
        let run = TrialDriver::new(cfg).unwrap().run(5000).unwrap();
        assert!(run.alice.iter().any(|r| r.outcome == Outcome::Undetected));
        assert!(run.alice.detections() > 0);
    }

    /// Panics on a rare hidden parameter so only some blocks fail.
    #[derive(Debug)]
    struct FragileRule;

    impl DecisionRule for FragileRule {
        fn variant(&self) -> RuleVariant {
            RuleVariant::DirectThreshold
        }

        fn amplitude(&self, particle: &Particle, setting: f64) -> f64 {
            (setting - particle.emission_angle).cos()
        }

        fn detect(&self, particle: &Particle, setting: f64, _rng: &mut RandomSource) -> Outcome {
            assert!(particle.hidden_parameter <= 0.9999, "rule exploded");
            Outcome::from_sign(self.amplitude(particle, setting))
        }
    }

    #[test]
    fn test_panicking_rule_fails_the_run() {
        let cfg = config(17);
        let driver = TrialDriver::new(cfg.clone()).unwrap();
        let alice = DetectorStation::new("alice", &cfg.alice, cfg.rule)
            .unwrap()
            .with_rule(Box::new(FragileRule));
        let bob = DetectorStation::new("bob", &cfg.bob, cfg.rule).unwrap();
        let driver = driver.with_stations(alice, bob);
        let result = driver.run_with(
            (4 * BLOCK_SIZE) as u64,
            &RunControl::new().with_workers(2),
        );
        match result {
            Err(SimError::Worker(msg)) => assert!(msg.contains("rule exploded")),
            other => panic!("expected worker failure, got {other:?}"),
        }
    }

    #[test]
    fn test_simulate_uses_configured_count() {
        let run = simulate(config(2).with_trials(1000)).unwrap();
        assert_eq!(run.completed(), 1000);
    }
}
