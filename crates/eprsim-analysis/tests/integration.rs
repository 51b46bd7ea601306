//! Integration tests for eprsim-analysis.
//!
//! Simulated runs go through the analyzer end to end:
//! trial driver → (archive) → coincidence statistics → CHSH.

use eprsim_analysis::{
    AngleGrid, ChshAngles, CoincidenceAnalyzer, analyze, analyze_archive,
    setting_correlation_matrix, verify_pairing,
};
use eprsim_core::{
    RuleVariant, RunArchive, SimError, SimulationConfig, SimulationRun, StationConfig,
    TrialDriver, npy,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run(config: SimulationConfig, trials: u64) -> SimulationRun {
    TrialDriver::new(config).unwrap().run(trials).unwrap()
}

/// Spin-½ settings at the CHSH angles for that spin.
fn chsh_config(rule: SimulationConfig, seed: u64) -> SimulationConfig {
    let mut config = rule.with_seed(seed);
    config.alice = StationConfig::grid(&[0.0, 90.0]);
    config.bob = StationConfig::grid(&[45.0, 135.0]);
    config
}

#[test]
fn same_angle_correlation_is_minus_one() {
    init_logging();
    let mut config = SimulationConfig::cosine_power().with_seed(10);
    config.alice = StationConfig::fixed(0.0);
    config.bob = StationConfig::fixed(0.0);
    let run = run(config, 100_000);
    let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
    assert!(stats.same_angle.coincidences > 50_000);
    assert_eq!(stats.same_angle.correlation, -1.0);
    assert_eq!(stats.bin(0.0).unwrap().correlation, -1.0);
}

#[test]
fn opposite_angle_correlation_is_plus_one() {
    let mut config = SimulationConfig::cosine_power().with_seed(11);
    config.alice = StationConfig::fixed(0.0);
    config.bob = StationConfig::fixed(180.0);
    let run = run(config, 100_000);
    let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
    assert!(stats.opposite_angle.coincidences > 50_000);
    assert_eq!(stats.opposite_angle.correlation, 1.0);
    assert_eq!(stats.bin(180.0).unwrap().correlation, 1.0);
}

#[test]
fn chsh_respects_classical_bound_for_every_rule() {
    init_logging();
    for (k, preset) in [
        SimulationConfig::cosine_power(),
        SimulationConfig::squared_cosine(),
    ]
    .into_iter()
    .enumerate()
    {
        let run = run(chsh_config(preset, 100 + k as u64), 200_000);
        let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
        let chsh = &stats.chsh;
        assert!(
            chsh.respects_classical_bound(),
            "unconditioned S = {}",
            chsh.s_unconditioned
        );
        assert!((chsh.s_quantum - 2.0 * std::f64::consts::SQRT_2).abs() < 1e-9);
        assert!(chsh.terms.iter().all(|t| t.trials > 40_000));
    }

    let mut config = SimulationConfig::direct_threshold().with_seed(102);
    config.alice = StationConfig::grid(&[0.0, 45.0]);
    config.bob = StationConfig::grid(&[22.5, 67.5]);
    let run = run(config, 200_000);
    let stats = analyze(&run.alice, &run.bob, 3.75, 1.0).unwrap();
    assert!(stats.chsh.respects_classical_bound());
}

#[test]
fn canonical_angles_at_spin_half_stay_classical() {
    init_logging();
    // |−3·cos 22.5° + cos 67.5°|
    let expected_qm = 3.0 * 22.5f64.to_radians().cos() - 67.5f64.to_radians().cos();
    for (k, preset) in [
        SimulationConfig::cosine_power(),
        SimulationConfig::squared_cosine(),
        SimulationConfig::direct_threshold(),
    ]
    .into_iter()
    .enumerate()
    {
        let mut config = preset.with_seed(300 + k as u64);
        config.alice = StationConfig::grid(&[0.0, 45.0]);
        config.bob = StationConfig::grid(&[22.5, 67.5]);
        let run = run(config, 200_000);
        let stats = analyze(&run.alice, &run.bob, 3.75, 0.5).unwrap();
        let chsh = &stats.chsh;
        assert_eq!(chsh.angles, ChshAngles::canonical());
        assert!((chsh.s_quantum - expected_qm).abs() < 1e-9);
        assert!(
            chsh.respects_classical_bound(),
            "rule {k}: unconditioned S = {}",
            chsh.s_unconditioned
        );
    }
}

#[test]
fn cosine_power_violates_only_on_coincidences() {
    let run = run(chsh_config(SimulationConfig::cosine_power(), 7), 200_000);
    let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
    assert!(
        stats.chsh.s_coincidence > 2.2,
        "coincidence S = {}",
        stats.chsh.s_coincidence
    );
    assert!(stats.chsh.coincidences_exceed_bound());
    assert!(stats.chsh.s_unconditioned <= 2.0);
    assert!(stats.chsh.z_coincidence.unwrap() > 3.0);
}

#[test]
fn analysis_is_bit_identical_across_workers_and_repeats() {
    init_logging();
    let run = run(SimulationConfig::cosine_power().with_seed(3), 300_000);
    let base = CoincidenceAnalyzer::new(7.5, 0.5).unwrap();
    let one = base.clone().with_workers(1).analyze(&run.alice, &run.bob).unwrap();
    let four = base.clone().with_workers(4).analyze(&run.alice, &run.bob).unwrap();
    let again = base.with_workers(4).analyze(&run.alice, &run.bob).unwrap();
    assert_eq!(one, four);
    assert_eq!(four, again);
}

#[test]
fn uniform_settings_track_the_quantum_curve_shape() {
    let run = run(SimulationConfig::cosine_power().with_seed(21), 1_000_000);
    let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
    assert_eq!(stats.bins.len(), 48);
    assert!(stats.bins.iter().all(|b| b.counts.trials > 0));
    // Anticorrelated at 0°, correlated at 180°.
    assert!(stats.bin(0.0).unwrap().correlation < -0.9);
    assert!(stats.bin(180.0).unwrap().correlation > 0.9);
    assert!(stats.detection_efficiency > 0.5 && stats.detection_efficiency <= 1.0);
    assert!(stats.coincidence_rate > 0.0 && stats.coincidence_rate <= 1.0);
}

#[test]
fn archive_analysis_matches_in_memory_analysis() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    let mut config = chsh_config(SimulationConfig::cosine_power(), 55);
    config.track_hidden_variables = true;
    let driver = TrialDriver::new(config.clone()).unwrap();
    let run = driver.run(50_000).unwrap();
    let dir = RunArchive::save(&run, &config, tmp.path()).unwrap();

    let from_disk = analyze_archive(&dir, None).unwrap();
    let in_memory = analyze(&run.alice, &run.bob, config.angle_resolution_deg, config.spin).unwrap();
    assert_eq!(from_disk, in_memory);

    let archived = RunArchive::load(&dir).unwrap();
    let archived_config = archived.meta.config.clone();
    let report = verify_pairing(&archived.into_run(), &archived_config).unwrap();
    assert!(report.is_consistent());
}

#[test]
fn archive_with_missing_or_truncated_arrays_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = SimulationConfig::cosine_power().with_seed(1);
    let run = run(config.clone(), 20_000);
    let dir = RunArchive::save(&run, &config, tmp.path()).unwrap();

    let alice = dir.join("Alice.npy.gz");
    let bytes = std::fs::read(&alice).unwrap();
    std::fs::write(&alice, &bytes[..bytes.len() / 3]).unwrap();
    assert!(matches!(
        analyze_archive(&dir, Some(7.5)),
        Err(SimError::Decode(_))
    ));

    std::fs::remove_file(&alice).unwrap();
    assert!(matches!(
        analyze_archive(&dir, Some(7.5)),
        Err(SimError::NotFound(_))
    ));
}

#[test]
fn legacy_nan_outcomes_load_as_undetected() {
    let tmp = tempfile::tempdir().unwrap();
    let alice_path = tmp.path().join("Alice.npy.gz");
    let bob_path = tmp.path().join("Bob.npy.gz");
    npy::write_npy_gz(&alice_path, &[[0.0, 1.0], [0.0, f64::NAN], [0.0, -1.0]]).unwrap();
    npy::write_npy_gz(&bob_path, &[[0.0, -1.0], [0.0, 1.0], [0.0, f64::NAN]]).unwrap();
    let alice = npy::read_npy_gz(&alice_path).unwrap();
    let bob = npy::read_npy_gz(&bob_path).unwrap();
    let stats = CoincidenceAnalyzer::new(7.5, 0.5)
        .unwrap()
        .analyze_rows(&alice, &bob)
        .unwrap();
    assert_eq!(stats.trials, 3);
    assert_eq!(stats.same_angle.coincidences, 1);
    assert_eq!(stats.same_angle.correlation, -1.0);
    assert!(!stats.bins.iter().any(|b| b.correlation.is_nan()));
}

#[test]
fn setting_matrix_from_direct_threshold_grid() {
    let config = SimulationConfig::direct_threshold().with_seed(12);
    assert_eq!(config.rule, RuleVariant::DirectThreshold);
    let run = run(config, 200_000);
    let grid = AngleGrid::new(3.75).unwrap();
    let m = setting_correlation_matrix(&run.alice, &run.bob, &grid).unwrap();
    assert_eq!(m.angles.len(), 32);
    assert!(m.values.iter().flatten().all(|v| v.abs() <= 1.0));
}

#[test]
fn custom_chsh_angles_are_honoured() {
    let mut config = SimulationConfig::direct_threshold().with_seed(4);
    config.alice = StationConfig::grid(&[0.0, 45.0]);
    config.bob = StationConfig::grid(&[22.5, 67.5]);
    let run = run(config, 50_000);
    let stats = CoincidenceAnalyzer::new(3.75, 1.0)
        .unwrap()
        .with_chsh_angles(ChshAngles::canonical())
        .analyze(&run.alice, &run.bob)
        .unwrap();
    assert_eq!(stats.chsh.angles, ChshAngles::canonical());
    assert!(stats.chsh.terms.iter().all(|t| t.trials > 10_000));
}

#[test]
#[ignore] // Run with: cargo test -- --ignored
fn ten_million_trial_reference_run() {
    let config = SimulationConfig::cosine_power().with_seed(2015);
    let run = TrialDriver::new(config).unwrap().run_configured().unwrap();
    let stats = analyze(&run.alice, &run.bob, 7.5, 0.5).unwrap();
    assert!(stats.chsh.respects_classical_bound());
    assert!(stats.same_angle.correlation < -0.99);
}
