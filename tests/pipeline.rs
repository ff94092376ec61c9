use leafopt::error::SimulatorError;
use leafopt::optimizer::{Aggregator, BatchScheduler, FitOutcome, WavelengthFitter};
use leafopt::simulation::{RenderRequest, Rendering};
use leafopt::{
    FitConfig, FitError, FsStore, NullPlotter, OptimizerId, ResultStore, Simulator, SlabSimulator,
    TargetEntry,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Slab model that counts calls and can be told to fail at one wavelength
struct Counting {
    inner: SlabSimulator,
    calls: AtomicUsize,
    broken_at: Option<f64>,
    reference_delay: Option<Duration>,
}

impl Counting {
    fn new() -> Self {
        Self {
            inner: SlabSimulator::new(),
            calls: AtomicUsize::new(0),
            broken_at: None,
            reference_delay: None,
        }
    }

    fn slow_reference(delay: Duration) -> Self {
        Self {
            reference_delay: Some(delay),
            ..Self::new()
        }
    }

    fn broken_at(wavelength: f64) -> Self {
        Self {
            broken_at: Some(wavelength),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Simulator for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn render(&self, request: &RenderRequest) -> Result<Rendering, SimulatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_at == Some(request.wavelength) {
            return Err(SimulatorError::Rejected("render node offline".into()));
        }
        if let (true, Some(delay)) = (request.reference, self.reference_delay) {
            thread::sleep(delay);
        }
        self.inner.render(request)
    }
}

/// Measured values produced by the slab model itself, so a perfect fit exists
fn synthetic_targets(wavelengths: &[f64]) -> Vec<TargetEntry> {
    wavelengths
        .iter()
        .enumerate()
        .map(|(i, &wl)| {
            let a = 0.2 + 0.05 * i as f64;
            let r = SlabSimulator::evaluate(a * 200.0, 0.5 * 200.0, 0.1, 0.6).unwrap();
            TargetEntry::new(wl, r.reflectance, r.transmittance)
        })
        .collect()
}

fn workspace(wavelengths: &[f64]) -> (TempDir, FsStore) {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path());
    store.init("leaf", false).unwrap();
    store.write_targets("leaf", &synthetic_targets(wavelengths)).unwrap();
    (dir, store)
}

fn ls_config() -> FitConfig {
    FitConfig::default()
}

#[test]
fn existing_subresult_is_skipped_without_rendering() {
    let (_dir, store) = workspace(&[550.0]);
    let config = ls_config();
    let target = store.read_targets("leaf").unwrap()[0];

    let first = Counting::new();
    let fitter = WavelengthFitter::new(&first, &store, &NullPlotter, &config);
    let outcome = fitter.fit(&target, "leaf", OptimizerId::LeastSquares).unwrap();
    assert!(matches!(outcome, FitOutcome::Completed(_)));
    let before = fs::read(store.subresult_path("leaf", 550.0)).unwrap();

    let second = Counting::new();
    let fitter = WavelengthFitter::new(&second, &store, &NullPlotter, &config);
    let outcome = fitter.fit(&target, "leaf", OptimizerId::LeastSquares).unwrap();

    assert_eq!(outcome, FitOutcome::Skipped);
    assert_eq!(second.calls(), 0);
    assert_eq!(fs::read(store.subresult_path("leaf", 550.0)).unwrap(), before);
}

#[test]
fn subresult_history_ends_with_forced_reevaluation() {
    let (_dir, store) = workspace(&[600.0]);
    let config = ls_config();
    let target = store.read_targets("leaf").unwrap()[0];
    let sim = Counting::new();

    WavelengthFitter::new(&sim, &store, &NullPlotter, &config)
        .fit(&target, "leaf", OptimizerId::LeastSquares)
        .unwrap();

    let sub = store.read_subresult("leaf", 600.0).unwrap();
    assert_eq!(sub.iterations, sub.history_reflectance.len() - 1);
    assert_eq!(sub.history_reflectance[0], 0.0);
    assert_eq!(sub.history_transmittance[0], 0.0);
    assert_eq!(sub.reflectance_modeled, *sub.history_reflectance.last().unwrap());
    assert_eq!(sub.optimizer, "least_squares");
    // Reference render plus every logged evaluation
    assert_eq!(sim.calls(), 1 + sub.iterations);

    let last = sub.final_parameters().to_vec();
    assert_eq!(last, sub.optimizer_result.params);
    for (v, (min, max)) in last.iter().zip(config.bounds.pairs()) {
        assert!(*v >= min && *v <= max);
    }
}

#[test]
fn basin_hopping_run_produces_final_result() {
    let wavelengths = [450.0, 500.0, 550.0];
    let (_dir, store) = workspace(&wavelengths);
    let config = ls_config();
    let sim = Counting::new();
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    let report = scheduler.run("leaf", None, true, "basin_hopping", 1).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.completed.len(), 3);
    let result = report.final_result.unwrap();
    assert_eq!(result.wavelengths, wavelengths.to_vec());
    assert_eq!(result.optimizer, "basin_hopping");
    assert!(result.basin_iterations_required.is_some());
    assert_eq!(result.optimizer_counts.get("basin_hopping"), Some(&3));
    assert!(result.r_rmse.is_finite() && result.t_rmse.is_finite());
    assert_eq!(store.read_final_result("leaf").unwrap(), result);
}

#[test]
fn failing_wavelength_does_not_stop_the_batch() {
    let (_dir, store) = workspace(&[450.0, 500.0, 550.0]);
    let config = ls_config();
    let sim = Counting::broken_at(500.0);
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    let report = scheduler.run("leaf", None, false, "least_squares", 1).unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 500.0);
    assert_eq!(report.completed.len(), 2);
    assert!(!store.subresult_exists("leaf", 500.0));
    assert_eq!(report.final_result.unwrap().wavelengths, vec![450.0, 550.0]);
}

#[test]
fn unknown_optimizer_fails_before_rendering() {
    let (_dir, store) = workspace(&[450.0]);
    let config = ls_config();
    let sim = Counting::new();
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    let err = scheduler.run("leaf", None, false, "gradient_descent", 1).unwrap_err();
    assert!(matches!(err, FitError::UnknownOptimizer(_)));
    assert_eq!(sim.calls(), 0);
}

#[test]
fn resolution_selects_every_nth_target() {
    let (_dir, store) = workspace(&[400.0, 410.0, 420.0, 430.0, 440.0]);
    let config = ls_config();
    let sim = Counting::new();
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    assert!(matches!(
        scheduler.run("leaf", None, false, "least_squares", 0),
        Err(FitError::Batch(_))
    ));

    let report = scheduler.run("leaf", None, false, "least_squares", 2).unwrap();
    let mut done: Vec<f64> = report.completed.iter().map(|s| s.wavelength).collect();
    done.sort_by(f64::total_cmp);
    assert_eq!(done, vec![400.0, 420.0, 440.0]);
}

#[test]
fn rerun_skips_everything_and_accumulates_wall_clock() {
    let (_dir, store) = workspace(&[450.0, 500.0]);
    let config = ls_config();
    let sim = Counting::new();
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    let first = scheduler.run("leaf", None, true, "least_squares", 1).unwrap();
    let first_result = first.final_result.unwrap();
    let calls = sim.calls();

    let second = scheduler.run("leaf", None, true, "least_squares", 1).unwrap();
    assert_eq!(second.skipped.len(), 2);
    assert_eq!(sim.calls(), calls);

    let second_result = second.final_result.unwrap();
    assert!(second_result.wall_clock_elapsed_min >= first_result.wall_clock_elapsed_min);
    assert_eq!(second_result.process_elapsed_min, first_result.process_elapsed_min);
}

#[test]
fn batches_cover_all_targets() {
    let (_dir, store) = workspace(&[400.0, 410.0, 420.0, 430.0, 440.0]);
    let config = ls_config();
    let sim = Counting::new();
    let scheduler = BatchScheduler::new(&sim, &store, &NullPlotter, &config);

    assert!(matches!(
        scheduler.run_in_batches("leaf", 0, "least_squares"),
        Err(FitError::Batch(_))
    ));

    let report = scheduler.run_in_batches("leaf", 2, "least_squares").unwrap();
    assert_eq!(report.completed.len(), 5);
    // 5 % 2 != 0: the last wavelength is offered once more and skipped
    assert_eq!(report.skipped, vec![440.0]);
    assert_eq!(store.collect_subresults("leaf").unwrap().len(), 5);
}

#[test]
fn aggregating_an_empty_set_fails() {
    let (_dir, store) = workspace(&[450.0]);
    let err = Aggregator::new(&store, &NullPlotter).aggregate("leaf", 1.0).unwrap_err();
    assert!(matches!(err, FitError::NoSubresults(_)));
}

#[test]
fn elapsed_time_includes_reference_render() {
    let (_dir, store) = workspace(&[650.0]);
    let config = ls_config();
    let target = store.read_targets("leaf").unwrap()[0];
    let sim = Counting::slow_reference(Duration::from_millis(200));

    WavelengthFitter::new(&sim, &store, &NullPlotter, &config)
        .fit(&target, "leaf", OptimizerId::LeastSquares)
        .unwrap();

    let sub = store.read_subresult("leaf", 650.0).unwrap();
    assert!(sub.elapsed_time_s >= 0.2, "elapsed {}", sub.elapsed_time_s);
}

#[test]
fn persisted_wall_clock_adds_across_sessions() {
    let (_dir, store) = workspace(&[450.0, 500.0]);
    let config = ls_config();
    let sim = Counting::new();
    for target in store.read_targets("leaf").unwrap() {
        WavelengthFitter::new(&sim, &store, &NullPlotter, &config)
            .fit(&target, "leaf", OptimizerId::LeastSquares)
            .unwrap();
    }

    let aggregator = Aggregator::new(&store, &NullPlotter);
    let first = aggregator.aggregate("leaf", 5.0).unwrap();
    assert_eq!(first.wall_clock_elapsed_min, 5.0);

    let second = aggregator.aggregate("leaf", 3.0).unwrap();
    assert_eq!(second.wall_clock_elapsed_min, 8.0);
    assert_eq!(second.process_elapsed_min, first.process_elapsed_min);
    assert_eq!(store.read_final_result("leaf").unwrap().wall_clock_elapsed_min, 8.0);
}
