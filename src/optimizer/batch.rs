use super::aggregate::Aggregator;
use super::driver::{FitOutcome, FitSummary, WavelengthFitter};
use crate::core::{FinalResult, FitConfig, TargetEntry};
use crate::error::{FitError, Result};
use crate::optimization::OptimizerId;
use crate::plot::Plotter;
use crate::simulation::Simulator;
use crate::storage::ResultStore;
use crossbeam::channel::{self, Receiver, Sender};
use rayon::prelude::*;
use std::time::Instant;

/// Per-wavelength event sent from workers to the scheduler
#[derive(Debug)]
enum Progress {
    Completed(FitSummary),
    Skipped(f64),
    Failed(f64, String),
}

/// Outcome of one scheduler run
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<FitSummary>,
    pub skipped: Vec<f64>,
    /// Wavelengths that failed, with the error message
    pub failed: Vec<(f64, String)>,
    pub wall_clock_min: f64,
    pub final_result: Option<FinalResult>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: BatchReport) {
        self.completed.extend(other.completed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self.wall_clock_min += other.wall_clock_min;
        if other.final_result.is_some() {
            self.final_result = other.final_result;
        }
    }
}

/// Target indices of strided batch `i` out of `batch_n`
pub fn batch_indices(wl_n: usize, batch_n: usize, i: usize) -> Vec<usize> {
    if batch_n == 0 {
        return Vec::new();
    }
    (i..wl_n).step_by(batch_n).collect()
}

/// Runs wavelengths through the driver, sequentially or on a worker pool,
/// then aggregates the set
pub struct BatchScheduler<'a> {
    simulator: &'a dyn Simulator,
    store: &'a dyn ResultStore,
    plotter: &'a dyn Plotter,
    config: &'a FitConfig,
}

impl<'a> BatchScheduler<'a> {
    pub fn new(
        simulator: &'a dyn Simulator,
        store: &'a dyn ResultStore,
        plotter: &'a dyn Plotter,
        config: &'a FitConfig,
    ) -> Self {
        Self {
            simulator,
            store,
            plotter,
            config,
        }
    }

    fn fitter(&self) -> WavelengthFitter<'a> {
        WavelengthFitter::new(self.simulator, self.store, self.plotter, self.config)
    }

    fn fit_one(&self, target: &TargetEntry, set: &str, optimizer: OptimizerId) -> Progress {
        match self.fitter().fit(target, set, optimizer) {
            Ok(FitOutcome::Completed(summary)) => Progress::Completed(summary),
            Ok(FitOutcome::Skipped) => Progress::Skipped(target.wavelength),
            Err(e) => Progress::Failed(target.wavelength, e.to_string()),
        }
    }

    /// Drain progress events into a report, logging as they arrive
    fn collect(rx: Receiver<Progress>, total: usize) -> BatchReport {
        let mut report = BatchReport::default();
        for (done, event) in rx.iter().enumerate() {
            let done = done + 1;
            match event {
                Progress::Completed(summary) => {
                    tracing::info!(
                        done,
                        total,
                        wavelength = summary.wavelength,
                        r_error = summary.reflectance_error,
                        t_error = summary.transmittance_error,
                        "wavelength completed"
                    );
                    report.completed.push(summary);
                }
                Progress::Skipped(wavelength) => {
                    tracing::info!(done, total, wavelength, "wavelength skipped");
                    report.skipped.push(wavelength);
                }
                Progress::Failed(wavelength, error) => {
                    tracing::error!(done, total, wavelength, %error, "wavelength failed");
                    report.failed.push((wavelength, error));
                }
            }
        }
        report
    }

    fn dispatch(
        &self,
        targets: &[TargetEntry],
        set: &str,
        optimizer: OptimizerId,
        parallel: bool,
        tx: Sender<Progress>,
    ) -> Result<()> {
        if parallel {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.batch.worker_count())
                .build()?;
            pool.install(|| {
                targets.par_iter().for_each_with(tx, |tx, target| {
                    // Receiver lives until every sender is gone
                    let _ = tx.send(self.fit_one(target, set, optimizer));
                })
            });
        } else {
            for target in targets {
                let _ = tx.send(self.fit_one(target, set, optimizer));
            }
        }
        Ok(())
    }

    /// Fit every `resolution`-th target and aggregate the set.
    ///
    /// Targets default to the set's stored target list. A wavelength that
    /// fails after retries is reported and skipped; the rest of the batch
    /// continues.
    pub fn run(
        &self,
        set: &str,
        targets: Option<Vec<TargetEntry>>,
        parallel: bool,
        optimizer: &str,
        resolution: usize,
    ) -> Result<BatchReport> {
        if resolution == 0 {
            return Err(FitError::Batch("resolution must be at least 1".into()));
        }
        let optimizer: OptimizerId = optimizer.parse()?;

        let started = Instant::now();
        let targets = match targets {
            Some(targets) => targets,
            None => self.store.read_targets(set)?,
        };
        let selected: Vec<TargetEntry> = targets.into_iter().step_by(resolution).collect();
        tracing::info!(
            set,
            %optimizer,
            wavelengths = selected.len(),
            parallel,
            "starting batch"
        );

        let (tx, rx) = channel::unbounded();
        let total = selected.len();
        let mut report = std::thread::scope(|scope| {
            let collector = scope.spawn(move || Self::collect(rx, total));
            let dispatched = self.dispatch(&selected, set, optimizer, parallel, tx);
            let report = collector
                .join()
                .map_err(|_| FitError::Batch("progress collector panicked".into()))?;
            dispatched.map(|()| report)
        })?;

        report.wall_clock_min = started.elapsed().as_secs_f64() / 60.0;
        tracing::info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "finished all wavelengths, saving final result"
        );

        let aggregator = Aggregator::new(self.store, self.plotter);
        match aggregator.aggregate(set, report.wall_clock_min) {
            Ok(result) => report.final_result = Some(result),
            // Every wavelength failed; nothing to summarize yet
            Err(FitError::NoSubresults(_)) if !report.failed.is_empty() => {
                tracing::warn!(set, "no subresults to aggregate");
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    /// Run the set as `batch_n` strided batches.
    ///
    /// Batch `i` holds targets `i, i + batch_n, ...`. When `batch_n` does not
    /// divide the target count the last target is run once more on its own;
    /// it is normally skipped by its checkpoint.
    pub fn run_in_batches(&self, set: &str, batch_n: usize, optimizer: &str) -> Result<BatchReport> {
        if batch_n == 0 {
            return Err(FitError::Batch("batch count must be at least 1".into()));
        }
        let targets = self.store.read_targets(set)?;
        let wl_n = targets.len();

        let mut total = BatchReport::default();
        let pick = |indices: Vec<usize>| -> Vec<TargetEntry> {
            indices.into_iter().map(|i| targets[i]).collect()
        };

        for i in 0..batch_n {
            let batch = pick(batch_indices(wl_n, batch_n, i));
            if batch.is_empty() {
                continue;
            }
            tracing::info!(batch = i, wavelengths = batch.len(), "running batch");
            total.merge(self.run(set, Some(batch), true, optimizer, 1)?);
        }

        if wl_n > 0 && wl_n % batch_n != 0 {
            tracing::info!(batch = batch_n, "running last wavelength");
            total.merge(self.run(set, Some(pick(vec![wl_n - 1])), true, optimizer, 1)?);
        }
        Ok(total)
    }
}
