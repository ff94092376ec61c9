use crate::core::{starting_guess, FitConfig, OptimizerMeta, Subresult, TargetEntry};
use crate::error::{FitError, Result, StoreError};
use crate::optimization::{FitProgress, OptimizerId, Problem, Solver, Strategy, WavelengthObjective};
use crate::plot::Plotter;
use crate::simulation::{RenderRequest, Retrying, Simulator};
use crate::storage::ResultStore;
use std::time::Instant;

/// What happened to one wavelength
#[derive(Clone, Debug, PartialEq)]
pub enum FitOutcome {
    /// A subresult already existed; nothing was rendered
    Skipped,
    Completed(FitSummary),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FitSummary {
    pub wavelength: f64,
    pub reflectance_error: f64,
    pub transmittance_error: f64,
    pub evaluations: usize,
    pub elapsed_s: f64,
    pub success: bool,
}

impl FitSummary {
    fn from_subresult(sub: &Subresult) -> Self {
        Self {
            wavelength: sub.wavelength,
            reflectance_error: sub.reflectance_error,
            transmittance_error: sub.transmittance_error,
            evaluations: sub.iterations,
            elapsed_s: sub.elapsed_time_s,
            success: sub.optimizer_result.success,
        }
    }
}

/// Fits one wavelength end to end and checkpoints the result
pub struct WavelengthFitter<'a> {
    simulator: &'a dyn Simulator,
    store: &'a dyn ResultStore,
    plotter: &'a dyn Plotter,
    config: &'a FitConfig,
}

impl<'a> WavelengthFitter<'a> {
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

    fn meta(&self, optimizer: OptimizerId) -> OptimizerMeta {
        let ls = &self.config.least_squares;
        OptimizerMeta {
            name: optimizer.to_string(),
            ftol: ls.ftol,
            xtol: ls.xtol,
            diff_step: ls.diff_step,
        }
    }

    pub fn fit(&self, target: &TargetEntry, set: &str, optimizer: OptimizerId) -> Result<FitOutcome> {
        let wavelength = target.wavelength;
        let span = tracing::info_span!("wavelength", wavelength);
        let _enter = span.enter();

        if self.store.subresult_exists(set, wavelength) {
            tracing::info!("subresult for {:.2} nm already exists, skipping", wavelength);
            return Ok(FitOutcome::Skipped);
        }
        tracing::info!(%optimizer, "optimizing wavelength {:.2} nm", wavelength);
        // Elapsed time covers the reference render too
        let start = Instant::now();

        let simulator = Retrying::new(self.simulator, self.config.batch.simulator_retries);
        simulator
            .render(&RenderRequest::reference(wavelength))
            .map_err(|source| FitError::Simulator { wavelength, source })?;

        let guess = starting_guess(target.absorption_proxy());
        tracing::info!(
            absorption_density = guess.absorption_density,
            scattering_density = guess.scattering_density,
            scattering_anisotropy = guess.scattering_anisotropy,
            mix_factor = guess.mix_factor,
            "starting guess"
        );

        let objective = WavelengthObjective::new(*target, &simulator, self.config, guess);
        let mut strategy = Strategy::from_id(optimizer, self.config);
        let mut progress = FitProgress::new(wavelength);

        let report = strategy.solve(&objective, &mut progress)?;
        let elapsed_s = start.elapsed().as_secs_f64();
        progress.log_summary(report.success, &report.message);

        // Put the winning point last in the history regardless of how the
        // strategy's final evaluation went
        objective.cost(&report.params)?;
        let log = objective.into_log();

        let subresult = Subresult::from_log(target, &log, &self.meta(optimizer), report, elapsed_s);
        match self.store.write_subresult(set, &subresult) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(path)) => {
                tracing::info!(path = %path.display(), "another worker finished first, skipping");
                return Ok(FitOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(
            evaluations = subresult.iterations,
            elapsed_s,
            "optimizing wavelength {:.2} nm finished",
            wavelength
        );

        if let Err(e) = self.plotter.plot_wavelength_history(set, wavelength) {
            tracing::warn!(error = %e, "history plot failed");
        }

        Ok(FitOutcome::Completed(FitSummary::from_subresult(&subresult)))
    }
}
