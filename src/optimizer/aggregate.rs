use crate::core::{FinalResult, Subresult};
use crate::error::{FitError, Result};
use crate::optimization::OptimizerId;
use crate::plot::Plotter;
use crate::storage::ResultStore;
use indexmap::IndexMap;

/// Root mean square of a sequence of errors; 0 for an empty sequence
pub fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

/// Builds the set summary from wavelength-sorted subresults.
///
/// Wall-clock time accumulates over sessions through `previous`; process
/// time is always recomputed from the subresults.
pub fn summarize(
    subresults: &[Subresult],
    wall_clock_min: f64,
    previous: Option<&FinalResult>,
) -> FinalResult {
    let column = |f: fn(&Subresult) -> f64| subresults.iter().map(f).collect::<Vec<f64>>();

    let mut optimizer_counts: IndexMap<String, usize> = IndexMap::new();
    for sub in subresults {
        *optimizer_counts.entry(sub.optimizer.clone()).or_insert(0) += 1;
    }

    let first = subresults.first();
    let optimizer = first.map(|s| s.optimizer.clone()).unwrap_or_default();

    let basin_iterations_required = (optimizer == OptimizerId::BasinHopping.as_str()).then(|| {
        subresults
            .iter()
            .filter(|s| s.optimizer == optimizer && s.optimizer_result.iterations > 1)
            .count()
    });

    let refls_error = column(|s| s.reflectance_error);
    let trans_error = column(|s| s.transmittance_error);
    let finals: Vec<_> = subresults.iter().map(Subresult::final_parameters).collect();

    FinalResult {
        wall_clock_elapsed_min: wall_clock_min
            + previous.map(|p| p.wall_clock_elapsed_min).unwrap_or(0.0),
        process_elapsed_min: subresults.iter().map(|s| s.elapsed_time_s).sum::<f64>() / 60.0,
        r_rmse: rmse(&refls_error),
        t_rmse: rmse(&trans_error),
        optimizer,
        optimizer_ftol: first.map(|s| s.optimizer_ftol).unwrap_or_default(),
        optimizer_xtol: first.map(|s| s.optimizer_xtol).unwrap_or_default(),
        optimizer_diffstep: first.map(|s| s.optimizer_diffstep).unwrap_or_default(),
        optimizer_counts,
        basin_iterations_required,
        wavelengths: column(|s| s.wavelength),
        refls_modeled: column(|s| s.reflectance_modeled),
        refls_measured: column(|s| s.reflectance_measured),
        refls_error,
        trans_modeled: column(|s| s.transmittance_modeled),
        trans_measured: column(|s| s.transmittance_measured),
        trans_error,
        absorption_density: finals.iter().map(|p| p.absorption_density).collect(),
        scattering_density: finals.iter().map(|p| p.scattering_density).collect(),
        scattering_anisotropy: finals.iter().map(|p| p.scattering_anisotropy).collect(),
        mix_factor: finals.iter().map(|p| p.mix_factor).collect(),
    }
}

/// Collects subresults into the persisted final result of a set
pub struct Aggregator<'a> {
    store: &'a dyn ResultStore,
    plotter: &'a dyn Plotter,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a dyn ResultStore, plotter: &'a dyn Plotter) -> Self {
        Self { store, plotter }
    }

    pub fn aggregate(&self, set: &str, wall_clock_min: f64) -> Result<FinalResult> {
        let subresults = self.store.collect_subresults(set)?;
        if subresults.is_empty() {
            return Err(FitError::NoSubresults(set.to_string()));
        }

        let previous = match self.store.read_final_result(set) {
            Ok(previous) => Some(previous),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let result = summarize(&subresults, wall_clock_min, previous.as_ref());
        if result.optimizer_counts.len() > 1 {
            tracing::warn!(
                set,
                counts = ?result.optimizer_counts,
                "set mixes optimizers; metadata is taken from the first wavelength"
            );
        }

        self.store.write_final_result(set, &result)?;
        tracing::info!(
            set,
            wavelengths = result.wavelengths.len(),
            r_rmse = result.r_rmse,
            t_rmse = result.t_rmse,
            wall_clock_min = result.wall_clock_elapsed_min,
            "final result written"
        );

        if let Err(e) = self.plotter.plot_final(set) {
            tracing::warn!(set, error = %e, "final plot failed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluationLog, EvaluationRecord, OptimizerMeta, ParameterVector, TargetEntry};
    use crate::optimization::SolverReport;
    use approx::assert_relative_eq;

    fn sub(wavelength: f64, r_err: f64, optimizer: &str, nit: u32, elapsed: f64) -> Subresult {
        let target = TargetEntry::new(wavelength, 0.4, 0.3);
        let mut log = EvaluationLog::seeded(ParameterVector::new(0.2, 0.5, 0.1, 0.6));
        log.push(EvaluationRecord {
            params: ParameterVector::new(0.3, 0.4, 0.0, 0.7),
            reflectance: 0.4 + r_err,
            transmittance: 0.3,
        });
        let meta = OptimizerMeta {
            name: optimizer.into(),
            ftol: 1e-2,
            xtol: 1e-5,
            diff_step: 0.005,
        };
        let report = SolverReport {
            success: true,
            cost: 0.0,
            iterations: nit,
            message: String::new(),
            params: vec![0.3, 0.4, 0.0, 0.7],
            cost_evals: 1,
        };
        Subresult::from_log(&target, &log, &meta, report, elapsed)
    }

    #[test]
    fn rmse_of_known_errors() {
        assert_relative_eq!(rmse(&[0.1, 0.2, 0.3]), 0.216_024_690, epsilon = 1e-6);
        assert_eq!(rmse(&[]), 0.0);
    }

    #[test]
    fn wall_clock_accumulates_and_process_time_is_recomputed() {
        let subs = vec![sub(500.0, 0.1, "basin_hopping", 1, 60.0), sub(510.0, 0.2, "basin_hopping", 2, 120.0)];
        let previous = FinalResult {
            wall_clock_elapsed_min: 5.0,
            process_elapsed_min: 100.0,
            ..FinalResult::default()
        };

        let result = summarize(&subs, 3.0, Some(&previous));

        assert_relative_eq!(result.wall_clock_elapsed_min, 8.0);
        assert_relative_eq!(result.process_elapsed_min, 3.0);
        assert_eq!(result.basin_iterations_required, Some(1));
        assert_eq!(result.absorption_density, vec![0.3, 0.3]);
        assert_eq!(result.wavelengths, vec![500.0, 510.0]);
    }

    #[test]
    fn first_run_uses_own_wall_clock() {
        let subs = vec![sub(500.0, 0.1, "least_squares", 4, 30.0)];
        let result = summarize(&subs, 2.5, None);
        assert_relative_eq!(result.wall_clock_elapsed_min, 2.5);
        assert_eq!(result.basin_iterations_required, None);
    }

    #[test]
    fn mixed_optimizers_are_counted_in_order() {
        let subs = vec![
            sub(500.0, 0.1, "least_squares", 1, 1.0),
            sub(510.0, 0.1, "basin_hopping", 1, 1.0),
            sub(520.0, 0.1, "least_squares", 1, 1.0),
        ];
        let result = summarize(&subs, 0.0, None);
        assert_eq!(result.optimizer, "least_squares");
        let counts: Vec<(&str, usize)> = result
            .optimizer_counts
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(counts, vec![("least_squares", 2), ("basin_hopping", 1)]);
    }
}
