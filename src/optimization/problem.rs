use crate::core::{EvaluationLog, EvaluationRecord, FitConfig, ObjectiveConfig, ParameterVector, TargetEntry};
use crate::error::{FitError, Result};
use crate::optimization::solvers::traits::Problem;
use crate::simulation::{RenderRequest, Rendering, Simulator};
use std::cell::RefCell;

/// Objective for a single wavelength.
///
/// Every call renders the candidate, scores its distance to the measured
/// pair and appends the evaluation to the log. The log is handed back to the
/// driver with [`WavelengthObjective::into_log`] once the strategy is done.
pub struct WavelengthObjective<'a> {
    target: TargetEntry,
    simulator: &'a dyn Simulator,
    objective: ObjectiveConfig,
    bounds: Vec<(f64, f64)>,
    start: Vec<f64>,
    log: RefCell<EvaluationLog>,
}

impl<'a> WavelengthObjective<'a> {
    pub fn new(
        target: TargetEntry,
        simulator: &'a dyn Simulator,
        config: &FitConfig,
        start: ParameterVector,
    ) -> Self {
        Self {
            target,
            simulator,
            objective: config.objective.clone(),
            bounds: config.bounds.pairs(),
            start: start.to_vec(),
            log: RefCell::new(EvaluationLog::seeded(start)),
        }
    }

    /// Render, score and record one candidate
    pub fn evaluate(&self, params: &ParameterVector) -> Result<f64> {
        let request =
            RenderRequest::scaled(self.target.wavelength, params, self.objective.density_scale);
        let Rendering {
            reflectance,
            transmittance,
        } = self
            .simulator
            .render(&request)
            .map_err(|source| FitError::Simulator {
                wavelength: self.target.wavelength,
                source,
            })?;

        let dr = reflectance - self.target.reflectance_measured;
        let dt = transmittance - self.target.transmittance_measured;
        let mut cost = (dr * dr + dt * dt).sqrt() * self.objective.density_scale;

        // Physically impossible: more light out than in
        if reflectance + transmittance > 1.0 {
            cost += self.objective.penalty;
        }

        self.log.borrow_mut().push(EvaluationRecord {
            params: *params,
            reflectance,
            transmittance,
        });

        tracing::trace!(
            wavelength = self.target.wavelength,
            reflectance,
            transmittance,
            cost,
            "evaluated"
        );

        Ok(cost)
    }

    pub fn evaluations(&self) -> usize {
        self.log.borrow().evaluations()
    }

    pub fn into_log(self) -> EvaluationLog {
        self.log.into_inner()
    }
}

impl Problem for WavelengthObjective<'_> {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        self.evaluate(&ParameterVector::from_slice(params))
    }

    fn num_params(&self) -> usize {
        self.start.len()
    }

    fn initial_params(&self) -> &[f64] {
        &self.start
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimulatorError;

    /// Returns a fixed rendering regardless of the request
    struct Fixed(f64, f64);

    impl Simulator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn render(&self, _request: &RenderRequest) -> std::result::Result<Rendering, SimulatorError> {
            Ok(Rendering {
                reflectance: self.0,
                transmittance: self.1,
            })
        }
    }

    struct Broken;

    impl Simulator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn render(&self, _request: &RenderRequest) -> std::result::Result<Rendering, SimulatorError> {
            Err(SimulatorError::Rejected("no license".into()))
        }
    }

    fn objective(sim: &dyn Simulator) -> WavelengthObjective<'_> {
        WavelengthObjective::new(
            TargetEntry::new(550.0, 0.45, 0.35),
            sim,
            &FitConfig::default(),
            ParameterVector::new(0.3, 0.5, 0.2, 0.6),
        )
    }

    #[test]
    fn infeasible_rendering_is_dominated_by_penalty() {
        let sim = Fixed(0.6, 0.5);
        let obj = objective(&sim);
        let cost = obj.cost(&[0.3, 0.5, 0.2, 0.6]).unwrap();
        assert!(cost >= 1e6);
    }

    #[test]
    fn feasible_rendering_stays_below_penalty() {
        // Worst feasible point is still far below the penalty
        let sim = Fixed(0.0, 1.0);
        let obj = objective(&sim);
        let cost = obj.cost(&[0.3, 0.5, 0.2, 0.6]).unwrap();
        assert!(cost < 1e6);
        let expected = ((0.45f64).powi(2) + (0.65f64).powi(2)).sqrt() * 200.0;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn every_evaluation_is_logged_after_seed() {
        let sim = Fixed(0.4, 0.3);
        let obj = objective(&sim);
        obj.cost(&[0.1, 0.1, 0.0, 0.5]).unwrap();
        obj.cost(&[0.2, 0.1, 0.0, 0.5]).unwrap();
        assert_eq!(obj.evaluations(), 2);

        let log = obj.into_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[0].params, ParameterVector::new(0.3, 0.5, 0.2, 0.6));
        assert_eq!(log.records()[0].reflectance, 0.0);
        assert_eq!(log.records()[2].params.absorption_density, 0.2);
    }

    #[test]
    fn simulator_failure_carries_wavelength() {
        let obj = objective(&Broken);
        match obj.cost(&[0.3, 0.5, 0.2, 0.6]) {
            Err(FitError::Simulator { wavelength, .. }) => assert_eq!(wavelength, 550.0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(obj.evaluations(), 0);
    }
}
