use super::traits::{clamp_to_bounds, NoopCallback, OptimizationCallback, Problem, Restarted, Solver, SolverReport};
use super::Strategy;
use crate::core::BasinHoppingConfig;
use crate::error::Result;
use crate::optimization::callback::{EarlyStop, HopCallback};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random displacement applied before each local minimization
pub trait StepTaker {
    fn take_step(&mut self, x: &mut [f64], bounds: &[(f64, f64)]);
}

/// Uniform jitter of `stepsize` times each parameter's range, clamped to the box
pub struct BoundedStepper {
    stepsize: f64,
    rng: StdRng,
}

impl BoundedStepper {
    pub fn new(stepsize: f64, seed: u64) -> Self {
        Self {
            stepsize,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl StepTaker for BoundedStepper {
    fn take_step(&mut self, x: &mut [f64], bounds: &[(f64, f64)]) {
        for (v, &(min, max)) in x.iter_mut().zip(bounds) {
            let s = self.stepsize * (max - min);
            *v += self.rng.gen_range(-s..=s);
        }
        clamp_to_bounds(x, bounds);
    }
}

/// Basin hopping: perturb, minimize locally, accept or reject.
///
/// With temperature 0 only strict improvements are accepted. The hop
/// callback sees every local minimum and may end the run early.
pub struct BasinHoppingSolver {
    config: BasinHoppingConfig,
    local: Box<Strategy>,
    stepper: Box<dyn StepTaker>,
    on_minimum: Box<dyn HopCallback>,
    rng: StdRng,
}

impl BasinHoppingSolver {
    pub fn new(config: BasinHoppingConfig, local: Strategy) -> Self {
        Self {
            stepper: Box::new(BoundedStepper::new(config.stepsize, config.seed)),
            on_minimum: Box::new(EarlyStop::new(config.ftol_abs)),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            local: Box::new(local),
            config,
        }
    }

    pub fn with_stepper(mut self, stepper: Box<dyn StepTaker>) -> Self {
        self.stepper = stepper;
        self
    }

    pub fn with_hop_callback(mut self, callback: Box<dyn HopCallback>) -> Self {
        self.on_minimum = callback;
        self
    }

    pub fn local(&self) -> &Strategy {
        &self.local
    }

    fn accept(&mut self, f_new: f64, f_old: f64) -> bool {
        if f_new < f_old {
            return true;
        }
        if self.config.temperature <= 0.0 {
            return false;
        }
        let w = (-(f_new - f_old) / self.config.temperature).exp();
        self.rng.r#gen::<f64>() < w
    }

    fn minimize_from(&mut self, problem: &dyn Problem, start: Vec<f64>) -> Result<SolverReport> {
        let restarted = Restarted::new(problem, start);
        self.local.solve(&restarted, &mut NoopCallback)
    }
}

impl Solver for BasinHoppingSolver {
    fn name(&self) -> &str {
        "basin_hopping"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport> {
        let bounds = problem.bounds().to_vec();

        let initial = self.minimize_from(problem, problem.initial_params().to_vec())?;
        let mut cost_evals = initial.cost_evals;
        let mut success = initial.success;
        let (mut x, mut f) = (initial.params, initial.cost);
        let (mut best_x, mut best_f) = (x.clone(), f);

        let mut hops = 0u32;
        let mut message = "requested number of basinhopping iterations completed successfully";

        for hop in 1..=self.config.niter {
            let mut trial = x.clone();
            self.stepper.take_step(&mut trial, &bounds);

            let minimum = self.minimize_from(problem, trial)?;
            cost_evals += minimum.cost_evals;
            hops = hop;

            let accepted = self.accept(minimum.cost, f);
            tracing::debug!(hop, cost = minimum.cost, accepted, "basin hop");

            if accepted {
                x = minimum.params.clone();
                f = minimum.cost;
                if f < best_f {
                    best_x = x.clone();
                    best_f = f;
                    success = minimum.success;
                }
            }

            callback.on_iteration(hop, &best_x, best_f)?;

            if self.on_minimum.on_minimum(&minimum.params, minimum.cost, accepted) {
                message = "callback function requested stop early by returning True";
                break;
            }
            if callback.should_stop() {
                message = "Stopped by callback";
                break;
            }
        }

        Ok(SolverReport {
            success,
            cost: best_f,
            iterations: hops,
            message: message.to_string(),
            params: best_x,
            cost_evals,
        })
    }
}
