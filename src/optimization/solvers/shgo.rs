use super::sobol::Sobol;
use super::traits::{clamp_to_bounds, OptimizationCallback, Problem, Solver, SolverReport};
use crate::core::ShgoConfig;
use crate::error::{FitError, Result};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use std::cell::{Cell, RefCell};

/// Sampling-based global search with Nelder-Mead polishing.
///
/// Each round draws `n` Sobol points scaled into the box. After all rounds
/// the sample's local minimisers (points no worse than their `dim + 1`
/// nearest neighbours in normalized coordinates) are polished, best first,
/// and the best polished point wins.
pub struct ShgoSolver {
    config: ShgoConfig,
}

struct Sample {
    x: Vec<f64>,
    f: f64,
}

impl ShgoSolver {
    pub fn new(config: ShgoConfig) -> Self {
        Self { config }
    }

    /// Indices of samples that beat their nearest neighbours, best first
    fn local_minimisers(samples: &[Sample], bounds: &[(f64, f64)]) -> Vec<usize> {
        let k = bounds.len() + 1;
        let normalized: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| {
                s.x.iter()
                    .zip(bounds)
                    .map(|(x, &(min, max))| (x - min) / (max - min))
                    .collect()
            })
            .collect();

        let mut minimisers: Vec<usize> = (0..samples.len())
            .filter(|&i| {
                let mut neighbours: Vec<(f64, usize)> = (0..samples.len())
                    .filter(|&j| j != i)
                    .map(|j| {
                        let d: f64 = normalized[i]
                            .iter()
                            .zip(&normalized[j])
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum();
                        (d, j)
                    })
                    .collect();
                neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
                neighbours
                    .iter()
                    .take(k)
                    .all(|&(_, j)| samples[i].f <= samples[j].f)
            })
            .collect();

        minimisers.sort_by(|&a, &b| samples[a].f.total_cmp(&samples[b].f));
        minimisers
    }

    /// Nelder-Mead from `start`, clamped to the box
    fn polish(&self, problem: &dyn Problem, start: &[f64], evals: &Cell<usize>) -> Result<Sample> {
        let bounds = problem.bounds();
        let failure = RefCell::new(None);
        let cost = BoxedCost {
            problem,
            failure: &failure,
            evals,
        };

        // Initial simplex: start plus a 5% step of each range, pointing inwards
        let mut simplex = vec![start.to_vec()];
        for (i, &(min, max)) in bounds.iter().enumerate() {
            let mut vertex = start.to_vec();
            let step = 0.05 * (max - min);
            vertex[i] = if start[i] + step <= max {
                start[i] + step
            } else {
                start[i] - step
            };
            simplex.push(vertex);
        }

        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.config.local_sd_tolerance)
            .map_err(|e| FitError::Polish(e.to_string()))?;

        let result = Executor::new(cost, solver)
            .configure(|state| state.max_iters(self.config.local_max_iters))
            .run();

        // A simulator error inside argmin surfaces as an opaque message
        if let Some(err) = failure.take() {
            return Err(err);
        }
        let result = result.map_err(|e| FitError::Polish(e.to_string()))?;

        let state = result.state();
        let mut x = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| FitError::Polish("no best parameters found".into()))?;
        clamp_to_bounds(&mut x, bounds);

        Ok(Sample {
            x,
            f: state.get_best_cost(),
        })
    }
}

/// Adapts a [`Problem`] to argmin, clamping every vertex into the box
struct BoxedCost<'a> {
    problem: &'a dyn Problem,
    failure: &'a RefCell<Option<FitError>>,
    evals: &'a Cell<usize>,
}

impl CostFunction for BoxedCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let mut x = params.clone();
        clamp_to_bounds(&mut x, self.problem.bounds());
        self.evals.set(self.evals.get() + 1);

        self.problem.cost(&x).map_err(|e| {
            let message = e.to_string();
            self.failure.borrow_mut().get_or_insert(e);
            argmin::core::Error::msg(message)
        })
    }
}

impl Solver for ShgoSolver {
    fn name(&self) -> &str {
        "shgo"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport> {
        let bounds = problem.bounds();
        let mut sobol = Sobol::new(problem.num_params());
        let evals = Cell::new(0);

        let mut samples: Vec<Sample> = Vec::new();
        let mut rounds = 0u32;

        for round in 1..=self.config.iters {
            for _ in 0..self.config.n {
                let mut x = sobol.next_scaled(bounds);
                clamp_to_bounds(&mut x, bounds);
                let f = problem.cost(&x)?;
                evals.set(evals.get() + 1);
                samples.push(Sample { x, f });
            }
            rounds = round as u32;

            if let Some(best) = samples.iter().min_by(|a, b| a.f.total_cmp(&b.f)) {
                callback.on_iteration(rounds, &best.x, best.f)?;
            }
            if callback.should_stop() {
                break;
            }
        }

        let minimisers = Self::local_minimisers(&samples, bounds);
        tracing::debug!(
            samples = samples.len(),
            minimisers = minimisers.len(),
            "shgo sampling done"
        );

        let mut best: Option<Sample> = None;
        for &i in minimisers.iter().take(self.config.max_local) {
            let candidate = self.polish(problem, &samples[i].x, &evals)?;
            // Polishing never makes a sampled point worse
            let candidate = if candidate.f <= samples[i].f {
                candidate
            } else {
                Sample {
                    x: samples[i].x.clone(),
                    f: samples[i].f,
                }
            };
            if best.as_ref().is_none_or(|b| candidate.f < b.f) {
                best = Some(candidate);
            }
        }

        let (x, f, polished) = match best {
            Some(s) => (s.x, s.f, true),
            None => {
                let s = samples
                    .into_iter()
                    .min_by(|a, b| a.f.total_cmp(&b.f))
                    .ok_or_else(|| FitError::Polish("no samples drawn".into()))?;
                (s.x, s.f, false)
            }
        };

        Ok(SolverReport {
            success: polished,
            cost: f,
            iterations: rounds,
            message: if polished {
                "Optimization terminated successfully.".into()
            } else {
                "No local minimiser found in sample".into()
            },
            params: x,
            cost_evals: evals.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::testing::Sphere;
    use super::super::traits::NoopCallback;
    use super::*;

    #[test]
    fn finds_interior_minimum() {
        let sphere = Sphere::new([0.3, 0.7, 0.1, 0.4], [0.5, 0.5, 0.0, 0.5]);
        let mut solver = ShgoSolver::new(ShgoConfig::default());
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();

        assert!(report.success);
        assert!(report.cost < 1.0, "cost {}", report.cost);
        assert_eq!(report.iterations, 10);
        assert_eq!(report.cost_evals, sphere.calls.get());
    }

    #[test]
    fn is_deterministic() {
        let run = || {
            let sphere = Sphere::new([0.6, 0.2, -0.3, 0.9], [0.5, 0.5, 0.0, 0.5]);
            ShgoSolver::new(ShgoConfig::default())
                .solve(&sphere, &mut NoopCallback)
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn sample_minimum_is_a_minimiser() {
        let bounds = [(0.0, 1.0), (0.0, 1.0)];
        let samples = vec![
            Sample { x: vec![0.1, 0.1], f: 3.0 },
            Sample { x: vec![0.5, 0.5], f: 1.0 },
            Sample { x: vec![0.9, 0.9], f: 2.0 },
            Sample { x: vec![0.9, 0.1], f: 4.0 },
        ];
        let minimisers = ShgoSolver::local_minimisers(&samples, &bounds);
        assert_eq!(minimisers.first(), Some(&1));
    }
}
