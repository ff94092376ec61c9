use super::least_squares::LeastSquaresSolver;
use super::traits::{clamp_to_bounds, NoopCallback, OptimizationCallback, Problem, Restarted, Solver, SolverReport};
use crate::core::{AnnealConfig, LeastSquaresConfig};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Visiting steps beyond this magnitude are redrawn inside it
const TAIL_LIMIT: f64 = 1e8;
/// Nudge keeping wrapped points off the lower bound
const MIN_VISIT_BOUND: f64 = 1e-10;

/// Generalized simulated annealing with local polish of new bests.
///
/// Candidates come from the Tsallis visiting distribution with parameter
/// `visit`; uphill moves pass the generalized Metropolis test with parameter
/// `accept`. When the temperature falls below `initial_temp *
/// restart_temp_ratio` the walk restarts from a random point in the box.
pub struct AnnealSolver {
    config: AnnealConfig,
    local: LeastSquaresSolver,
}

/// Precomputed constants of the visiting distribution
struct Visiting {
    qv: f64,
    factor4_p: f64,
    factor6: f64,
}

impl Visiting {
    fn new(qv: f64) -> Self {
        let factor2 = ((4.0 - qv) * (qv - 1.0).ln()).exp();
        let factor3 = ((2.0 - qv) * 2f64.ln() / (qv - 1.0)).exp();
        let factor4_p = PI.sqrt() * factor2 / (factor3 * (3.0 - qv));
        let factor5 = 1.0 / (qv - 1.0) - 0.5;
        let d1 = 2.0 - factor5;
        let factor6 = PI * (1.0 - factor5) / (PI * (1.0 - factor5)).sin() / ln_gamma(d1).exp();
        Self {
            qv,
            factor4_p,
            factor6,
        }
    }

    /// One draw from the distorted Cauchy-Lorentz distribution
    fn sample(&self, rng: &mut StdRng, temperature: f64) -> f64 {
        let qv = self.qv;
        let x: f64 = rng.sample(StandardNormal);
        let y: f64 = rng.sample(StandardNormal);

        let factor1 = (temperature.ln() / (qv - 1.0)).exp();
        let factor4 = self.factor4_p * factor1;
        let sigmax = (-(qv - 1.0) * (self.factor6 / factor4).ln() / (3.0 - qv)).exp();
        let den = ((qv - 1.0) * y.abs().ln() / (3.0 - qv)).exp();

        let step = x * sigmax / den;
        if step > TAIL_LIMIT {
            TAIL_LIMIT * rng.r#gen::<f64>()
        } else if step < -TAIL_LIMIT {
            -TAIL_LIMIT * rng.r#gen::<f64>()
        } else {
            step
        }
    }
}

/// Lanczos approximation of ln Γ(x) for x > 0
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = COEFFS[0];
    let t = x + G + 0.5;
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Wrap a coordinate back into `[min, max)`
fn wrap(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    let a = value - min;
    let b = a % range + range;
    let mut wrapped = b % range + min;
    if (wrapped - min).abs() < MIN_VISIT_BOUND {
        wrapped += MIN_VISIT_BOUND;
    }
    wrapped
}

/// Mutable walk state shared by the chain and the local search
struct Walk {
    current: Vec<f64>,
    current_f: f64,
    best: Vec<f64>,
    best_f: f64,
    nfev: usize,
}

impl Walk {
    fn offer_best(&mut self, x: &[f64], f: f64) -> bool {
        if f < self.best_f {
            self.best = x.to_vec();
            self.best_f = f;
            true
        } else {
            false
        }
    }
}

impl AnnealSolver {
    pub fn new(config: AnnealConfig, local: LeastSquaresConfig) -> Self {
        Self {
            config,
            local: LeastSquaresSolver::new(local),
        }
    }

    fn budget_spent(&self, walk: &Walk) -> bool {
        walk.nfev >= self.config.maxfun
    }

    /// Candidate for move `j` of a chain: all coordinates for the first
    /// `dim` moves, then one coordinate at a time
    fn visit(
        &self,
        visiting: &Visiting,
        rng: &mut StdRng,
        x: &[f64],
        j: usize,
        temperature: f64,
        bounds: &[(f64, f64)],
    ) -> Vec<f64> {
        let dim = x.len();
        let mut candidate = x.to_vec();
        if j < dim {
            for (c, &(min, max)) in candidate.iter_mut().zip(bounds) {
                *c = wrap(*c + visiting.sample(rng, temperature), min, max);
            }
        } else {
            let i = j - dim;
            let (min, max) = bounds[i];
            candidate[i] = wrap(candidate[i] + visiting.sample(rng, temperature), min, max);
        }
        clamp_to_bounds(&mut candidate, bounds);
        candidate
    }

    /// One strategy chain of `2 * dim` moves; returns whether the best improved
    fn run_chain(
        &self,
        problem: &dyn Problem,
        visiting: &Visiting,
        rng: &mut StdRng,
        walk: &mut Walk,
        step: usize,
        temperature: f64,
    ) -> Result<bool> {
        let bounds = problem.bounds();
        let dim = problem.num_params();
        let temperature_step = temperature / (step + 1) as f64;
        let accept = self.config.accept;
        let mut improved = false;

        for j in 0..dim * 2 {
            let candidate = self.visit(visiting, rng, &walk.current, j, temperature, bounds);
            let f = problem.cost(&candidate)?;
            walk.nfev += 1;

            if f < walk.current_f {
                walk.current = candidate;
                walk.current_f = f;
                let (x, f) = (walk.current.clone(), walk.current_f);
                improved |= walk.offer_best(&x, f);
            } else {
                let r: f64 = rng.r#gen();
                let pqv_temp = 1.0 - (1.0 - accept) * (f - walk.current_f) / temperature_step;
                let pqv = if pqv_temp <= 0.0 {
                    0.0
                } else {
                    (pqv_temp.ln() / (1.0 - accept)).exp()
                };
                if r <= pqv {
                    walk.current = candidate;
                    walk.current_f = f;
                }
            }

            if self.budget_spent(walk) {
                break;
            }
        }
        Ok(improved)
    }

    /// Polish the best point with the least-squares strategy
    fn local_search(&mut self, problem: &dyn Problem, walk: &mut Walk) -> Result<()> {
        let restarted = Restarted::new(problem, walk.best.clone());
        let report = self.local.solve(&restarted, &mut NoopCallback)?;
        walk.nfev += report.cost_evals;

        if walk.offer_best(&report.params, report.cost) {
            walk.current = report.params;
            walk.current_f = report.cost;
        }
        Ok(())
    }
}

impl Solver for AnnealSolver {
    fn name(&self) -> &str {
        "anneal"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport> {
        let bounds = problem.bounds().to_vec();
        let visiting = Visiting::new(self.config.visit);
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut x0 = problem.initial_params().to_vec();
        clamp_to_bounds(&mut x0, &bounds);
        let f0 = problem.cost(&x0)?;
        let mut walk = Walk {
            current: x0.clone(),
            current_f: f0,
            best: x0,
            best_f: f0,
            nfev: 1,
        };

        let qv = self.config.visit;
        let t1 = ((qv - 1.0) * 2f64.ln()).exp() - 1.0;
        let restart_below = self.config.initial_temp * self.config.restart_temp_ratio;

        let mut iteration = 0usize;
        let mut message = "Maximum number of iteration reached";

        'outer: while iteration < self.config.maxiter {
            for i in 0..self.config.maxiter {
                let s = i as f64 + 2.0;
                let t2 = ((qv - 1.0) * s.ln()).exp() - 1.0;
                let temperature = self.config.initial_temp * t1 / t2;

                if iteration >= self.config.maxiter {
                    break 'outer;
                }

                if temperature < restart_below {
                    // Reannealing from a fresh random point
                    let fresh: Vec<f64> = bounds
                        .iter()
                        .map(|&(min, max)| rng.gen_range(min..=max))
                        .collect();
                    walk.current_f = problem.cost(&fresh)?;
                    walk.current = fresh;
                    walk.nfev += 1;
                    let (x, f) = (walk.current.clone(), walk.current_f);
                    walk.offer_best(&x, f);
                    if self.budget_spent(&walk) {
                        message = "Maximum number of function call reached during annealing";
                        break 'outer;
                    }
                    break;
                }

                let improved =
                    self.run_chain(problem, &visiting, &mut rng, &mut walk, i, temperature)?;
                if self.budget_spent(&walk) {
                    message = "Maximum number of function call reached during annealing";
                    break 'outer;
                }

                if improved && self.config.local_search {
                    self.local_search(problem, &mut walk)?;
                    if self.budget_spent(&walk) {
                        message = "Maximum number of function call reached during local search";
                        break 'outer;
                    }
                }

                iteration += 1;
                callback.on_iteration(iteration as u32, &walk.best, walk.best_f)?;
                if callback.should_stop() {
                    message = "Stopped by callback";
                    break 'outer;
                }
            }
        }

        Ok(SolverReport {
            success: true,
            cost: walk.best_f,
            iterations: iteration as u32,
            message: message.to_string(),
            params: walk.best,
            cost_evals: walk.nfev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::testing::Sphere;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ln_gamma_matches_known_values() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(5.0), 24f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(ln_gamma(0.5), PI.sqrt().ln(), epsilon = 1e-10);
    }

    #[test]
    fn wrap_stays_in_range() {
        for v in [-3.2, -0.5, 0.0, 0.49, 0.5, 1.7, 12.0] {
            let w = wrap(v, -0.5, 0.5);
            assert!((-0.5..0.5).contains(&w), "{} -> {}", v, w);
        }
        assert_relative_eq!(wrap(1.25, 0.0, 1.0), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn respects_function_budget_and_improves() {
        let sphere = Sphere::new([0.3, 0.7, 0.1, 0.4], [0.9, 0.1, -0.4, 0.9]);
        let start_cost = {
            let s = Sphere::new([0.3, 0.7, 0.1, 0.4], [0.9, 0.1, -0.4, 0.9]);
            s.cost(&s.start).unwrap()
        };
        let config = AnnealConfig {
            maxfun: 120,
            ..AnnealConfig::default()
        };
        let mut solver = AnnealSolver::new(config, LeastSquaresConfig::default());
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();

        assert!(report.cost < start_cost);
        assert_eq!(report.cost_evals, sphere.calls.get());
        assert!(report.cost_evals >= 120);
        assert!(report.message.starts_with("Maximum number of function call"));
    }

    #[test]
    fn seeded_runs_repeat() {
        let run = || {
            let sphere = Sphere::new([0.3, 0.7, 0.1, 0.4], [0.5, 0.5, 0.0, 0.5]);
            let config = AnnealConfig {
                maxfun: 60,
                local_search: false,
                ..AnnealConfig::default()
            };
            AnnealSolver::new(config, LeastSquaresConfig::default())
                .solve(&sphere, &mut NoopCallback)
                .unwrap()
        };
        assert_eq!(run(), run());
    }
}
