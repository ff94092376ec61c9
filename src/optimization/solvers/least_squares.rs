use super::traits::{clamp_to_bounds, norm, OptimizationCallback, Problem, Solver, SolverReport};
use crate::core::LeastSquaresConfig;
use crate::error::Result;

/// Bounded nonlinear least squares on the scalar objective.
///
/// Levenberg steps on `0.5 f(x)^2` inside the box: variables sitting on a
/// bound with the gradient pointing outwards are frozen, the rest take the
/// damped Gauss-Newton step and are projected back into the box. The
/// Jacobian is a forward difference with relative step `diff_step`.
/// There is no gradient tolerance; termination is driven by `ftol`, `xtol`
/// and the evaluation budget.
pub struct LeastSquaresSolver {
    config: LeastSquaresConfig,
}

/// Outcome of a single damped step attempt
struct StepTrial {
    x: Vec<f64>,
    f: f64,
    dx_norm: f64,
    actual: f64,
    predicted: f64,
}

impl LeastSquaresSolver {
    pub fn new(config: LeastSquaresConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LeastSquaresConfig {
        &self.config
    }

    /// Forward-difference Jacobian of the scalar residual.
    ///
    /// Steps that would leave the box are taken backwards instead.
    fn jacobian(
        &self,
        problem: &dyn Problem,
        x: &[f64],
        f: f64,
        bounds: &[(f64, f64)],
        cost_evals: &mut usize,
    ) -> Result<Vec<f64>> {
        let mut jac = vec![0.0; x.len()];
        for i in 0..x.len() {
            let (min, max) = bounds[i];
            let mut h = self.config.diff_step * x[i].abs().max(1.0);
            if x[i] + h > max {
                h = -h;
            }
            if x[i] + h < min {
                // Box narrower than the step; nothing to learn here
                continue;
            }

            let mut probe = x.to_vec();
            probe[i] += h;
            let f_probe = problem.cost(&probe)?;
            *cost_evals += 1;

            jac[i] = (f_probe - f) / h;
        }
        Ok(jac)
    }

    fn trial_step(
        &self,
        problem: &dyn Problem,
        x: &[f64],
        f: f64,
        jac: &[f64],
        free: &[bool],
        damping: f64,
        bounds: &[(f64, f64)],
    ) -> Result<StepTrial> {
        let jn2: f64 = jac
            .iter()
            .zip(free)
            .filter(|(_, free)| **free)
            .map(|(j, _)| j * j)
            .sum();

        let mut x_new = x.to_vec();
        for i in 0..x.len() {
            if free[i] {
                x_new[i] -= f * jac[i] / (jn2 * (1.0 + damping));
            }
        }
        clamp_to_bounds(&mut x_new, bounds);

        let dx: Vec<f64> = x_new.iter().zip(x).map(|(a, b)| a - b).collect();
        let linear = f + jac.iter().zip(&dx).map(|(j, d)| j * d).sum::<f64>();
        let predicted = 0.5 * f * f - 0.5 * linear * linear;

        let f_new = problem.cost(&x_new)?;
        let actual = 0.5 * f * f - 0.5 * f_new * f_new;

        Ok(StepTrial {
            dx_norm: norm(&dx),
            x: x_new,
            f: f_new,
            actual,
            predicted,
        })
    }
}

impl Solver for LeastSquaresSolver {
    fn name(&self) -> &str {
        "least_squares"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport> {
        let n = problem.num_params();
        let bounds = problem.bounds();
        let budget = self.config.evaluation_budget(n);
        let (ftol, xtol) = (self.config.ftol, self.config.xtol);

        let mut x = problem.initial_params().to_vec();
        clamp_to_bounds(&mut x, bounds);

        let mut f = problem.cost(&x)?;
        let mut nfev = 1;
        let mut cost_evals = 1;
        let mut damping = self.config.initial_damping;
        let mut iterations = 0u32;

        let finish = |x: Vec<f64>, f: f64, iterations, cost_evals, success, message: &str| {
            SolverReport {
                success,
                cost: f,
                iterations,
                message: message.to_string(),
                params: x,
                cost_evals,
            }
        };

        loop {
            if f == 0.0 {
                return Ok(finish(x, f, iterations, cost_evals, true, "Exact fit"));
            }
            if nfev >= budget {
                return Ok(finish(
                    x,
                    f,
                    iterations,
                    cost_evals,
                    false,
                    "Max evaluations reached",
                ));
            }

            let jac = self.jacobian(problem, &x, f, bounds, &mut cost_evals)?;

            // Freeze variables pinned to a bound by the gradient
            let free: Vec<bool> = (0..n)
                .map(|i| {
                    let g = jac[i] * f;
                    let (min, max) = bounds[i];
                    !((x[i] <= min && g > 0.0) || (x[i] >= max && g < 0.0)) && jac[i] != 0.0
                })
                .collect();

            if !free.iter().any(|&b| b) {
                return Ok(finish(
                    x,
                    f,
                    iterations,
                    cost_evals,
                    true,
                    "No descent direction inside bounds",
                ));
            }

            // Inner loop: raise damping until a step reduces the cost
            loop {
                let trial = self.trial_step(problem, &x, f, &jac, &free, damping, bounds)?;
                nfev += 1;
                cost_evals += 1;

                let x_norm = norm(&x);
                let xtol_hit = trial.dx_norm < xtol * (xtol + x_norm);

                if trial.actual > 0.0 {
                    let ratio = if trial.predicted > 0.0 {
                        trial.actual / trial.predicted
                    } else {
                        0.0
                    };
                    let ftol_hit = trial.actual < ftol * 0.5 * f * f && ratio > 0.25;

                    damping = if ratio > 0.75 {
                        (damping / 3.0).max(1e-12)
                    } else if ratio < 0.25 {
                        damping * 2.0
                    } else {
                        damping
                    };

                    x = trial.x;
                    f = trial.f;
                    iterations += 1;
                    callback.on_iteration(iterations, &x, f)?;

                    if ftol_hit {
                        return Ok(finish(
                            x,
                            f,
                            iterations,
                            cost_evals,
                            true,
                            "`ftol` termination condition is satisfied",
                        ));
                    }
                    if xtol_hit {
                        return Ok(finish(
                            x,
                            f,
                            iterations,
                            cost_evals,
                            true,
                            "`xtol` termination condition is satisfied",
                        ));
                    }
                    if callback.should_stop() {
                        return Ok(finish(
                            x,
                            f,
                            iterations,
                            cost_evals,
                            true,
                            "Stopped by callback",
                        ));
                    }
                    break;
                }

                damping *= 4.0;
                if xtol_hit {
                    return Ok(finish(
                        x,
                        f,
                        iterations,
                        cost_evals,
                        true,
                        "`xtol` termination condition is satisfied",
                    ));
                }
                if nfev >= budget {
                    return Ok(finish(
                        x,
                        f,
                        iterations,
                        cost_evals,
                        false,
                        "Max evaluations reached",
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::traits::testing::Sphere;
    use super::super::traits::NoopCallback;
    use super::*;

    #[test]
    fn converges_towards_interior_minimum() {
        let sphere = Sphere::new([0.4, 0.6, 0.1, 0.3], [0.2, 0.2, 0.3, 0.7]);
        let mut solver = LeastSquaresSolver::new(LeastSquaresConfig {
            ftol: 1e-8,
            xtol: 1e-10,
            ..LeastSquaresConfig::default()
        });
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();
        assert!(report.cost < 0.2, "cost {}", report.cost);
        assert_eq!(report.cost_evals, sphere.calls.get());
    }

    #[test]
    fn stays_inside_bounds_when_minimum_is_outside() {
        let sphere = Sphere::new([1.5, 0.5, 0.0, 0.5], [0.5, 0.5, 0.0, 0.5]);
        let mut solver = LeastSquaresSolver::new(LeastSquaresConfig::default());
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();
        assert!(report.params[0] <= 1.0);
        assert!(report.params[0] > 0.9);
    }

    #[test]
    fn respects_evaluation_budget() {
        let sphere = Sphere::new([0.4, 0.6, 0.1, 0.3], [0.9, 0.9, -0.4, 0.9]);
        let mut solver = LeastSquaresSolver::new(LeastSquaresConfig {
            ftol: 1e-15,
            xtol: 1e-15,
            max_nfev: 3,
            ..LeastSquaresConfig::default()
        });
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();
        // 3 non-Jacobian evaluations plus at most 4 Jacobian probes each round
        assert!(report.cost_evals <= 3 + 2 * 4);
    }

    #[test]
    fn starting_on_the_minimum_stops_immediately() {
        let sphere = Sphere::new([0.4, 0.6, 0.1, 0.3], [0.4, 0.6, 0.1, 0.3]);
        let mut solver = LeastSquaresSolver::new(LeastSquaresConfig::default());
        let report = solver.solve(&sphere, &mut NoopCallback).unwrap();
        assert_eq!(report.cost, 0.0);
        assert_eq!(report.cost_evals, 1);
        assert_eq!(report.message, "Exact fit");
    }
}
