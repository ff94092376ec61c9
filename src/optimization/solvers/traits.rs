use crate::error::Result;
use serde::{Deserialize, Serialize};

/// What a strategy hands back; persisted verbatim inside each subresult
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverReport {
    pub success: bool,
    pub cost: f64,
    /// Outer iterations; for basin hopping this is the number of hops
    pub iterations: u32,
    pub message: String,
    pub params: Vec<f64>,
    pub cost_evals: usize,
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called at each iteration with current parameters and cost
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()>;

    /// Check if optimization should stop early
    fn should_stop(&self) -> bool {
        false
    }
}

/// Core problem definition - just the essentials
pub trait Problem {
    /// Evaluate cost for given parameters (runs the simulator)
    fn cost(&self, params: &[f64]) -> Result<f64>;

    fn num_params(&self) -> usize;

    /// Where the search starts
    fn initial_params(&self) -> &[f64];

    /// Parameter bounds (min, max) for each parameter
    fn bounds(&self) -> &[(f64, f64)];
}

/// Solver interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverReport>;
}

/// The same problem, started from a different point.
///
/// Used when one strategy runs another as its local polish.
pub struct Restarted<'a> {
    inner: &'a dyn Problem,
    start: Vec<f64>,
}

impl<'a> Restarted<'a> {
    pub fn new(inner: &'a dyn Problem, start: Vec<f64>) -> Self {
        Self { inner, start }
    }
}

impl Problem for Restarted<'_> {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        self.inner.cost(params)
    }

    fn num_params(&self) -> usize {
        self.inner.num_params()
    }

    fn initial_params(&self) -> &[f64] {
        &self.start
    }

    fn bounds(&self) -> &[(f64, f64)] {
        self.inner.bounds()
    }
}

#[inline]
pub fn clamp_to_bounds(params: &mut [f64], bounds: &[(f64, f64)]) {
    for (p, &(min, max)) in params.iter_mut().zip(bounds) {
        *p = p.clamp(min, max);
    }
}

/// Euclidean norm
#[inline]
pub(crate) fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Callback that ignores everything
pub struct NoopCallback;

impl OptimizationCallback for NoopCallback {
    fn on_iteration(&mut self, _iteration: u32, _params: &[f64], _cost: f64) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// GUIDE: ADDING A STRATEGY
// ============================================================================
//
// 1. Implement `Solver` on a struct that owns its configuration.
// 2. Clamp every point to `problem.bounds()` before calling `problem.cost()`;
//    the objective does not clamp.
// 3. `problem.cost()` runs the renderer and is EXPENSIVE. Every call is also
//    recorded in the wavelength's evaluation history, so the history length
//    is exactly the number of calls you make.
// 4. Call `callback.on_iteration()` once per outer iteration and respect
//    `callback.should_stop()`.
// 5. Add a variant to `Strategy` and an identifier to `OptimizerId`.
//
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;

    /// Shifted sphere in the default 4-D box; counts evaluations
    pub struct Sphere {
        pub center: Vec<f64>,
        pub start: Vec<f64>,
        pub bounds: Vec<(f64, f64)>,
        pub offset: f64,
        pub calls: Cell<usize>,
    }

    impl Sphere {
        pub fn new(center: [f64; 4], start: [f64; 4]) -> Self {
            Self {
                center: center.to_vec(),
                start: start.to_vec(),
                bounds: vec![(0.01, 1.0), (0.01, 1.0), (-0.5, 0.5), (0.0, 1.0)],
                offset: 0.0,
                calls: Cell::new(0),
            }
        }
    }

    impl Problem for Sphere {
        fn cost(&self, params: &[f64]) -> Result<f64> {
            self.calls.set(self.calls.get() + 1);
            let d: f64 = params
                .iter()
                .zip(&self.center)
                .map(|(p, c)| (p - c) * (p - c))
                .sum();
            Ok(d.sqrt() * 10.0 + self.offset)
        }

        fn num_params(&self) -> usize {
            self.center.len()
        }

        fn initial_params(&self) -> &[f64] {
            &self.start
        }

        fn bounds(&self) -> &[(f64, f64)] {
            &self.bounds
        }
    }
}
