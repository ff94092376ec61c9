use super::solvers::traits::OptimizationCallback;
use crate::error::Result;

/// Iteration result for tracking optimization progress
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Tracks and logs the progress of one wavelength fit
pub struct FitProgress {
    wavelength: f64,
    history: Vec<IterationResult>,
}

impl FitProgress {
    pub fn new(wavelength: f64) -> Self {
        Self {
            wavelength,
            history: Vec::new(),
        }
    }

    /// Get iteration history
    pub fn history(&self) -> &[IterationResult] {
        &self.history
    }

    pub fn best_cost(&self) -> Option<f64> {
        self.history.iter().map(|r| r.cost).reduce(f64::min)
    }

    /// Log a one-line summary of the finished fit
    pub fn log_summary(&self, success: bool, stop_reason: &str) {
        tracing::info!(
            wavelength = self.wavelength,
            success,
            iterations = self.history.len(),
            best_cost = self.best_cost().unwrap_or(f64::NAN),
            "fit finished: {}",
            stop_reason
        );
    }
}

impl OptimizationCallback for FitProgress {
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()> {
        tracing::debug!(
            wavelength = self.wavelength,
            iteration,
            cost = format_args!("{:.6e}", cost),
            params = ?params,
            "iteration"
        );

        self.history.push(IterationResult {
            params: params.to_vec(),
            cost,
        });

        Ok(())
    }
}

/// Observer of basin-hopping candidates; returning `true` stops the hopping
pub trait HopCallback {
    fn on_minimum(&mut self, params: &[f64], cost: f64, accepted: bool) -> bool;
}

/// Stops basin hopping once an accepted minimum is good enough
#[derive(Clone, Copy, Debug)]
pub struct EarlyStop {
    ftol_abs: f64,
}

impl EarlyStop {
    pub fn new(ftol_abs: f64) -> Self {
        Self { ftol_abs }
    }
}

impl HopCallback for EarlyStop {
    fn on_minimum(&mut self, _params: &[f64], cost: f64, accepted: bool) -> bool {
        // Rejected candidates never stop the run, however good they look
        accepted && cost <= self.ftol_abs
    }
}
