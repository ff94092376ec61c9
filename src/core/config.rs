use super::types::ParameterVector;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete tuning of a fitting run, threaded explicitly into every component
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub bounds: Bounds,
    pub objective: ObjectiveConfig,
    pub least_squares: LeastSquaresConfig,
    pub shgo: ShgoConfig,
    pub anneal: AnnealConfig,
    pub basin_hopping: BasinHoppingConfig,
    pub batch: BatchConfig,
}

impl FitConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bounds.validate()?;

        positive("objective.density_scale", self.objective.density_scale)?;
        positive("objective.penalty", self.objective.penalty)?;
        positive("least_squares.ftol", self.least_squares.ftol)?;
        positive("least_squares.xtol", self.least_squares.xtol)?;
        positive("least_squares.diff_step", self.least_squares.diff_step)?;
        positive("basin_hopping.stepsize", self.basin_hopping.stepsize)?;
        positive("anneal.initial_temp", self.anneal.initial_temp)?;

        if self.basin_hopping.temperature < 0.0 {
            return Err(ConfigError::Value {
                name: "basin_hopping.temperature",
                reason: "must not be negative".into(),
            });
        }
        if self.shgo.iters == 0 || self.shgo.n == 0 {
            return Err(ConfigError::Value {
                name: "shgo",
                reason: "iters and n must be at least 1".into(),
            });
        }
        if self.anneal.visit <= 1.0 || self.anneal.visit >= 3.0 {
            return Err(ConfigError::Value {
                name: "anneal.visit",
                reason: format!("{} outside (1, 3)", self.anneal.visit),
            });
        }
        if self.anneal.accept >= 0.0 {
            return Err(ConfigError::Value {
                name: "anneal.accept",
                reason: format!("{} must be negative", self.anneal.accept),
            });
        }
        if self.batch.workers == Some(0) {
            return Err(ConfigError::Value {
                name: "batch.workers",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Value {
            name,
            reason: format!("{} must be a positive number", value),
        })
    }
}

// ===== PARAMETER BOUNDS =====

/// Box bounds for the four model parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: ParameterVector,
    pub upper: ParameterVector,
}

impl Default for Bounds {
    fn default() -> Self {
        // Zero density makes the renderer degenerate, hence the 0.01 floor
        Self {
            lower: ParameterVector::new(0.01, 0.01, -0.5, 0.0),
            upper: ParameterVector::new(1.0, 1.0, 0.5, 1.0),
        }
    }
}

impl Bounds {
    /// (min, max) per parameter, in optimizer order
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.lower
            .to_array()
            .into_iter()
            .zip(self.upper.to_array())
            .collect()
    }

    pub fn contains(&self, params: &ParameterVector) -> bool {
        params
            .to_array()
            .into_iter()
            .zip(self.pairs())
            .all(|(v, (lo, hi))| v >= lo && v <= hi)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, (lower, upper)) in ParameterVector::NAMES.into_iter().zip(self.pairs()) {
            if !(lower < upper) {
                return Err(ConfigError::Bounds { name, lower, upper });
            }
        }
        for (name, lower) in [
            ("absorption_density", self.lower.absorption_density),
            ("scattering_density", self.lower.scattering_density),
        ] {
            if lower <= 0.0 {
                return Err(ConfigError::NonPositiveDensity(name));
            }
        }
        Ok(())
    }
}

// ===== COMPONENT SECTIONS =====

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    /// Multiplier applied to both densities before rendering and to the distance.
    /// 100 cannot produce r = 0 or t = 0; above ~300 results barely change.
    pub density_scale: f64,
    /// Added when r + t > 1
    pub penalty: f64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            density_scale: 200.0,
            penalty: 1e6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeastSquaresConfig {
    /// Relative cost change tolerance
    pub ftol: f64,
    /// Relative parameter change tolerance
    pub xtol: f64,
    /// Relative finite-difference step. Smaller gives better fits but noisier
    /// parameter spectra; good values lie between 0.001 and 0.01.
    pub diff_step: f64,
    /// Evaluation budget; 0 means 100 per parameter
    pub max_nfev: usize,
    pub initial_damping: f64,
}

impl Default for LeastSquaresConfig {
    fn default() -> Self {
        Self {
            ftol: 1e-2,
            xtol: 1e-5,
            diff_step: 0.005,
            max_nfev: 0,
            initial_damping: 1e-3,
        }
    }
}

impl LeastSquaresConfig {
    pub fn evaluation_budget(&self, num_params: usize) -> usize {
        if self.max_nfev == 0 {
            100 * num_params
        } else {
            self.max_nfev
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShgoConfig {
    /// Sampling rounds
    pub iters: usize,
    /// Sobol points added per round
    pub n: usize,
    /// How many sampled minimisers get a local polish
    pub max_local: usize,
    pub local_max_iters: u64,
    pub local_sd_tolerance: f64,
}

impl Default for ShgoConfig {
    fn default() -> Self {
        Self {
            iters: 10,
            n: 2,
            max_local: 3,
            local_max_iters: 60,
            local_sd_tolerance: 1e-4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealConfig {
    pub seed: u64,
    pub maxiter: usize,
    pub maxfun: usize,
    pub initial_temp: f64,
    pub restart_temp_ratio: f64,
    pub visit: f64,
    pub accept: f64,
    /// Polish every new best point with the local least-squares strategy
    pub local_search: bool,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            seed: 123,
            maxiter: 500,
            maxfun: 1000,
            initial_temp: 5000.0,
            restart_temp_ratio: 0.9999,
            visit: 2.1,
            accept: -9000.0,
            local_search: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasinHoppingConfig {
    pub niter: u32,
    /// 0 accepts improvements only
    pub temperature: f64,
    /// Maximum jitter as a fraction of each parameter's bound range
    pub stepsize: f64,
    /// Absolute objective value at which hopping stops early
    pub ftol_abs: f64,
    pub seed: u64,
}

impl Default for BasinHoppingConfig {
    fn default() -> Self {
        Self {
            niter: 2,
            temperature: 0.0,
            stepsize: 0.1,
            ftol_abs: 1.0,
            seed: 123,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; defaults to one per logical CPU
    pub workers: Option<usize>,
    /// Extra attempts for a failing simulator call
    pub simulator_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            simulator_retries: 2,
        }
    }
}

impl BatchConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
