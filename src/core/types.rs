use crate::optimization::solvers::SolverReport;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Number of free model parameters per wavelength
pub const PARAM_COUNT: usize = 4;

// ===== INPUT DATA =====

/// One measured spectral band
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub wavelength: f64,
    pub reflectance_measured: f64,
    pub transmittance_measured: f64,
}

impl TargetEntry {
    pub fn new(wavelength: f64, reflectance_measured: f64, transmittance_measured: f64) -> Self {
        Self {
            wavelength,
            reflectance_measured,
            transmittance_measured,
        }
    }

    /// Fraction of energy neither reflected nor transmitted
    pub fn absorption_proxy(&self) -> f64 {
        1.0 - (self.reflectance_measured + self.transmittance_measured)
    }
}

// ===== MODEL PARAMETERS =====

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub absorption_density: f64,
    pub scattering_density: f64,
    pub scattering_anisotropy: f64,
    pub mix_factor: f64,
}

impl ParameterVector {
    pub const NAMES: [&'static str; PARAM_COUNT] = [
        "absorption_density",
        "scattering_density",
        "scattering_anisotropy",
        "mix_factor",
    ];

    pub fn new(
        absorption_density: f64,
        scattering_density: f64,
        scattering_anisotropy: f64,
        mix_factor: f64,
    ) -> Self {
        Self {
            absorption_density,
            scattering_density,
            scattering_anisotropy,
            mix_factor,
        }
    }

    pub fn from_array(values: [f64; PARAM_COUNT]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Build from an optimizer parameter slice (must hold at least four values)
    pub fn from_slice(values: &[f64]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(&self) -> [f64; PARAM_COUNT] {
        [
            self.absorption_density,
            self.scattering_density,
            self.scattering_anisotropy,
            self.mix_factor,
        ]
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.to_array().to_vec()
    }
}

// ===== EVALUATION HISTORY =====

/// A single objective evaluation: parameters in, modeled r/t out
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub params: ParameterVector,
    pub reflectance: f64,
    pub transmittance: f64,
}

/// Append-only, chronologically ordered evaluation history of one fit
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationLog {
    records: Vec<EvaluationRecord>,
}

impl EvaluationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a log with the starting guess; it carries placeholder (0, 0) outputs
    pub fn seeded(start: ParameterVector) -> Self {
        let mut log = Self::new();
        log.push(EvaluationRecord {
            params: start,
            reflectance: 0.0,
            transmittance: 0.0,
        });
        log
    }

    pub fn push(&mut self, record: EvaluationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&EvaluationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of objective evaluations excluding the seed record
    pub fn evaluations(&self) -> usize {
        self.records.len().saturating_sub(1)
    }

    fn column(&self, f: impl Fn(&EvaluationRecord) -> f64) -> Vec<f64> {
        self.records.iter().map(f).collect()
    }
}

// ===== PERSISTED RESULTS =====

/// Persisted outcome of one wavelength fit, including the full history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subresult {
    pub wavelength: f64,
    pub reflectance_measured: f64,
    pub transmittance_measured: f64,
    pub reflectance_modeled: f64,
    pub transmittance_modeled: f64,
    pub reflectance_error: f64,
    pub transmittance_error: f64,
    pub iterations: usize,
    pub optimizer: String,
    pub optimizer_ftol: f64,
    pub optimizer_xtol: f64,
    pub optimizer_diffstep: f64,
    pub optimizer_result: SolverReport,
    pub elapsed_time_s: f64,
    pub history_reflectance: Vec<f64>,
    pub history_transmittance: Vec<f64>,
    pub history_absorption_density: Vec<f64>,
    pub history_scattering_density: Vec<f64>,
    pub history_scattering_anisotropy: Vec<f64>,
    pub history_mix_factor: Vec<f64>,
}

/// Optimizer identity recorded alongside each subresult
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerMeta {
    pub name: String,
    pub ftol: f64,
    pub xtol: f64,
    pub diff_step: f64,
}

impl Subresult {
    /// Build the record from a finished log; the last record is the converged point
    pub fn from_log(
        target: &TargetEntry,
        log: &EvaluationLog,
        meta: &OptimizerMeta,
        report: SolverReport,
        elapsed_time_s: f64,
    ) -> Self {
        let (r, t) = log
            .last()
            .map(|rec| (rec.reflectance, rec.transmittance))
            .unwrap_or((0.0, 0.0));

        Self {
            wavelength: target.wavelength,
            reflectance_measured: target.reflectance_measured,
            transmittance_measured: target.transmittance_measured,
            reflectance_modeled: r,
            transmittance_modeled: t,
            reflectance_error: (r - target.reflectance_measured).abs(),
            transmittance_error: (t - target.transmittance_measured).abs(),
            iterations: log.evaluations(),
            optimizer: meta.name.clone(),
            optimizer_ftol: meta.ftol,
            optimizer_xtol: meta.xtol,
            optimizer_diffstep: meta.diff_step,
            optimizer_result: report,
            elapsed_time_s,
            history_reflectance: log.column(|r| r.reflectance),
            history_transmittance: log.column(|r| r.transmittance),
            history_absorption_density: log.column(|r| r.params.absorption_density),
            history_scattering_density: log.column(|r| r.params.scattering_density),
            history_scattering_anisotropy: log.column(|r| r.params.scattering_anisotropy),
            history_mix_factor: log.column(|r| r.params.mix_factor),
        }
    }

    /// Parameters of the last history entry
    pub fn final_parameters(&self) -> ParameterVector {
        fn last(v: &[f64]) -> f64 {
            v.last().copied().unwrap_or(f64::NAN)
        }
        ParameterVector::new(
            last(&self.history_absorption_density),
            last(&self.history_scattering_density),
            last(&self.history_scattering_anisotropy),
            last(&self.history_mix_factor),
        )
    }
}

/// Spectrum-wide summary of one optimization set
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub wall_clock_elapsed_min: f64,
    pub process_elapsed_min: f64,
    pub r_rmse: f64,
    pub t_rmse: f64,
    pub optimizer: String,
    pub optimizer_ftol: f64,
    pub optimizer_xtol: f64,
    pub optimizer_diffstep: f64,
    /// Wavelength count per optimizer identifier, in first-seen order
    #[serde(default)]
    pub optimizer_counts: IndexMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basin_iterations_required: Option<usize>,
    pub wavelengths: Vec<f64>,
    pub refls_modeled: Vec<f64>,
    pub refls_measured: Vec<f64>,
    pub refls_error: Vec<f64>,
    pub trans_modeled: Vec<f64>,
    pub trans_measured: Vec<f64>,
    pub trans_error: Vec<f64>,
    pub absorption_density: Vec<f64>,
    pub scattering_density: Vec<f64>,
    pub scattering_anisotropy: Vec<f64>,
    pub mix_factor: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SolverReport {
        SolverReport {
            success: true,
            cost: 0.5,
            iterations: 1,
            message: "Converged".into(),
            params: vec![0.1, 0.2, 0.0, 0.5],
            cost_evals: 2,
        }
    }

    #[test]
    fn seeded_log_counts_evaluations_without_seed() {
        let mut log = EvaluationLog::seeded(ParameterVector::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(log.evaluations(), 0);
        log.push(EvaluationRecord {
            params: ParameterVector::new(0.2, 0.2, 0.3, 0.4),
            reflectance: 0.4,
            transmittance: 0.3,
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.evaluations(), 1);
        assert_eq!(log.records()[0].reflectance, 0.0);
    }

    #[test]
    fn subresult_takes_modeled_values_from_last_record() {
        let target = TargetEntry::new(550.0, 0.45, 0.35);
        let mut log = EvaluationLog::seeded(ParameterVector::new(0.1, 0.2, 0.3, 0.4));
        for (r, t) in [(0.2, 0.2), (0.4, 0.3)] {
            log.push(EvaluationRecord {
                params: ParameterVector::new(r, t, 0.0, 0.5),
                reflectance: r,
                transmittance: t,
            });
        }
        let meta = OptimizerMeta {
            name: "least_squares".into(),
            ftol: 1e-2,
            xtol: 1e-5,
            diff_step: 0.005,
        };

        let sub = Subresult::from_log(&target, &log, &meta, report(), 1.5);

        assert_eq!(sub.iterations, 2);
        assert_eq!(sub.reflectance_modeled, 0.4);
        assert!((sub.reflectance_error - 0.05).abs() < 1e-12);
        assert!((sub.transmittance_error - 0.05).abs() < 1e-12);
        assert_eq!(sub.history_reflectance, vec![0.0, 0.2, 0.4]);
        assert_eq!(sub.final_parameters(), ParameterVector::new(0.4, 0.3, 0.0, 0.5));
    }

    #[test]
    fn absorption_proxy_is_unclamped() {
        assert!((TargetEntry::new(500.0, 0.3, 0.2).absorption_proxy() - 0.5).abs() < 1e-12);
        assert!(TargetEntry::new(500.0, 0.7, 0.5).absorption_proxy() < 0.0);
    }
}
