use crate::core::{FinalResult, Subresult};
use crate::error::StoreError;
use crate::storage::{FsStore, ResultStore};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Renders persisted records for inspection.
///
/// Callers treat plotting as fire-and-forget: a failure is logged, never
/// propagated into the fit.
pub trait Plotter: Send + Sync {
    fn plot_wavelength_history(&self, set: &str, wavelength: f64) -> Result<(), StoreError>;

    fn plot_final(&self, set: &str) -> Result<(), StoreError>;
}

/// Plotter that does nothing
pub struct NullPlotter;

impl Plotter for NullPlotter {
    fn plot_wavelength_history(&self, _set: &str, _wavelength: f64) -> Result<(), StoreError> {
        Ok(())
    }

    fn plot_final(&self, _set: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Writes the data behind each plot as CSV tables into the set's plot folder
pub struct CsvPlotter {
    store: FsStore,
}

impl CsvPlotter {
    pub fn new(store: FsStore) -> Self {
        Self { store }
    }

    pub fn history_path(&self, set: &str, wavelength: f64) -> PathBuf {
        self.store
            .plot_dir(set)
            .join(format!("history_wl_{:.2}.csv", wavelength))
    }

    pub fn spectrum_path(&self, set: &str) -> PathBuf {
        self.store.plot_dir(set).join("final_spectrum.csv")
    }

    fn history_rows(sub: &Subresult) -> Vec<[f64; 6]> {
        (0..sub.history_reflectance.len())
            .map(|i| {
                let at = |v: &[f64]| v.get(i).copied().unwrap_or(f64::NAN);
                [
                    at(&sub.history_reflectance),
                    at(&sub.history_transmittance),
                    at(&sub.history_absorption_density),
                    at(&sub.history_scattering_density),
                    at(&sub.history_scattering_anisotropy),
                    at(&sub.history_mix_factor),
                ]
            })
            .collect()
    }

    fn spectrum_rows(result: &FinalResult) -> Vec<[f64; 9]> {
        (0..result.wavelengths.len())
            .map(|i| {
                let at = |v: &[f64]| v.get(i).copied().unwrap_or(f64::NAN);
                [
                    result.wavelengths[i],
                    at(&result.refls_measured),
                    at(&result.refls_modeled),
                    at(&result.trans_measured),
                    at(&result.trans_modeled),
                    at(&result.absorption_density),
                    at(&result.scattering_density),
                    at(&result.scattering_anisotropy),
                    at(&result.mix_factor),
                ]
            })
            .collect()
    }
}

fn write_table<const N: usize>(
    path: &Path,
    header: &[&str; N],
    rows: &[[f64; N]],
    with_index: bool,
) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut out = BufWriter::new(file);
    let io = |e| StoreError::io(path, e);

    let mut head: Vec<&str> = Vec::with_capacity(N + 1);
    if with_index {
        head.push("evaluation");
    }
    head.extend_from_slice(header);
    writeln!(out, "{}", head.join(",")).map_err(io)?;

    for (i, row) in rows.iter().enumerate() {
        let mut cells: Vec<String> = Vec::with_capacity(N + 1);
        if with_index {
            cells.push(i.to_string());
        }
        cells.extend(row.iter().map(|v| v.to_string()));
        writeln!(out, "{}", cells.join(",")).map_err(io)?;
    }
    out.flush().map_err(io)
}

impl Plotter for CsvPlotter {
    fn plot_wavelength_history(&self, set: &str, wavelength: f64) -> Result<(), StoreError> {
        let sub = self.store.read_subresult(set, wavelength)?;
        write_table(
            &self.history_path(set, wavelength),
            &[
                "reflectance",
                "transmittance",
                "absorption_density",
                "scattering_density",
                "scattering_anisotropy",
                "mix_factor",
            ],
            &Self::history_rows(&sub),
            true,
        )
    }

    fn plot_final(&self, set: &str) -> Result<(), StoreError> {
        let result = self.store.read_final_result(set)?;
        write_table(
            &self.spectrum_path(set),
            &[
                "wavelength",
                "reflectance_measured",
                "reflectance_modeled",
                "transmittance_measured",
                "transmittance_modeled",
                "absorption_density",
                "scattering_density",
                "scattering_anisotropy",
                "mix_factor",
            ],
            &Self::spectrum_rows(&result),
            false,
        )
    }
}
