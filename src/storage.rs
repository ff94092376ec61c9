use crate::core::{FinalResult, Subresult, TargetEntry};
use crate::error::StoreError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Persistence of targets, per-wavelength checkpoints and the set summary.
///
/// The existence of a subresult is the completion marker of a wavelength,
/// so writing one must be atomic.
pub trait ResultStore: Send + Sync {
    fn read_targets(&self, set: &str) -> Result<Vec<TargetEntry>, StoreError>;

    fn subresult_exists(&self, set: &str, wavelength: f64) -> bool;

    /// Fails with [`StoreError::AlreadyExists`] instead of overwriting
    fn write_subresult(&self, set: &str, subresult: &Subresult) -> Result<(), StoreError>;

    fn read_subresult(&self, set: &str, wavelength: f64) -> Result<Subresult, StoreError>;

    /// All subresults of a set, sorted by wavelength
    fn collect_subresults(&self, set: &str) -> Result<Vec<Subresult>, StoreError>;

    /// [`StoreError::NotFound`] when the set has never been aggregated
    fn read_final_result(&self, set: &str) -> Result<FinalResult, StoreError>;

    fn write_final_result(&self, set: &str, result: &FinalResult) -> Result<(), StoreError>;
}

// ===== FILESYSTEM LAYOUT =====

const TARGET_DIR: &str = "target";
const TARGET_FILE: &str = "target.json";
const RESULT_DIR: &str = "result";
const SUBRESULT_DIR: &str = "sub_result";
const FINAL_RESULT_FILE: &str = "final_result.json";
const PLOT_DIR: &str = "plot";
const WORKING_DIR: &str = "working_temp";

fn subresult_name_pattern() -> Result<Regex, StoreError> {
    Ok(Regex::new(r"^wl_(\d+(?:\.\d+)?)\.json$")?)
}

/// File name of a wavelength's subresult, keyed to two decimals
pub fn subresult_file_name(wavelength: f64) -> String {
    format!("wl_{:.2}.json", wavelength)
}

/// Store rooted at a workspace directory:
///
/// ```text
/// <root>/<set>/target/target.json
/// <root>/<set>/result/sub_result/wl_<λ>.json
/// <root>/<set>/result/final_result.json
/// <root>/<set>/result/plot/
/// <root>/<set>/working_temp/
/// ```
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn set_dir(&self, set: &str) -> PathBuf {
        self.root.join(set)
    }

    pub fn target_path(&self, set: &str) -> PathBuf {
        self.set_dir(set).join(TARGET_DIR).join(TARGET_FILE)
    }

    pub fn subresult_dir(&self, set: &str) -> PathBuf {
        self.set_dir(set).join(RESULT_DIR).join(SUBRESULT_DIR)
    }

    pub fn subresult_path(&self, set: &str, wavelength: f64) -> PathBuf {
        self.subresult_dir(set).join(subresult_file_name(wavelength))
    }

    pub fn final_result_path(&self, set: &str) -> PathBuf {
        self.set_dir(set).join(RESULT_DIR).join(FINAL_RESULT_FILE)
    }

    pub fn plot_dir(&self, set: &str) -> PathBuf {
        self.set_dir(set).join(RESULT_DIR).join(PLOT_DIR)
    }

    pub fn working_dir(&self, set: &str) -> PathBuf {
        self.set_dir(set).join(WORKING_DIR)
    }

    /// Create the set's folder structure and clear scratch renders.
    ///
    /// With `clear_subresults` every existing checkpoint is removed too, so
    /// the next run starts from scratch.
    pub fn init(&self, set: &str, clear_subresults: bool) -> Result<(), StoreError> {
        for dir in [
            self.set_dir(set).join(TARGET_DIR),
            self.subresult_dir(set),
            self.plot_dir(set),
            self.working_dir(set),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let removed = clear_dir(&self.working_dir(set))?;
        tracing::debug!(set, removed, "cleared working directory");

        if clear_subresults {
            let removed = clear_dir(&self.subresult_dir(set))?;
            tracing::info!(set, removed, "cleared subresults");
        }
        Ok(())
    }

    pub fn write_targets(&self, set: &str, targets: &[TargetEntry]) -> Result<(), StoreError> {
        let path = self.target_path(set);
        write_json_atomic(&path, targets, true)
    }

    /// Wavelengths with a checkpoint on disk, parsed from the file names
    pub fn completed_wavelengths(&self, set: &str) -> Result<Vec<f64>, StoreError> {
        let dir = self.subresult_dir(set);
        let pattern = subresult_name_pattern()?;
        let mut wavelengths = Vec::new();

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => {
                    return Ok(wavelengths);
                }
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                    return Err(StoreError::io(path, e.into()));
                }
            };
            let name = entry.file_name().to_string_lossy();
            if let Some(wl) = pattern
                .captures(&name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
            {
                wavelengths.push(wl);
            }
        }

        wavelengths.sort_by(f64::total_cmp);
        Ok(wavelengths)
    }
}

/// Remove every entry below `dir`; returns how many top-level entries went
fn clear_dir(dir: &Path) -> Result<usize, StoreError> {
    let mut removed = 0;
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| StoreError::io(&path, e))?;
        removed += 1;
    }
    Ok(removed)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize into a temp file next to `path`, then rename it into place.
///
/// Without `overwrite` an existing file is left alone and reported.
fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    overwrite: bool,
) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            StoreError::AlreadyExists(path.to_path_buf())
        } else {
            StoreError::io(path, e.error)
        }
    })?;
    Ok(())
}

impl ResultStore for FsStore {
    fn read_targets(&self, set: &str) -> Result<Vec<TargetEntry>, StoreError> {
        read_json(&self.target_path(set))
    }

    fn subresult_exists(&self, set: &str, wavelength: f64) -> bool {
        self.subresult_path(set, wavelength).is_file()
    }

    fn write_subresult(&self, set: &str, subresult: &Subresult) -> Result<(), StoreError> {
        let path = self.subresult_path(set, subresult.wavelength);
        write_json_atomic(&path, subresult, false)
    }

    fn read_subresult(&self, set: &str, wavelength: f64) -> Result<Subresult, StoreError> {
        read_json(&self.subresult_path(set, wavelength))
    }

    fn collect_subresults(&self, set: &str) -> Result<Vec<Subresult>, StoreError> {
        let dir = self.subresult_dir(set);
        let pattern = glob::Pattern::escape(&dir.to_string_lossy()) + "/wl_*.json";

        let mut subresults = Vec::new();
        for path in glob::glob(&pattern)? {
            let path = path.map_err(|e| {
                let path = e.path().to_path_buf();
                StoreError::io(path, e.into())
            })?;
            subresults.push(read_json::<Subresult>(&path)?);
        }

        subresults.sort_by(|a, b| a.wavelength.total_cmp(&b.wavelength));
        Ok(subresults)
    }

    fn read_final_result(&self, set: &str) -> Result<FinalResult, StoreError> {
        read_json(&self.final_result_path(set))
    }

    fn write_final_result(&self, set: &str, result: &FinalResult) -> Result<(), StoreError> {
        write_json_atomic(&self.final_result_path(set), result, true)
    }
}
