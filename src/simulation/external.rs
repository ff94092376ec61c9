use super::{RenderRequest, Rendering, Simulator};
use crate::error::SimulatorError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Renderer driven as an external program, one process per render.
///
/// The program receives the request as flags and must print the relative
/// reflectance and transmittance as two numbers on the last line of stdout.
pub struct ExternalSimulator {
    program: PathBuf,
    extra_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ExternalSimulator {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            extra_args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    /// Directory the renderer runs in (its scratch render folder)
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    fn command(&self, request: &RenderRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("--wavelength")
            .arg(request.wavelength.to_string())
            .arg("--absorption-density")
            .arg(request.absorption_density.to_string())
            .arg("--scattering-density")
            .arg(request.scattering_density.to_string())
            .arg("--scattering-anisotropy")
            .arg(request.scattering_anisotropy.to_string())
            .arg("--mix-factor")
            .arg(request.mix_factor.to_string());
        if request.reference {
            cmd.arg("--reference");
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Parse "r t" (whitespace or comma separated) from the last non-empty line
pub(crate) fn parse_rendering(stdout: &str) -> Result<Rendering, SimulatorError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| SimulatorError::Output(String::new()))?;

    let values: Vec<f64> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|_| SimulatorError::Output(line.to_string()))?;

    match values.as_slice() {
        [reflectance, transmittance] => Ok(Rendering {
            reflectance: *reflectance,
            transmittance: *transmittance,
        }),
        _ => Err(SimulatorError::Output(line.to_string())),
    }
}

impl Simulator for ExternalSimulator {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("external")
    }

    fn render(&self, request: &RenderRequest) -> Result<Rendering, SimulatorError> {
        let output = self
            .command(request)
            .output()
            .map_err(|source| SimulatorError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(SimulatorError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_rendering(&String::from_utf8_lossy(&output.stdout))
    }
}
