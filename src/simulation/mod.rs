mod external;
mod slab;

pub use external::ExternalSimulator;
pub use slab::SlabSimulator;

use crate::core::ParameterVector;
use crate::error::SimulatorError;

/// One render call. Densities are already multiplied by the density scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderRequest {
    pub wavelength: f64,
    pub absorption_density: f64,
    pub scattering_density: f64,
    pub scattering_anisotropy: f64,
    pub mix_factor: f64,
    pub reference: bool,
}

impl RenderRequest {
    /// Reference rendering for a wavelength (zero parameters)
    pub fn reference(wavelength: f64) -> Self {
        Self {
            wavelength,
            absorption_density: 0.0,
            scattering_density: 0.0,
            scattering_anisotropy: 0.0,
            mix_factor: 0.0,
            reference: true,
        }
    }

    /// Parametrized rendering; only the two densities are scaled
    pub fn scaled(wavelength: f64, params: &ParameterVector, density_scale: f64) -> Self {
        Self {
            wavelength,
            absorption_density: params.absorption_density * density_scale,
            scattering_density: params.scattering_density * density_scale,
            scattering_anisotropy: params.scattering_anisotropy,
            mix_factor: params.mix_factor,
            reference: false,
        }
    }
}

/// Relative reflectance and transmittance produced by a render
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rendering {
    pub reflectance: f64,
    pub transmittance: f64,
}

/// Black-box forward model.
///
/// A wavelength must be rendered once with `reference = true` before
/// parametrized results for it can be trusted.
pub trait Simulator: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, request: &RenderRequest) -> Result<Rendering, SimulatorError>;
}

/// Retries a failing simulator a bounded number of times
pub struct Retrying<'a> {
    inner: &'a dyn Simulator,
    retries: u32,
}

impl<'a> Retrying<'a> {
    pub fn new(inner: &'a dyn Simulator, retries: u32) -> Self {
        Self { inner, retries }
    }
}

impl Simulator for Retrying<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn render(&self, request: &RenderRequest) -> Result<Rendering, SimulatorError> {
        let mut attempt = 0;
        loop {
            match self.inner.render(request) {
                Ok(rendering) => return Ok(rendering),
                // A missing reference will not fix itself
                Err(e @ SimulatorError::MissingReference(_)) => return Err(e),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        wavelength = request.wavelength,
                        attempt,
                        error = %e,
                        "simulator call failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
