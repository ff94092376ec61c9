use super::{RenderRequest, Rendering, Simulator};
use crate::error::SimulatorError;
use std::collections::HashSet;
use std::sync::Mutex;

/// Absorption coefficient per unit of scaled density
const ABSORPTION_UNIT: f64 = 0.02;
/// Scattering coefficient per unit of scaled density
const SCATTERING_UNIT: f64 = 0.05;

/// Analytic stand-in renderer: a Kubelka-Munk slab of unit thickness.
///
/// The mix factor blends the diffuse slab with a purely absorbing path, and
/// anisotropy reduces the effective scattering as `S (1 - g)`. Like a real
/// renderer it refuses parametrized requests for wavelengths that were never
/// rendered in reference mode.
#[derive(Default)]
pub struct SlabSimulator {
    referenced: Mutex<HashSet<u64>>,
}

impl SlabSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_referenced(&self, wavelength: f64) -> bool {
        self.referenced
            .lock()
            .map(|set| set.contains(&wavelength.to_bits()))
            .unwrap_or(false)
    }

    /// Closed-form reflectance/transmittance of the slab
    pub fn evaluate(
        absorption_density: f64,
        scattering_density: f64,
        anisotropy: f64,
        mix_factor: f64,
    ) -> Result<Rendering, SimulatorError> {
        let k = absorption_density * ABSORPTION_UNIT;
        let s = scattering_density * SCATTERING_UNIT * (1.0 - anisotropy);
        if !(k > 0.0 && s > 0.0) {
            return Err(SimulatorError::Rejected(format!(
                "non-positive coefficients K = {}, S = {}",
                k, s
            )));
        }

        let a = 1.0 + k / s;
        let b = (a * a - 1.0).sqrt();
        let bs = b * s;
        let denom = a * bs.sinh() + b * bs.cosh();
        let r_km = bs.sinh() / denom;
        let t_km = b / denom;

        let direct = (-k).exp();
        Ok(Rendering {
            reflectance: mix_factor * r_km,
            transmittance: mix_factor * t_km + (1.0 - mix_factor) * direct,
        })
    }
}

impl Simulator for SlabSimulator {
    fn name(&self) -> &str {
        "slab"
    }

    fn render(&self, request: &RenderRequest) -> Result<Rendering, SimulatorError> {
        if request.reference {
            if let Ok(mut set) = self.referenced.lock() {
                set.insert(request.wavelength.to_bits());
            }
            return Ok(Rendering {
                reflectance: 1.0,
                transmittance: 1.0,
            });
        }

        if !self.is_referenced(request.wavelength) {
            return Err(SimulatorError::MissingReference(request.wavelength));
        }

        Self::evaluate(
            request.absorption_density,
            request.scattering_density,
            request.scattering_anisotropy,
            request.mix_factor,
        )
    }
}
