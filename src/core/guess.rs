use super::types::ParameterVector;

/// Quadratic regression coefficients (c0, c1, c2) per parameter, fitted
/// against absorption over previously solved spectra
const ABSORPTION_DENSITY: [f64; 3] = [0.15319704, 0.13493788, 0.43538607];
const SCATTERING_DENSITY: [f64; 3] = [0.59922746, -0.0009426, -0.31473394];
const SCATTERING_ANISOTROPY: [f64; 3] = [0.29456347, -0.24329242, 0.14122699];
const MIX_FACTOR: [f64; 3] = [0.793028, 0.2839754, -0.88555556];

#[inline]
fn quadratic(coeffs: &[f64; 3], x: f64) -> f64 {
    coeffs[2] * x * x + coeffs[1] * x + coeffs[0]
}

/// Starting guess for a given absorption estimate `1 - (r + t)`.
///
/// The input is not clamped; for absorption in `[0, 1]` the result lies
/// inside the default parameter bounds.
pub fn starting_guess(absorption: f64) -> ParameterVector {
    ParameterVector::new(
        quadratic(&ABSORPTION_DENSITY, absorption),
        quadratic(&SCATTERING_DENSITY, absorption),
        quadratic(&SCATTERING_ANISOTROPY, absorption),
        quadratic(&MIX_FACTOR, absorption),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Bounds;
    use approx::assert_relative_eq;

    #[test]
    fn guess_stays_in_bounds_over_unit_interval() {
        let bounds = Bounds::default();
        for i in 0..=1000 {
            let a = i as f64 / 1000.0;
            let guess = starting_guess(a);
            assert!(bounds.contains(&guess), "absorption {} gave {:?}", a, guess);
        }
        // Edges explicitly
        assert!(bounds.contains(&starting_guess(0.0)));
        assert!(bounds.contains(&starting_guess(1.0)));
    }

    #[test]
    fn guess_at_zero_is_constant_terms() {
        let guess = starting_guess(0.0);
        assert_relative_eq!(guess.absorption_density, 0.15319704);
        assert_relative_eq!(guess.scattering_density, 0.59922746);
        assert_relative_eq!(guess.scattering_anisotropy, 0.29456347);
        assert_relative_eq!(guess.mix_factor, 0.793028);
    }

    #[test]
    fn guess_is_deterministic() {
        assert_eq!(starting_guess(0.37), starting_guess(0.37));
        assert_relative_eq!(
            starting_guess(1.0).absorption_density,
            0.15319704 + 0.13493788 + 0.43538607,
            epsilon = 1e-12
        );
    }
}
