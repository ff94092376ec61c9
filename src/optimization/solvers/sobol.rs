/// Bits of precision of each coordinate
const BITS: usize = 32;

/// Primitive polynomial degree, coefficients and initial direction numbers
/// for dimensions 2..=4 (Joe & Kuo). Dimension 1 is van der Corput.
const POLYNOMIALS: [(usize, u32, &[u32]); 3] = [(1, 0, &[1]), (2, 1, &[1, 3]), (3, 1, &[1, 3, 1])];

pub const MAX_DIMENSIONS: usize = POLYNOMIALS.len() + 1;

/// Gray-code Sobol sequence in up to four dimensions, starting at the origin
pub struct Sobol {
    directions: Vec<[u32; BITS]>,
    state: Vec<u32>,
    index: u64,
}

impl Sobol {
    /// `dim` is capped at [`MAX_DIMENSIONS`]
    pub fn new(dim: usize) -> Self {
        let dim = dim.clamp(1, MAX_DIMENSIONS);
        let mut directions = Vec::with_capacity(dim);

        let mut first = [0u32; BITS];
        for (k, v) in first.iter_mut().enumerate() {
            *v = 1 << (BITS - 1 - k);
        }
        directions.push(first);

        for &(s, a, m) in POLYNOMIALS.iter().take(dim - 1) {
            let mut v = [0u32; BITS];
            for k in 0..s {
                v[k] = m[k] << (BITS - 1 - k);
            }
            for k in s..BITS {
                let mut value = v[k - s] ^ (v[k - s] >> s);
                for j in 1..s {
                    if (a >> (s - 1 - j)) & 1 == 1 {
                        value ^= v[k - j];
                    }
                }
                v[k] = value;
            }
            directions.push(v);
        }

        Self {
            state: vec![0; dim],
            directions,
            index: 0,
        }
    }

    /// Next point in the unit cube
    pub fn next_point(&mut self) -> Vec<f64> {
        let scale = 1.0 / (1u64 << BITS) as f64;
        let point = self.state.iter().map(|&x| x as f64 * scale).collect();

        // Flip the direction number of the lowest zero bit of the index
        let c = (!self.index).trailing_zeros() as usize;
        if c < BITS {
            for (x, v) in self.state.iter_mut().zip(&self.directions) {
                *x ^= v[c];
            }
        }
        self.index += 1;

        point
    }

    /// Next point mapped into the box
    pub fn next_scaled(&mut self, bounds: &[(f64, f64)]) -> Vec<f64> {
        self.next_point()
            .into_iter()
            .zip(bounds)
            .map(|(u, &(min, max))| min + u * (max - min))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_origin_then_center() {
        let mut sobol = Sobol::new(4);
        assert_eq!(sobol.next_point(), vec![0.0; 4]);
        assert_eq!(sobol.next_point(), vec![0.5; 4]);
    }

    #[test]
    fn each_axis_is_stratified() {
        let mut sobol = Sobol::new(4);
        let points: Vec<Vec<f64>> = (0..16).map(|_| sobol.next_point()).collect();
        for d in 0..4 {
            let mut cells: Vec<usize> = points.iter().map(|p| (p[d] * 16.0) as usize).collect();
            cells.sort_unstable();
            assert_eq!(cells, (0..16).collect::<Vec<_>>(), "axis {}", d);
        }
    }

    #[test]
    fn scaled_points_stay_in_box() {
        let bounds = [(0.01, 1.0), (0.01, 1.0), (-0.5, 0.5), (0.0, 1.0)];
        let mut sobol = Sobol::new(4);
        for _ in 0..64 {
            let p = sobol.next_scaled(&bounds);
            for (x, &(min, max)) in p.iter().zip(&bounds) {
                assert!(*x >= min && *x < max);
            }
        }
    }
}
