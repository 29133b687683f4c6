//! Contiguous complex-valued field storage on a uniform 3D grid.
//!
//! A field holds either a real-space sample or its reciprocal-space
//! coefficients; the two representations share storage layout and are
//! exchanged through the backend FFT pair.

use num_complex::Complex64;

use crate::grid::Grid3D;

#[derive(Debug, Clone)]
pub struct Field3D {
    grid: Grid3D,
    data: Vec<Complex64>,
}

impl Field3D {
    pub fn zeros(grid: Grid3D) -> Self {
        Self {
            data: vec![Complex64::default(); grid.len()],
            grid,
        }
    }

    pub fn from_vec(grid: Grid3D, data: Vec<Complex64>) -> Self {
        assert_eq!(data.len(), grid.len(), "data length must match grid size");
        Self { grid, data }
    }

    /// Lift a real-valued sample into complex storage.
    pub fn from_real(grid: Grid3D, data: &[f64]) -> Self {
        assert_eq!(data.len(), grid.len(), "data length must match grid size");
        Self {
            data: data.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
            grid,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn grid(&self) -> Grid3D {
        self.grid
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: Complex64) {
        self.data.fill(value);
    }

    /// Real parts of the stored values.
    pub fn to_real_vec(&self) -> Vec<f64> {
        self.data.iter().map(|v| v.re).collect()
    }
}

impl From<Field3D> for Vec<Complex64> {
    fn from(field: Field3D) -> Self {
        field.data
    }
}
