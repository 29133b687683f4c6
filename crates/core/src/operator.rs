//! Hamiltonian operator abstraction and the plane-wave reference operator.
//!
//! Operators are applied, never materialized: the only requirement on a
//! Hamiltonian block is a Hermitian matrix-vector product on reciprocal
//! coefficients in the block's k-point basis.

use num_complex::Complex64;

use crate::{
    backend::{copy_buffer, SpectralBackend, SpectralBuffer},
    grid::Grid3D,
    kpoint::k_plus_g_squares,
    preconditioner::{FourierDiagonalPreconditioner, OperatorPreconditioner},
};

/// Fraction of the smallest nonzero kinetic energy used to floor the
/// preconditioner shift, so the approximate inverse stays positive when
/// ½|k+G|² − ε crosses zero.
pub const SHIFT_SMIN_FRACTION: f64 = 0.5;

/// Hermitian operator restricted to one sampled wavevector's basis.
pub trait HamiltonianOperator<B: SpectralBackend> {
    type Preconditioner: OperatorPreconditioner<B>;

    fn apply(&mut self, input: &B::Buffer, output: &mut B::Buffer);
    fn alloc_field(&self) -> B::Buffer;
    fn backend(&self) -> &B;
    fn backend_mut(&mut self) -> &mut B;
    fn grid(&self) -> Grid3D;

    /// Zero every coefficient outside the k-point basis. Default: the basis
    /// is the full grid.
    fn restrict_to_basis(&self, _buffer: &mut B::Buffer) {}

    /// Approximate inverse of the projected system for one band energy,
    /// scoped to a single Sternheimer solve.
    fn sternheimer_preconditioner(&self, eigenvalue: f64) -> Self::Preconditioner;
}

/// Kinetic-plus-local-potential operator on the plane-wave grid.
///
/// The kinetic term ½|k+G|² is diagonal in reciprocal space; the local
/// potential is applied by an FFT round-trip through real space, then
/// masked back onto the basis so the operator stays Hermitian on the
/// truncated subspace.
pub struct PlaneWaveHamiltonian<B: SpectralBackend> {
    backend: B,
    grid: Grid3D,
    kinetic: Vec<f64>,
    potential: Vec<f64>,
    in_basis: Vec<bool>,
    scratch: B::Buffer,
}

impl<B: SpectralBackend> PlaneWaveHamiltonian<B> {
    pub fn new(
        backend: B,
        grid: Grid3D,
        coordinate: [f64; 3],
        basis: &[usize],
        potential: Vec<f64>,
    ) -> Self {
        assert_eq!(
            potential.len(),
            grid.len(),
            "potential length must match grid size"
        );
        let kinetic: Vec<f64> = k_plus_g_squares(&grid, coordinate)
            .into_iter()
            .map(|sq| 0.5 * sq)
            .collect();
        let mut in_basis = vec![false; grid.len()];
        for &idx in basis {
            in_basis[idx] = true;
        }
        let scratch = backend.alloc_field(grid);
        Self {
            backend,
            grid,
            kinetic,
            potential,
            in_basis,
            scratch,
        }
    }

    pub fn kinetic_energies(&self) -> &[f64] {
        &self.kinetic
    }

    fn preconditioner_shift(&self, eigenvalue: f64) -> f64 {
        let s_min = self
            .kinetic
            .iter()
            .zip(self.in_basis.iter())
            .filter(|&(&kin, &inside)| inside && kin > 1e-12)
            .map(|(&kin, _)| kin)
            .fold(f64::INFINITY, f64::min);
        let floor = if s_min.is_finite() {
            SHIFT_SMIN_FRACTION * s_min
        } else {
            1.0
        };
        // keep kin - ε + shift ≥ floor for every basis plane wave
        let kin_min = self
            .kinetic
            .iter()
            .zip(self.in_basis.iter())
            .filter(|&(_, &inside)| inside)
            .map(|(&kin, _)| kin)
            .fold(f64::INFINITY, f64::min);
        let kin_min = if kin_min.is_finite() { kin_min } else { 0.0 };
        (eigenvalue - kin_min + floor).max(floor)
    }
}

impl<B: SpectralBackend> HamiltonianOperator<B> for PlaneWaveHamiltonian<B> {
    type Preconditioner = FourierDiagonalPreconditioner;

    fn apply(&mut self, input: &B::Buffer, output: &mut B::Buffer) {
        copy_buffer(&mut self.scratch, input);
        restrict(self.scratch.as_mut_slice(), &self.in_basis);
        self.backend.inverse_fft_3d(&mut self.scratch);
        for (value, &pot) in self
            .scratch
            .as_mut_slice()
            .iter_mut()
            .zip(self.potential.iter())
        {
            *value *= pot;
        }
        self.backend.forward_fft_3d(&mut self.scratch);
        let potential_term = self.scratch.as_slice();
        let in_data = input.as_slice();
        for (idx, value) in output.as_mut_slice().iter_mut().enumerate() {
            *value = if self.in_basis[idx] {
                potential_term[idx] + self.kinetic[idx] * in_data[idx]
            } else {
                Complex64::default()
            };
        }
    }

    fn alloc_field(&self) -> B::Buffer {
        self.backend.alloc_field(self.grid)
    }

    fn backend(&self) -> &B {
        &self.backend
    }

    fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn grid(&self) -> Grid3D {
        self.grid
    }

    fn restrict_to_basis(&self, buffer: &mut B::Buffer) {
        restrict(buffer.as_mut_slice(), &self.in_basis);
    }

    fn sternheimer_preconditioner(&self, eigenvalue: f64) -> FourierDiagonalPreconditioner {
        let shift = self.preconditioner_shift(eigenvalue);
        let inverse_diagonal = self
            .kinetic
            .iter()
            .zip(self.in_basis.iter())
            .map(|(&kin, &inside)| {
                if inside {
                    1.0 / (kin - eigenvalue + shift)
                } else {
                    0.0
                }
            })
            .collect();
        FourierDiagonalPreconditioner::new(inverse_diagonal)
    }
}

fn restrict(data: &mut [Complex64], in_basis: &[bool]) {
    for (value, &inside) in data.iter_mut().zip(in_basis.iter()) {
        if !inside {
            *value = Complex64::default();
        }
    }
}
