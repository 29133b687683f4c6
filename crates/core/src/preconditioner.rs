//! Operator preconditioners for the Sternheimer solver.

use crate::backend::{SpectralBackend, SpectralBuffer};

pub trait OperatorPreconditioner<B: SpectralBackend> {
    fn apply(&mut self, backend: &B, buffer: &mut B::Buffer);
}

/// No-op preconditioner (plain CG).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl<B: SpectralBackend> OperatorPreconditioner<B> for IdentityPreconditioner {
    fn apply(&mut self, _backend: &B, _buffer: &mut B::Buffer) {}
}

/// Diagonal scaling in reciprocal space.
///
/// For the projected Sternheimer operator Q(H−ε)Q the kinetic part
/// dominates at large |k+G|, so 1/(½|k+G|² − ε + σ) is an effective
/// approximate inverse. Out-of-basis entries carry a zero scale so the
/// preconditioned residual stays inside the k-point basis.
#[derive(Debug, Clone)]
pub struct FourierDiagonalPreconditioner {
    inverse_diagonal: Vec<f64>,
}

impl FourierDiagonalPreconditioner {
    /// `inverse_diagonal` holds the precomputed per-plane-wave scales.
    pub fn new(inverse_diagonal: Vec<f64>) -> Self {
        Self { inverse_diagonal }
    }

    pub fn inverse_diagonal(&self) -> &[f64] {
        &self.inverse_diagonal
    }
}

impl<B: SpectralBackend> OperatorPreconditioner<B> for FourierDiagonalPreconditioner {
    fn apply(&mut self, _backend: &B, buffer: &mut B::Buffer) {
        for (value, scale) in buffer
            .as_mut_slice()
            .iter_mut()
            .zip(self.inverse_diagonal.iter())
        {
            *value *= *scale;
        }
    }
}
