//! Backend traits for spectral operations.
//!
//! All heavy linear algebra goes through [`SpectralBackend`] so the core
//! never commits to an FFT implementation. Field data is addressed through
//! [`SpectralBuffer`], which any backend storage type implements.
//!
//! FFT convention: `forward_fft_3d` computes the unnormalized sum
//! Σ_r f(r)·e^(-iG·r); `inverse_fft_3d` carries the 1/N factor, so the pair
//! round-trips exactly.

use num_complex::Complex64;

use crate::field::Field3D;
use crate::grid::Grid3D;

pub trait SpectralBuffer {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn grid(&self) -> Grid3D;
    fn as_slice(&self) -> &[Complex64];
    fn as_mut_slice(&mut self) -> &mut [Complex64];
}

impl SpectralBuffer for Field3D {
    fn len(&self) -> usize {
        self.len()
    }

    fn grid(&self) -> Grid3D {
        self.grid()
    }

    fn as_slice(&self) -> &[Complex64] {
        self.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [Complex64] {
        self.as_mut_slice()
    }
}

pub trait SpectralBackend {
    type Buffer: SpectralBuffer + Clone;

    fn alloc_field(&self, grid: Grid3D) -> Self::Buffer;
    fn forward_fft_3d(&self, buffer: &mut Self::Buffer);
    fn inverse_fft_3d(&self, buffer: &mut Self::Buffer);

    /// Scale buffer by a complex scalar.
    fn scale(&self, alpha: Complex64, buffer: &mut Self::Buffer);

    /// Compute y += alpha * x (axpy operation).
    fn axpy(&self, alpha: Complex64, x: &Self::Buffer, y: &mut Self::Buffer);

    /// Compute conjugate dot product ⟨x, y⟩ = x^H · y.
    fn dot(&self, x: &Self::Buffer, y: &Self::Buffer) -> Complex64;

    /// Euclidean norm ‖x‖ = sqrt(⟨x, x⟩).
    fn norm(&self, x: &Self::Buffer) -> f64 {
        self.dot(x, x).re.max(0.0).sqrt()
    }
}

pub fn copy_buffer<T: SpectralBuffer>(dst: &mut T, src: &T) {
    dst.as_mut_slice().copy_from_slice(src.as_slice());
}
