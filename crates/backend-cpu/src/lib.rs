//! CPU spectral backend built on rustfft.
//!
//! The 3D transforms are separable: x lines are contiguous and processed
//! in place, y and z lines are gathered into a scratch line, transformed,
//! and scattered back. Plans are cached by the shared planner, so repeat
//! transforms on the same grid reuse them.

use std::sync::{Arc, Mutex, MutexGuard};

use num_complex::Complex64;
use pwresponse_core::backend::SpectralBackend;
use pwresponse_core::field::Field3D;
use pwresponse_core::grid::Grid3D;
use rustfft::{Fft, FftPlanner};

pub struct CpuBackend {
    planner: Mutex<FftPlanner<f64>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn planner(&self) -> MutexGuard<'_, FftPlanner<f64>> {
        match self.planner.lock() {
            Ok(guard) => guard,
            // the planner only caches plans, a poisoned cache is still usable
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fft_3d(&self, buffer: &mut Field3D, inverse: bool) {
        let grid = buffer.grid();
        let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
        if grid.is_empty() {
            return;
        }

        let (fft_x, fft_y, fft_z) = {
            let mut planner = self.planner();
            if inverse {
                (
                    planner.plan_fft_inverse(nx),
                    planner.plan_fft_inverse(ny),
                    planner.plan_fft_inverse(nz),
                )
            } else {
                (
                    planner.plan_fft_forward(nx),
                    planner.plan_fft_forward(ny),
                    planner.plan_fft_forward(nz),
                )
            }
        };

        let data = buffer.as_mut_slice();

        // x lines are contiguous
        if nx > 1 {
            for line in data.chunks_exact_mut(nx) {
                fft_x.process(line);
            }
        }
        if ny > 1 {
            transform_strided_lines(&fft_y, data, ny, nx * nz, |z_then_x, iy| {
                let (iz, ix) = (z_then_x / nx, z_then_x % nx);
                (iz * ny + iy) * nx + ix
            });
        }
        if nz > 1 {
            let plane = nx * ny;
            transform_strided_lines(&fft_z, data, nz, plane, |xy, iz| iz * plane + xy);
        }

        if inverse {
            let scale = 1.0 / (nx * ny * nz) as f64;
            for value in data.iter_mut() {
                *value *= scale;
            }
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Transform every length-`n` line along one axis. `line_count` lines are
/// visited; `index` maps (line id, position on the line) to the linear
/// storage index.
fn transform_strided_lines<F>(
    fft: &Arc<dyn Fft<f64>>,
    data: &mut [Complex64],
    n: usize,
    line_count: usize,
    index: F,
) where
    F: Fn(usize, usize) -> usize,
{
    let mut line = vec![Complex64::default(); n];
    for line_id in 0..line_count {
        for (i, value) in line.iter_mut().enumerate() {
            *value = data[index(line_id, i)];
        }
        fft.process(&mut line);
        for (i, value) in line.iter().enumerate() {
            data[index(line_id, i)] = *value;
        }
    }
}

impl SpectralBackend for CpuBackend {
    type Buffer = Field3D;

    fn alloc_field(&self, grid: Grid3D) -> Self::Buffer {
        Field3D::zeros(grid)
    }

    fn forward_fft_3d(&self, buffer: &mut Self::Buffer) {
        self.fft_3d(buffer, false);
    }

    fn inverse_fft_3d(&self, buffer: &mut Self::Buffer) {
        self.fft_3d(buffer, true);
    }

    fn scale(&self, alpha: Complex64, buffer: &mut Self::Buffer) {
        for value in buffer.as_mut_slice() {
            *value *= alpha;
        }
    }

    fn axpy(&self, alpha: Complex64, x: &Self::Buffer, y: &mut Self::Buffer) {
        for (dst, src) in y.as_mut_slice().iter_mut().zip(x.as_slice()) {
            *dst += alpha * src;
        }
    }

    fn dot(&self, x: &Self::Buffer, y: &Self::Buffer) -> Complex64 {
        x.as_slice()
            .iter()
            .zip(y.as_slice())
            .map(|(a, b)| a.conj() * b)
            .sum()
    }
}
