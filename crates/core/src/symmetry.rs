//! Symmetry operations and accumulation over irreducible samplings.
//!
//! A density contribution computed at one irreducible wavevector sample is
//! folded back onto the full grid by mapping its Fourier coefficients
//! through each operation attached to that sample. Dividing the shared
//! buffer by the total number of (sample, operation) pairs then recovers the
//! average over the un-reduced sampling.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::grid::Grid3D;

/// One crystal symmetry operation: an integer rotation acting on reduced
/// reciprocal coordinates plus a fractional lattice translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymmetryOp {
    pub rotation: [[i64; 3]; 3],
    pub translation: [f64; 3],
}

impl SymmetryOp {
    pub fn identity() -> Self {
        Self {
            rotation: [[1, 0, 0], [0, 1, 0], [0, 0, 1]],
            translation: [0.0; 3],
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn inversion() -> Self {
        Self {
            rotation: [[-1, 0, 0], [0, -1, 0], [0, 0, -1]],
            translation: [0.0; 3],
        }
    }

    pub fn rotate_g(&self, g: [i64; 3]) -> [i64; 3] {
        let r = &self.rotation;
        [
            r[0][0] * g[0] + r[0][1] * g[1] + r[0][2] * g[2],
            r[1][0] * g[0] + r[1][1] * g[1] + r[1][2] * g[2],
            r[2][0] * g[0] + r[2][1] * g[1] + r[2][2] * g[2],
        ]
    }

    /// Translation phase e^(-2πi g·w) picked up by the mapped coefficient.
    pub fn phase(&self, g: [i64; 3]) -> Complex64 {
        let arg = -2.0
            * PI
            * (g[0] as f64 * self.translation[0]
                + g[1] as f64 * self.translation[1]
                + g[2] as f64 * self.translation[2]);
        if arg == 0.0 {
            Complex64::new(1.0, 0.0)
        } else {
            Complex64::from_polar(1.0, arg)
        }
    }
}

/// Shared accumulation buffer for symmetry-folded Fourier contributions.
///
/// Writes are combine-only; for parallel k-point loops each worker computes
/// its contribution privately and the accumulation happens in one reduction
/// pass afterward.
pub struct SymmetryAccumulator {
    grid: Grid3D,
    buffer: Vec<Complex64>,
    op_count: usize,
}

impl SymmetryAccumulator {
    pub fn new(grid: Grid3D) -> Self {
        Self {
            buffer: vec![Complex64::default(); grid.len()],
            grid,
            op_count: 0,
        }
    }

    /// Number of (sample, operation) pairs accumulated so far.
    pub fn op_count(&self) -> usize {
        self.op_count
    }

    /// Fold a reciprocal-space contribution through each operation and add
    /// the mapped copies into the buffer.
    pub fn accumulate(&mut self, contribution: &[Complex64], ops: &[SymmetryOp]) {
        assert_eq!(
            contribution.len(),
            self.grid.len(),
            "contribution length must match grid size"
        );
        for op in ops {
            map_fourier(self.grid, contribution, &mut self.buffer, op);
            self.op_count += 1;
        }
    }

    /// Average over all accumulated (sample, operation) pairs.
    pub fn finish(self) -> Vec<Complex64> {
        if self.op_count == 0 {
            return self.buffer;
        }
        let inv = 1.0 / self.op_count as f64;
        self.buffer.into_iter().map(|v| v * inv).collect()
    }
}

fn map_fourier(grid: Grid3D, src: &[Complex64], dst: &mut [Complex64], op: &SymmetryOp) {
    if op.is_identity() {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d += s;
        }
        return;
    }
    for (idx, &value) in src.iter().enumerate() {
        let g_rot = op.rotate_g(grid.g_at(idx));
        let target = grid.index_of_g(g_rot);
        dst[target] += op.phase(g_rot) * value;
    }
}

/// Project reciprocal-space coefficients onto the invariant subspace of
/// `group` (the average over all group operations). Applying the projection
/// twice is a no-op since the operations form a group.
pub fn symmetrize_fourier(grid: Grid3D, data: &[Complex64], group: &[SymmetryOp]) -> Vec<Complex64> {
    if group.is_empty() {
        return data.to_vec();
    }
    let mut accumulator = SymmetryAccumulator::new(grid);
    accumulator.accumulate(data, group);
    accumulator.finish()
}
