//! Sampled wavevectors and their truncated reciprocal bases.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::grid::Grid3D;
use crate::symmetry::SymmetryOp;

/// One sample of the discrete reciprocal-space sampling.
///
/// `weight` is the quadrature weight of the sample (weights sum to 1 over
/// the set). When the sampling is symmetry-reduced, the weight must equal
/// `symmetry_ops.len()` divided by the total operation count of the set;
/// this is what makes accumulator averaging reproduce the un-reduced sum.
/// The response entry points refuse sets that break this relation.
/// `basis` lists the linear grid indices of the plane waves kept under the
/// kinetic-energy cutoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kpoint {
    pub index: usize,
    /// Fractional coordinates in the reciprocal lattice.
    pub coordinate: [f64; 3],
    pub weight: f64,
    pub symmetry_ops: Vec<SymmetryOp>,
    pub basis: Vec<usize>,
}

impl Kpoint {
    /// Sample with no symmetry reduction and the full grid as basis.
    pub fn full_grid(index: usize, coordinate: [f64; 3], weight: f64, grid: Grid3D) -> Self {
        Self {
            index,
            coordinate,
            weight,
            symmetry_ops: vec![SymmetryOp::identity()],
            basis: (0..grid.len()).collect(),
        }
    }
}

/// |k+G|² for every plane wave of the grid, with k given in fractional
/// reciprocal coordinates.
pub fn k_plus_g_squares(grid: &Grid3D, coordinate: [f64; 3]) -> Vec<f64> {
    let kx = shifted_k_vector(grid.nx, grid.lx, coordinate[0]);
    let ky = shifted_k_vector(grid.ny, grid.ly, coordinate[1]);
    let kz = shifted_k_vector(grid.nz, grid.lz, coordinate[2]);
    let mut values = vec![0.0; grid.len()];
    for iz in 0..grid.nz {
        let z2 = kz[iz] * kz[iz];
        for iy in 0..grid.ny {
            let yz2 = ky[iy] * ky[iy] + z2;
            for ix in 0..grid.nx {
                values[grid.idx(ix, iy, iz)] = kx[ix] * kx[ix] + yz2;
            }
        }
    }
    values
}

/// Grid indices of the plane waves with kinetic energy ½|k+G|² ≤ `ecut`.
pub fn reciprocal_basis(grid: &Grid3D, coordinate: [f64; 3], ecut: f64) -> Vec<usize> {
    k_plus_g_squares(grid, coordinate)
        .iter()
        .enumerate()
        .filter(|(_, &sq)| 0.5 * sq <= ecut)
        .map(|(idx, _)| idx)
        .collect()
}

fn shifted_k_vector(n: usize, length: f64, fractional_shift: f64) -> Vec<f64> {
    let two_pi = 2.0 * PI;
    (0..n)
        .map(|i| {
            let centered = if i <= n / 2 {
                i as isize
            } else {
                i as isize - n as isize
            };
            two_pi * (centered as f64 + fractional_shift) / length
        })
        .collect()
}
