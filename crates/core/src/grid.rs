//! Uniform real-space grid helpers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Grid3D {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    #[serde(default = "default_length")]
    pub lx: f64,
    #[serde(default = "default_length")]
    pub ly: f64,
    #[serde(default = "default_length")]
    pub lz: f64,
}

impl Grid3D {
    pub fn new(nx: usize, ny: usize, nz: usize, lx: f64, ly: f64, lz: f64) -> Self {
        Self {
            nx,
            ny,
            nz,
            lx,
            ly,
            lz,
        }
    }

    #[inline]
    pub fn idx(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (iz * self.ny + iy) * self.nx + ix
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unit-cell volume.
    pub fn volume(&self) -> f64 {
        self.lx * self.ly * self.lz
    }

    /// Real-space volume element of one grid point.
    pub fn dvol(&self) -> f64 {
        self.volume() / self.len() as f64
    }

    /// Reduced (integer) reciprocal-lattice coordinates of the plane wave
    /// stored at linear index `idx`, in the centered FFT frequency
    /// convention: 0, 1, ..., n/2, -(n/2 - 1), ..., -1.
    pub fn g_at(&self, idx: usize) -> [i64; 3] {
        let ix = idx % self.nx;
        let iy = (idx / self.nx) % self.ny;
        let iz = idx / (self.nx * self.ny);
        [
            centered_frequency(self.nx, ix),
            centered_frequency(self.ny, iy),
            centered_frequency(self.nz, iz),
        ]
    }

    /// Linear index of the plane wave with reduced coordinates `g`.
    /// Components wrap modulo the grid dimensions, so any integer vector
    /// maps onto the grid.
    pub fn index_of_g(&self, g: [i64; 3]) -> usize {
        let ix = g[0].rem_euclid(self.nx as i64) as usize;
        let iy = g[1].rem_euclid(self.ny as i64) as usize;
        let iz = g[2].rem_euclid(self.nz as i64) as usize;
        self.idx(ix, iy, iz)
    }
}

fn centered_frequency(n: usize, i: usize) -> i64 {
    if i <= n / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}

fn default_length() -> f64 {
    1.0
}
