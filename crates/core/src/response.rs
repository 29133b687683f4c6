//! Independent-particle susceptibility: direct kernel assembly and
//! matrix-free application.
//!
//! Orbitals are stored as reciprocal coefficients u with Σ|u_G|² = 1; the
//! real-space amplitude is ψ(r) = (N/√Ω)·IFFT(u)(r), normalized so that
//! ∫|ψ|² dvol = 1. With the backend FFT convention this makes
//! ⟨u_m, FFT(δV·IFFT(u_n))⟩ exactly the matrix element ⟨ψ_m|δV|ψ_n⟩.

use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backend::{SpectralBackend, SpectralBuffer},
    grid::Grid3D,
    kpoint::Kpoint,
    operator::HamiltonianOperator,
    projector::OccupiedProjector,
    smearing::{occupation_divided_difference, Smearing},
    sternheimer::{solve_sternheimer, SternheimerError, SternheimerOptions},
    symmetry::{symmetrize_fourier, SymmetryAccumulator, SymmetryOp},
};

/// Bands with occupation below this threshold are skipped by the
/// Sternheimer completion; their contribution is negligible and the
/// projected solve would be ill-conditioned.
pub const OCCUPATION_THRESHOLD: f64 = 1e-8;

/// Perturbations with norm below this threshold short-circuit to a zero
/// response.
pub const NEGLIGIBLE_PERTURBATION: f64 = 1e-14;

/// Density-of-states floor below which the Fermi-level-shift correction is
/// skipped (an insulating system at low temperature).
pub const DOS_THRESHOLD: f64 = 1e-12;

/// Allowed deviation of a quadrature weight from its sample's share of the
/// total symmetry operation count.
pub const WEIGHT_TOLERANCE: f64 = 1e-12;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Chi0Options {
    /// Off-diagonal pair terms with |ratio| below this are skipped by the
    /// explicit sum. Only valid with `sternheimer_contribution = false`.
    pub droptol: f64,
    /// Complete the explicit pair sum with Sternheimer solves into the
    /// complement of the computed subspace.
    pub sternheimer_contribution: bool,
    /// Override of the model temperature; `None` keeps the context value.
    pub temperature: Option<f64>,
    pub solver: SternheimerOptions,
}

impl Default for Chi0Options {
    fn default() -> Self {
        Self {
            droptol: 0.0,
            sternheimer_contribution: true,
            temperature: None,
            solver: SternheimerOptions::default(),
        }
    }
}

impl Chi0Options {
    pub fn validate(&self) -> Result<(), Chi0Error> {
        if self.droptol > 0.0 && self.sternheimer_contribution {
            return Err(Chi0Error::ConflictingApproximations);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Chi0Error {
    #[error(
        "droptol > 0 discards pair terms that the Sternheimer completion \
         would re-add; set droptol = 0 or disable sternheimer_contribution"
    )]
    ConflictingApproximations,
    #[error(
        "the direct kernel sums explicitly over every sampled wavevector; \
         k-point {index} carries {ops} symmetry operations - regenerate the \
         sampling without symmetry reduction"
    )]
    SymmetryReducedSampling { index: usize, ops: usize },
    #[error(
        "k-point {index} carries weight {weight} but {ops} of {total} \
         symmetry operations; sampling weights must equal their share of \
         the operation count"
    )]
    InconsistentWeight {
        index: usize,
        weight: f64,
        ops: usize,
        total: usize,
    },
    #[error(transparent)]
    Solver(#[from] SternheimerError),
}

/// Check the [`Kpoint::weight`] convention tying quadrature weights to
/// symmetry operation counts; the accumulator-normalized and
/// weight-multiplied sums agree only under it.
fn validate_weights<B, H>(blocks: &[KpointData<B, H>]) -> Result<(), Chi0Error>
where
    B: SpectralBackend,
{
    let total: usize = blocks.iter().map(|b| b.kpoint.symmetry_ops.len()).sum();
    if total == 0 {
        return Ok(());
    }
    for block in blocks {
        let ops = block.kpoint.symmetry_ops.len();
        let share = ops as f64 / total as f64;
        if (block.kpoint.weight - share).abs() > WEIGHT_TOLERANCE {
            return Err(Chi0Error::InconsistentWeight {
                index: block.kpoint.index,
                weight: block.kpoint.weight,
                ops,
                total,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Model data
// ============================================================================

/// Global model data shared by every k-point block.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub grid: Grid3D,
    pub fermi_level: f64,
    pub temperature: f64,
    pub smearing: Smearing,
    /// Maximum occupation per orbital (2 for spin-paired electrons).
    pub filling: f64,
    /// Full model symmetry group; a superset of the per-k-point operation
    /// subsets carried by the sampling.
    pub symmetry_group: Vec<SymmetryOp>,
}

/// Externally computed eigendata and the Hamiltonian block for one sampled
/// wavevector. Read-only to the response core apart from the Hamiltonian's
/// internal scratch buffers.
pub struct KpointData<B: SpectralBackend, H> {
    pub kpoint: Kpoint,
    pub hamiltonian: H,
    pub eigenvalues: Vec<f64>,
    pub occupations: Vec<f64>,
    pub orbitals: Vec<B::Buffer>,
}

// ============================================================================
// Direct kernel (quadratic in grid size; small systems / validation)
// ============================================================================

/// Assemble the dense χ0 kernel, row-major over grid-point pairs.
///
/// The kernel maps a perturbation to a response by plain matrix-vector
/// product ([`apply_kernel`]); the volume element is folded into the
/// entries. Refuses symmetry-reduced samplings: the explicit sum visits
/// every sample, so contributions from symmetry-equivalent points would be
/// missing.
pub fn compute_chi0_kernel<B, H>(
    backend: &B,
    context: &ResponseContext,
    blocks: &[KpointData<B, H>],
    options: &Chi0Options,
) -> Result<Vec<f64>, Chi0Error>
where
    B: SpectralBackend,
{
    let grid = context.grid;
    let temperature = options.temperature.unwrap_or(context.temperature);
    for block in blocks {
        let ops = &block.kpoint.symmetry_ops;
        if ops.len() != 1 || !ops[0].is_identity() {
            return Err(Chi0Error::SymmetryReducedSampling {
                index: block.kpoint.index,
                ops: ops.len(),
            });
        }
    }
    validate_weights(blocks)?;

    let n_grid = grid.len();
    let c2 = amplitude_scale_sq(&grid);
    let dvol = grid.dvol();
    let mut kernel = vec![0.0; n_grid * n_grid];
    let mut pair = vec![Complex64::default(); n_grid];

    for block in blocks {
        let real_orbitals = real_space_orbitals(backend, &block.orbitals);
        let n_bands = block.eigenvalues.len();
        for n in 0..n_bands {
            for m in 0..n_bands {
                let ratio = occupation_divided_difference(
                    context.smearing,
                    block.occupations[n],
                    block.occupations[m],
                    block.eigenvalues[n],
                    block.eigenvalues[m],
                    context.fermi_level,
                    temperature,
                    context.filling,
                );
                if n != m && options.droptol > 0.0 && ratio.abs() < options.droptol {
                    continue;
                }
                if ratio == 0.0 {
                    continue;
                }
                let weight = block.kpoint.weight * ratio * dvol * c2 * c2;
                // a_i = ψ_n*(i)ψ_m(i)/c², pairing the conjugate of band n
                // with band m exactly as first-order perturbation theory does
                for (p, (&a, &b)) in pair.iter_mut().zip(
                    real_orbitals[n]
                        .as_slice()
                        .iter()
                        .zip(real_orbitals[m].as_slice()),
                ) {
                    *p = a.conj() * b;
                }
                for i in 0..n_grid {
                    let a_i = pair[i];
                    let row = &mut kernel[i * n_grid..(i + 1) * n_grid];
                    for (value, &a_j) in row.iter_mut().zip(pair.iter()) {
                        *value += weight * (a_i * a_j.conj()).re;
                    }
                }
            }
        }
    }

    if temperature > 0.0 && context.smearing != Smearing::None {
        let (ldos, dos) = local_density_of_states(backend, context, temperature, blocks);
        if dos > DOS_THRESHOLD {
            for i in 0..n_grid {
                let row = &mut kernel[i * n_grid..(i + 1) * n_grid];
                let l_i = ldos[i];
                for (value, &l_j) in row.iter_mut().zip(ldos.iter()) {
                    *value += l_i * l_j * dvol / dos;
                }
            }
        }
    }

    Ok(kernel)
}

/// δρ = K·δV for a kernel from [`compute_chi0_kernel`].
pub fn apply_kernel(kernel: &[f64], delta_v: &[f64]) -> Vec<f64> {
    let n = delta_v.len();
    assert_eq!(kernel.len(), n * n, "kernel must be n x n");
    kernel
        .chunks_exact(n)
        .map(|row| row.iter().zip(delta_v).map(|(k, v)| k * v).sum())
        .collect()
}

// ============================================================================
// Matrix-free application
// ============================================================================

/// Apply χ0 to a real-space perturbation, returning the response density on
/// the same grid.
///
/// The perturbation is renormalized to unit norm (restored exactly on
/// return) and symmetrized under the full model group before any solve.
/// Per-k-point contributions are computed in parallel with private partial
/// buffers, folded through the symmetry accumulator, and the Fermi-level
/// shift correction is added at positive temperature.
pub fn apply_chi0<B, H>(
    backend: &B,
    context: &ResponseContext,
    blocks: &mut [KpointData<B, H>],
    delta_v: &[f64],
    options: &Chi0Options,
) -> Result<Vec<f64>, Chi0Error>
where
    B: SpectralBackend + Sync,
    B::Buffer: Send + Sync,
    H: HamiltonianOperator<B> + Send,
{
    options.validate()?;
    validate_weights(blocks)?;
    let grid = context.grid;
    assert_eq!(
        delta_v.len(),
        grid.len(),
        "perturbation length must match grid size"
    );
    let temperature = options.temperature.unwrap_or(context.temperature);

    let norm = delta_v.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < NEGLIGIBLE_PERTURBATION {
        return Ok(vec![0.0; grid.len()]);
    }
    // unit norm keeps every Sternheimer right-hand side on a comparable
    // scale; the factor is restored exactly on return
    let mut dv: Vec<f64> = delta_v.iter().map(|&v| v / norm).collect();

    // an asymmetric perturbation is unphysical under the model group
    if context.symmetry_group.iter().any(|op| !op.is_identity()) {
        let mut buffer = backend.alloc_field(grid);
        for (value, &v) in buffer.as_mut_slice().iter_mut().zip(dv.iter()) {
            *value = Complex64::new(v, 0.0);
        }
        backend.forward_fft_3d(&mut buffer);
        let symmetrized = symmetrize_fourier(grid, buffer.as_slice(), &context.symmetry_group);
        buffer.as_mut_slice().copy_from_slice(&symmetrized);
        backend.inverse_fft_3d(&mut buffer);
        for (v, value) in dv.iter_mut().zip(buffer.as_slice()) {
            *v = value.re;
        }
    }

    // k-points are independent; each worker fills a private contribution
    // that is reduced into the shared accumulator afterwards
    let partials: Vec<Result<Vec<Complex64>, Chi0Error>> = blocks
        .par_iter_mut()
        .map(|block| kpoint_response_fourier(backend, context, temperature, block, &dv, options))
        .collect();

    let mut accumulator = SymmetryAccumulator::new(grid);
    for (block, partial) in blocks.iter().zip(partials) {
        accumulator.accumulate(&partial?, &block.kpoint.symmetry_ops);
    }
    let averaged = accumulator.finish();

    let mut buffer = backend.alloc_field(grid);
    buffer.as_mut_slice().copy_from_slice(&averaged);
    backend.inverse_fft_3d(&mut buffer);
    let mut rho: Vec<f64> = buffer.as_slice().iter().map(|v| v.re).collect();

    if temperature > 0.0 && context.smearing != Smearing::None {
        let (ldos, dos) = local_density_of_states(backend, context, temperature, blocks);
        if dos > DOS_THRESHOLD {
            let projected = ldos
                .iter()
                .zip(dv.iter())
                .map(|(l, v)| l * v)
                .sum::<f64>()
                * grid.dvol();
            let fermi_shift = projected / dos;
            for (value, &l) in rho.iter_mut().zip(ldos.iter()) {
                *value += l * fermi_shift;
            }
        }
    }

    for value in rho.iter_mut() {
        *value *= norm;
    }
    Ok(rho)
}

/// Response contribution of one k-point block, returned in Fourier space
/// ready for symmetry accumulation.
fn kpoint_response_fourier<B, H>(
    backend: &B,
    context: &ResponseContext,
    temperature: f64,
    block: &mut KpointData<B, H>,
    delta_v: &[f64],
    options: &Chi0Options,
) -> Result<Vec<Complex64>, Chi0Error>
where
    B: SpectralBackend,
    H: HamiltonianOperator<B>,
{
    let grid = context.grid;
    let c2 = amplitude_scale_sq(&grid);
    let KpointData {
        hamiltonian,
        eigenvalues,
        occupations,
        orbitals,
        ..
    } = block;
    let n_bands = eigenvalues.len();

    let real_orbitals = real_space_orbitals(backend, orbitals);

    // g_n = FFT(δV ⊙ f_n) restricted to the basis, so that
    // ⟨u_m, g_n⟩ = ⟨ψ_m|δV|ψ_n⟩
    let perturbed: Vec<B::Buffer> = real_orbitals
        .iter()
        .map(|f| {
            let mut g = f.clone();
            for (value, &v) in g.as_mut_slice().iter_mut().zip(delta_v.iter()) {
                *value *= v;
            }
            backend.forward_fft_3d(&mut g);
            hamiltonian.restrict_to_basis(&mut g);
            g
        })
        .collect();

    let mut delta_rho = vec![Complex64::default(); grid.len()];

    // explicit pair sum inside the computed subspace
    for n in 0..n_bands {
        for m in 0..n_bands {
            let ratio = occupation_divided_difference(
                context.smearing,
                occupations[n],
                occupations[m],
                eigenvalues[n],
                eigenvalues[m],
                context.fermi_level,
                temperature,
                context.filling,
            );
            if n != m && options.droptol > 0.0 && ratio.abs() < options.droptol {
                continue;
            }
            if ratio == 0.0 {
                continue;
            }
            let matrix_element = backend.dot(&orbitals[m], &perturbed[n]);
            let coeff = matrix_element * (ratio * c2);
            for ((value, &a), &b) in delta_rho
                .iter_mut()
                .zip(real_orbitals[n].as_slice())
                .zip(real_orbitals[m].as_slice())
            {
                *value += coeff * a.conj() * b;
            }
        }
    }

    // Sternheimer completion into the complement of the computed subspace
    if options.sternheimer_contribution {
        let projector = OccupiedProjector::new(&orbitals[..]);
        for n in 0..n_bands {
            let occupation = occupations[n];
            if occupation < OCCUPATION_THRESHOLD {
                continue;
            }
            let mut rhs = perturbed[n].clone();
            backend.scale(Complex64::new(-1.0, 0.0), &mut rhs);
            let mut preconditioner = hamiltonian.sternheimer_preconditioner(eigenvalues[n]);
            let solution = solve_sternheimer(
                hamiltonian,
                &projector,
                &mut preconditioner,
                eigenvalues[n],
                &rhs,
                &options.solver,
            )?;
            let mut delta_f = solution.delta_psi;
            backend.inverse_fft_3d(&mut delta_f);
            for ((value, &a), &d) in delta_rho
                .iter_mut()
                .zip(real_orbitals[n].as_slice())
                .zip(delta_f.as_slice())
            {
                *value += Complex64::new(2.0 * occupation * c2 * (a.conj() * d).re, 0.0);
            }
        }
    }

    let mut fourier = backend.alloc_field(grid);
    fourier.as_mut_slice().copy_from_slice(&delta_rho);
    backend.forward_fft_3d(&mut fourier);
    Ok(fourier.as_slice().to_vec())
}

// ============================================================================
// Fermi-level shift (LDOS / DOS)
// ============================================================================

/// Local density of states at the Fermi level and its integral.
///
/// Each block's contribution is folded through the block's symmetry
/// operations and averaged over the (sample, operation) pairs, the same
/// accumulation the per-k-point response goes through, so a
/// symmetry-reduced sampling yields the group-invariant LDOS of the
/// explicit one.
fn local_density_of_states<B, H>(
    backend: &B,
    context: &ResponseContext,
    temperature: f64,
    blocks: &[KpointData<B, H>],
) -> (Vec<f64>, f64)
where
    B: SpectralBackend,
{
    let grid = context.grid;
    let c2 = amplitude_scale_sq(&grid);
    let mut accumulator = SymmetryAccumulator::new(grid);
    let mut contribution = vec![Complex64::default(); grid.len()];
    for block in blocks {
        contribution.fill(Complex64::default());
        for (n, &eps) in block.eigenvalues.iter().enumerate() {
            let x = (eps - context.fermi_level) / temperature;
            let density = -context.filling * context.smearing.occupation_derivative(x) / temperature;
            if density <= 0.0 {
                continue;
            }
            let mut f = block.orbitals[n].clone();
            backend.inverse_fft_3d(&mut f);
            let weight = density * c2;
            for (value, amp) in contribution.iter_mut().zip(f.as_slice()) {
                value.re += weight * amp.norm_sqr();
            }
        }
        let mut fourier = backend.alloc_field(grid);
        fourier.as_mut_slice().copy_from_slice(&contribution);
        backend.forward_fft_3d(&mut fourier);
        accumulator.accumulate(fourier.as_slice(), &block.kpoint.symmetry_ops);
    }
    let averaged = accumulator.finish();
    let mut buffer = backend.alloc_field(grid);
    buffer.as_mut_slice().copy_from_slice(&averaged);
    backend.inverse_fft_3d(&mut buffer);
    let ldos: Vec<f64> = buffer.as_slice().iter().map(|v| v.re).collect();
    let dos = ldos.iter().sum::<f64>() * grid.dvol();
    (ldos, dos)
}

fn real_space_orbitals<B: SpectralBackend>(backend: &B, orbitals: &[B::Buffer]) -> Vec<B::Buffer> {
    orbitals
        .iter()
        .map(|u| {
            let mut f = u.clone();
            backend.inverse_fft_3d(&mut f);
            f
        })
        .collect()
}

/// (N/√Ω)², the square of the reciprocal-to-real amplitude scale.
fn amplitude_scale_sq(grid: &Grid3D) -> f64 {
    let n = grid.len() as f64;
    n * n / grid.volume()
}
