#![cfg(test)]

use std::f64::consts::PI;

use num_complex::Complex64;

use super::backend::SpectralBackend;
use super::field::Field3D;
use super::grid::Grid3D;
use super::kpoint::{k_plus_g_squares, Kpoint};
use super::operator::PlaneWaveHamiltonian;
use super::response::{
    apply_chi0, apply_kernel, compute_chi0_kernel, Chi0Error, Chi0Options, KpointData,
    ResponseContext,
};
use super::smearing::Smearing;
use super::symmetry::SymmetryOp;

#[derive(Clone, Copy, Default)]
struct TestBackend;

impl SpectralBackend for TestBackend {
    type Buffer = Field3D;

    fn alloc_field(&self, grid: Grid3D) -> Self::Buffer {
        Field3D::zeros(grid)
    }

    fn forward_fft_3d(&self, buffer: &mut Self::Buffer) {
        discrete_fft(buffer, false);
    }

    fn inverse_fft_3d(&self, buffer: &mut Self::Buffer) {
        discrete_fft(buffer, true);
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

fn discrete_fft(buffer: &mut Field3D, inverse: bool) {
    let grid = buffer.grid();
    let (nx, ny, nz) = (grid.nx, grid.ny, grid.nz);
    let data = buffer.as_mut_slice();
    let mut output = vec![Complex64::default(); data.len()];
    let norm = if inverse {
        1.0 / (nx * ny * nz) as f64
    } else {
        1.0
    };
    let sign = if inverse { 1.0 } else { -1.0 };
    for kz in 0..nz {
        for ky in 0..ny {
            for kx in 0..nx {
                let mut sum = Complex64::default();
                for z in 0..nz {
                    for y in 0..ny {
                        for x in 0..nx {
                            let idx = (z * ny + y) * nx + x;
                            let phase = sign
                                * 2.0
                                * PI
                                * ((kx * x) as f64 / nx as f64
                                    + (ky * y) as f64 / ny as f64
                                    + (kz * z) as f64 / nz as f64);
                            sum += data[idx] * Complex64::from_polar(1.0, phase);
                        }
                    }
                }
                output[(kz * ny + ky) * nx + kx] = sum * norm;
            }
        }
    }
    data.copy_from_slice(&output);
}

type FreeElectronBlock = KpointData<TestBackend, PlaneWaveHamiltonian<TestBackend>>;

fn metallic_context(grid: Grid3D, fermi_level: f64, temperature: f64) -> ResponseContext {
    ResponseContext {
        grid,
        fermi_level,
        temperature,
        smearing: Smearing::FermiDirac,
        filling: 2.0,
        symmetry_group: vec![SymmetryOp::identity()],
    }
}

/// Free-electron eigendata: the orbitals are single plane waves, so the
/// full diagonalization is available without an eigensolver. `n_bands`
/// selects the lowest kinetic energies; the Hamiltonian basis stays the
/// whole grid, so the remaining plane waves form the unexplored complement.
fn free_electron_block(
    context: &ResponseContext,
    index: usize,
    coordinate: [f64; 3],
    weight: f64,
    n_bands: usize,
) -> FreeElectronBlock {
    let grid = context.grid;
    let kinetic: Vec<f64> = k_plus_g_squares(&grid, coordinate)
        .into_iter()
        .map(|sq| 0.5 * sq)
        .collect();
    let mut order: Vec<usize> = (0..grid.len()).collect();
    order.sort_by(|&a, &b| kinetic[a].total_cmp(&kinetic[b]));
    order.truncate(n_bands);

    let eigenvalues: Vec<f64> = order.iter().map(|&idx| kinetic[idx]).collect();
    let occupations: Vec<f64> = eigenvalues
        .iter()
        .map(|&eps| {
            let x = (eps - context.fermi_level) / context.temperature;
            context.filling * context.smearing.occupation(x)
        })
        .collect();
    let orbitals: Vec<Field3D> = order
        .iter()
        .map(|&idx| {
            let mut u = Field3D::zeros(grid);
            u.as_mut_slice()[idx] = Complex64::new(1.0, 0.0);
            u
        })
        .collect();

    let kpoint = Kpoint::full_grid(index, coordinate, weight, grid);
    let hamiltonian = PlaneWaveHamiltonian::new(
        TestBackend,
        grid,
        coordinate,
        &kpoint.basis,
        vec![0.0; grid.len()],
    );
    KpointData {
        kpoint,
        hamiltonian,
        eigenvalues,
        occupations,
        orbitals,
    }
}

/// Two-band block whose orbital densities vary across the cell: each band
/// superposes the G = 0 plane wave with G = +1 (at +k) or its inversion
/// image G = -1 (at -k), giving |ψ|² ∝ 1 ∓ sin(2πx). The eigenvalues
/// straddle the Fermi level asymmetrically so the two bands enter the local
/// density of states with different factors.
fn structured_block(
    context: &ResponseContext,
    index: usize,
    coordinate: [f64; 3],
    weight: f64,
) -> FreeElectronBlock {
    let grid = context.grid;
    let partner = if coordinate[0] >= 0.0 { 1 } else { grid.nx - 1 };
    let amp = 1.0 / 2.0_f64.sqrt();
    let orbitals: Vec<Field3D> = [Complex64::new(0.0, amp), Complex64::new(0.0, -amp)]
        .iter()
        .map(|&c| {
            let mut u = Field3D::zeros(grid);
            u.as_mut_slice()[0] = Complex64::new(amp, 0.0);
            u.as_mut_slice()[partner] = c;
            u
        })
        .collect();
    let eigenvalues = vec![0.2, 1.0];
    let occupations: Vec<f64> = eigenvalues
        .iter()
        .map(|&eps| {
            let x = (eps - context.fermi_level) / context.temperature;
            context.filling * context.smearing.occupation(x)
        })
        .collect();

    let kpoint = Kpoint::full_grid(index, coordinate, weight, grid);
    let hamiltonian = PlaneWaveHamiltonian::new(
        TestBackend,
        grid,
        coordinate,
        &kpoint.basis,
        vec![0.0; grid.len()],
    );
    KpointData {
        kpoint,
        hamiltonian,
        eigenvalues,
        occupations,
        orbitals,
    }
}

#[test]
fn droptol_and_sternheimer_completion_are_mutually_exclusive() {
    let options = Chi0Options {
        droptol: 1e-6,
        sternheimer_contribution: true,
        ..Chi0Options::default()
    };
    assert!(matches!(
        options.validate(),
        Err(Chi0Error::ConflictingApproximations)
    ));

    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, 4)];
    let delta_v = vec![0.1; grid.len()];
    let result = apply_chi0(&TestBackend, &context, &mut blocks, &delta_v, &options);
    assert!(matches!(result, Err(Chi0Error::ConflictingApproximations)));
}

#[test]
fn direct_kernel_refuses_symmetry_reduced_samplings() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let mut block = free_electron_block(&context, 3, [0.25, 0.0, 0.0], 1.0, 4);
    block.kpoint.symmetry_ops = vec![SymmetryOp::identity(), SymmetryOp::inversion()];

    let result = compute_chi0_kernel(&TestBackend, &context, &[block], &Chi0Options::default());
    match result {
        Err(Chi0Error::SymmetryReducedSampling { index, ops }) => {
            assert_eq!(index, 3);
            assert_eq!(ops, 2);
        }
        other => panic!("expected a symmetry-reduction refusal, got {other:?}"),
    }
}

#[test]
fn direct_kernel_is_symmetric() {
    let grid = Grid3D::new(4, 2, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 21.0, 2.0);
    let blocks = vec![free_electron_block(&context, 0, [0.1, 0.0, 0.0], 1.0, grid.len())];

    let kernel =
        compute_chi0_kernel(&TestBackend, &context, &blocks, &Chi0Options::default()).unwrap();
    let n = grid.len();
    for i in 0..n {
        for j in 0..n {
            assert!(
                (kernel[i * n + j] - kernel[j * n + i]).abs() < 1e-10,
                "kernel entry ({i}, {j}) breaks symmetry"
            );
        }
    }
}

#[test]
fn matrix_free_application_matches_the_direct_kernel() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    // every plane wave is a computed band, so the Sternheimer completion
    // has an empty complement and the explicit sums must agree exactly
    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let delta_v = vec![0.2, -0.5, 0.4, 0.1];

    let kernel =
        compute_chi0_kernel(&TestBackend, &context, &blocks, &Chi0Options::default()).unwrap();
    let direct = apply_kernel(&kernel, &delta_v);
    let matrix_free = apply_chi0(
        &TestBackend,
        &context,
        &mut blocks,
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();

    for (i, (a, b)) in matrix_free.iter().zip(direct.iter()).enumerate() {
        assert!(
            (a - b).abs() < 1e-9,
            "kernel and matrix-free responses differ at point {i}: {a} vs {b}"
        );
    }
}

#[test]
fn sternheimer_completion_recovers_the_truncated_bands() {
    let grid = Grid3D::new(8, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 30.0, 2.0);
    let delta_v = vec![0.3, -0.2, 0.15, 0.4, -0.35, 0.1, -0.25, 0.05];

    // reference: explicit sum over the full diagonalization
    let full = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let kernel =
        compute_chi0_kernel(&TestBackend, &context, &full, &Chi0Options::default()).unwrap();
    let reference = apply_kernel(&kernel, &delta_v);

    // truncated: only the 5 lowest bands are computed; the pairs involving
    // the dropped high-energy plane waves come back through the solves
    let mut truncated = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, 5)];
    let mut options = Chi0Options::default();
    options.solver.tol = 1e-12;
    let completed =
        apply_chi0(&TestBackend, &context, &mut truncated, &delta_v, &options).unwrap();

    let scale = reference.iter().map(|v| v.abs()).fold(0.0, f64::max);
    for (i, (a, b)) in completed.iter().zip(reference.iter()).enumerate() {
        assert!(
            (a - b).abs() < 1e-6 * scale.max(1.0),
            "completed response differs from the full sum at point {i}: {a} vs {b}"
        );
    }
}

#[test]
fn response_scales_exactly_with_the_perturbation() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let options = Chi0Options::default();
    let delta_v = vec![0.2, -0.5, 0.4, 0.1];
    let scaled_v: Vec<f64> = delta_v.iter().map(|v| 4.0 * v).collect();

    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let base = apply_chi0(&TestBackend, &context, &mut blocks, &delta_v, &options).unwrap();
    let scaled = apply_chi0(&TestBackend, &context, &mut blocks, &scaled_v, &options).unwrap();

    // the internal renormalization divides the perturbation by its norm, so
    // a power-of-two factor commutes with every rounding step bit for bit
    for (a, b) in scaled.iter().zip(base.iter()) {
        assert_eq!(*a, 4.0 * b);
    }
}

#[test]
fn response_is_linear_in_the_perturbation() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let mut options = Chi0Options::default();
    options.solver.tol = 1e-12;
    let v1 = vec![0.2, -0.5, 0.4, 0.1];
    let v2 = vec![-0.3, 0.1, 0.2, -0.6];
    let combined: Vec<f64> = v1
        .iter()
        .zip(v2.iter())
        .map(|(a, b)| 0.7 * a - 1.3 * b)
        .collect();

    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let r1 = apply_chi0(&TestBackend, &context, &mut blocks, &v1, &options).unwrap();
    let r2 = apply_chi0(&TestBackend, &context, &mut blocks, &v2, &options).unwrap();
    let r_combined = apply_chi0(&TestBackend, &context, &mut blocks, &combined, &options).unwrap();

    for ((c, a), b) in r_combined.iter().zip(r1.iter()).zip(r2.iter()) {
        assert!((c - (0.7 * a - 1.3 * b)).abs() < 1e-9);
    }
}

#[test]
fn negligible_perturbations_return_a_zero_response() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let delta_v = vec![1e-16; grid.len()];

    let rho = apply_chi0(
        &TestBackend,
        &context,
        &mut blocks,
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();
    assert!(rho.iter().all(|&v| v == 0.0));
}

#[test]
fn uniform_perturbation_draws_no_response() {
    // a constant shift of the potential is absorbed by the Fermi-level
    // shift term, so the net density response of a metal vanishes
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let delta_v = vec![0.7; grid.len()];

    let rho = apply_chi0(
        &TestBackend,
        &context,
        &mut blocks,
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();
    for (i, value) in rho.iter().enumerate() {
        assert!(
            value.abs() < 1e-10,
            "uniform perturbation leaked a response at point {i}: {value}"
        );
    }
}

#[test]
fn insulating_system_at_zero_temperature() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    // Fermi level in the gap between the |G| = 1 and |G| = 2 shells
    let context = ResponseContext {
        grid,
        fermi_level: 40.0,
        temperature: 0.0,
        smearing: Smearing::None,
        filling: 2.0,
        symmetry_group: vec![SymmetryOp::identity()],
    };
    let mut blocks = vec![free_electron_block(&context, 0, [0.0; 3], 1.0, grid.len())];
    let delta_v = vec![0.2, -0.5, 0.4, 0.1];

    let kernel =
        compute_chi0_kernel(&TestBackend, &context, &blocks, &Chi0Options::default()).unwrap();
    let direct = apply_kernel(&kernel, &delta_v);
    let matrix_free = apply_chi0(
        &TestBackend,
        &context,
        &mut blocks,
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();

    for (a, b) in matrix_free.iter().zip(direct.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

#[test]
fn symmetry_reduced_sampling_matches_the_explicit_sampling() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    // even perturbation, so both runs see the same field after the
    // symmetrization pass
    let delta_v = vec![1.3, -0.3, -0.7, -0.3];

    // explicit sampling: ±k with equal weights, identity operations only
    let explicit_context = metallic_context(grid, 15.0, 3.0);
    let mut explicit_blocks = vec![
        free_electron_block(&explicit_context, 0, [0.25, 0.0, 0.0], 0.5, grid.len()),
        free_electron_block(&explicit_context, 1, [-0.25, 0.0, 0.0], 0.5, grid.len()),
    ];
    let explicit = apply_chi0(
        &TestBackend,
        &explicit_context,
        &mut explicit_blocks,
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();

    // reduced sampling: the +k sample stands in for both, carrying the
    // inversion that generates its partner
    let mut reduced_context = metallic_context(grid, 15.0, 3.0);
    reduced_context.symmetry_group = vec![SymmetryOp::identity(), SymmetryOp::inversion()];
    let mut reduced_block =
        free_electron_block(&reduced_context, 0, [0.25, 0.0, 0.0], 1.0, grid.len());
    reduced_block.kpoint.symmetry_ops =
        vec![SymmetryOp::identity(), SymmetryOp::inversion()];
    let reduced = apply_chi0(
        &TestBackend,
        &reduced_context,
        &mut [reduced_block],
        &delta_v,
        &Chi0Options::default(),
    )
    .unwrap();

    for (i, (a, b)) in reduced.iter().zip(explicit.iter()).enumerate() {
        assert!(
            (a - b).abs() < 1e-8,
            "reduced and explicit samplings disagree at point {i}: {a} vs {b}"
        );
    }
}

#[test]
fn fermi_shift_stays_invariant_under_a_reduced_sampling() {
    // with orbital densities that vary across the cell, the Fermi-level
    // shift correction only matches the explicit sampling if the local
    // density of states is folded through the sample's operations too
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    // even perturbation, invariant under the symmetrization pass
    let delta_v = vec![1.1, -0.4, 0.6, -0.4];
    let options = Chi0Options {
        sternheimer_contribution: false,
        ..Chi0Options::default()
    };

    let explicit_context = metallic_context(grid, 0.5, 0.5);
    let mut explicit_blocks = vec![
        structured_block(&explicit_context, 0, [0.25, 0.0, 0.0], 0.5),
        structured_block(&explicit_context, 1, [-0.25, 0.0, 0.0], 0.5),
    ];
    let explicit = apply_chi0(
        &TestBackend,
        &explicit_context,
        &mut explicit_blocks,
        &delta_v,
        &options,
    )
    .unwrap();

    let mut reduced_context = metallic_context(grid, 0.5, 0.5);
    reduced_context.symmetry_group = vec![SymmetryOp::identity(), SymmetryOp::inversion()];
    let mut reduced_block = structured_block(&reduced_context, 0, [0.25, 0.0, 0.0], 1.0);
    reduced_block.kpoint.symmetry_ops = vec![SymmetryOp::identity(), SymmetryOp::inversion()];
    let reduced = apply_chi0(
        &TestBackend,
        &reduced_context,
        &mut [reduced_block],
        &delta_v,
        &options,
    )
    .unwrap();

    for (i, (a, b)) in reduced.iter().zip(explicit.iter()).enumerate() {
        assert!(
            (a - b).abs() < 1e-8,
            "reduced and explicit samplings disagree at point {i}: {a} vs {b}"
        );
    }
}

#[test]
fn weights_breaking_the_operation_share_are_rejected() {
    let grid = Grid3D::new(4, 1, 1, 1.0, 1.0, 1.0);
    let context = metallic_context(grid, 19.5, 2.0);
    // two identity-only samples must each carry half the quadrature
    let mut blocks = vec![
        free_electron_block(&context, 0, [0.25, 0.0, 0.0], 0.7, 4),
        free_electron_block(&context, 1, [-0.25, 0.0, 0.0], 0.3, 4),
    ];
    let delta_v = vec![0.2, -0.5, 0.4, 0.1];

    let result = apply_chi0(
        &TestBackend,
        &context,
        &mut blocks,
        &delta_v,
        &Chi0Options::default(),
    );
    match result {
        Err(Chi0Error::InconsistentWeight {
            index, ops, total, ..
        }) => {
            assert_eq!(index, 0);
            assert_eq!(ops, 1);
            assert_eq!(total, 2);
        }
        other => panic!("expected a weight-convention refusal, got {other:?}"),
    }

    let kernel = compute_chi0_kernel(&TestBackend, &context, &blocks, &Chi0Options::default());
    assert!(matches!(kernel, Err(Chi0Error::InconsistentWeight { .. })));
}
