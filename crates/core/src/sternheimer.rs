//! Preconditioned conjugate-gradient solve of the projected Sternheimer
//! system (Q(H − ε)Q) δψ = Q·rhs.
//!
//! The operator is Hermitian and positive-semidefinite on the projected
//! subspace, which is what makes CG valid here. Both the wrapped operator
//! and the preconditioner are applied through Q, so iterates never leak
//! back into the computed subspace.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backend::{copy_buffer, SpectralBackend, SpectralBuffer},
    operator::HamiltonianOperator,
    preconditioner::OperatorPreconditioner,
    projector::{OccupiedProjector, ProjectedHamiltonian},
};

/// Relative tolerances below this floor chase components smaller than the
/// numerical orthogonality error of Q itself; Q and H do not exactly
/// commute in floating point and an overtight solve converges to spurious
/// solutions. Requests are clamped.
pub const MIN_RELATIVE_TOL: f64 = 1e-13;

/// Right-hand sides with projected norm below this threshold contribute
/// nothing to the response and make the projected system ill-conditioned;
/// the solve is skipped and a zero vector returned.
pub const NEGLIGIBLE_RHS: f64 = 1e-14;

/// What to do when the iteration budget runs out before convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonConvergencePolicy {
    /// Surface a [`SternheimerError::NotConverged`] to the caller.
    Error,
    /// Log a warning and return the partial solution, flagged unconverged.
    Warn,
}

impl Default for NonConvergencePolicy {
    fn default() -> Self {
        NonConvergencePolicy::Error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SternheimerOptions {
    /// Convergence tolerance relative to ‖Q·rhs‖.
    pub tol: f64,
    pub max_iter: usize,
    pub on_nonconvergence: NonConvergencePolicy,
}

impl Default for SternheimerOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 400,
            on_nonconvergence: NonConvergencePolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct SternheimerSolution<Buf> {
    pub delta_psi: Buf,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

#[derive(Debug, Error)]
pub enum SternheimerError {
    #[error(
        "Sternheimer solve did not converge within {iterations} iterations \
         (residual {residual:.3e}, tolerance {tolerance:.3e})"
    )]
    NotConverged {
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },
    #[error("projected Sternheimer operator lost positivity (p^H A p = {curvature:.3e})")]
    IndefiniteOperator { curvature: f64 },
}

/// Solve (Q(H − ε)Q) δψ = Q·rhs for one band.
///
/// `projector` must span the whole computed orbital block at this k-point,
/// not just the occupied part, so that the solution lives entirely in the
/// unexplored complement.
pub fn solve_sternheimer<B, H, P>(
    hamiltonian: &mut H,
    projector: &OccupiedProjector<B>,
    preconditioner: &mut P,
    eigenvalue: f64,
    rhs: &B::Buffer,
    opts: &SternheimerOptions,
) -> Result<SternheimerSolution<B::Buffer>, SternheimerError>
where
    B: SpectralBackend,
    H: HamiltonianOperator<B>,
    P: OperatorPreconditioner<B>,
{
    let mut b = hamiltonian.alloc_field();
    copy_buffer(&mut b, rhs);
    projector.apply(hamiltonian.backend(), &mut b);
    let rhs_norm = hamiltonian.backend().norm(&b);

    let mut x = hamiltonian.alloc_field();
    x.as_mut_slice().fill(Complex64::default());
    if rhs_norm < NEGLIGIBLE_RHS {
        return Ok(SternheimerSolution {
            delta_psi: x,
            iterations: 0,
            residual_norm: rhs_norm,
            converged: true,
        });
    }
    let tol_abs = opts.tol.max(MIN_RELATIVE_TOL) * rhs_norm;

    let mut r = b;
    let mut z = hamiltonian.alloc_field();
    let mut ap = hamiltonian.alloc_field();
    let mut operator = ProjectedHamiltonian::new(hamiltonian, projector, eigenvalue);

    // z = Q M r (r already lies in the range of Q)
    copy_buffer(&mut z, &r);
    preconditioner.apply(operator.backend(), &mut z);
    projector.apply(operator.backend(), &mut z);
    let mut p = z.clone();
    let mut rz = operator.backend().dot(&r, &z).re;

    let mut iterations = 0;
    let mut residual = rhs_norm;
    let mut converged = false;
    while iterations < opts.max_iter {
        iterations += 1;
        operator.apply(&p, &mut ap);
        let curvature = operator.backend().dot(&p, &ap).re;
        if curvature <= 0.0 {
            return Err(SternheimerError::IndefiniteOperator { curvature });
        }
        let alpha = rz / curvature;
        {
            let backend = operator.backend();
            backend.axpy(Complex64::new(alpha, 0.0), &p, &mut x);
            backend.axpy(Complex64::new(-alpha, 0.0), &ap, &mut r);
            residual = backend.norm(&r);
        }
        if residual <= tol_abs {
            converged = true;
            break;
        }
        copy_buffer(&mut z, &r);
        preconditioner.apply(operator.backend(), &mut z);
        projector.apply(operator.backend(), &mut z);
        let rz_next = operator.backend().dot(&r, &z).re;
        let beta = rz_next / rz;
        rz = rz_next;
        {
            let backend = operator.backend();
            backend.scale(Complex64::new(beta, 0.0), &mut p);
            backend.axpy(Complex64::new(1.0, 0.0), &z, &mut p);
        }
    }

    if !converged {
        match opts.on_nonconvergence {
            NonConvergencePolicy::Error => {
                return Err(SternheimerError::NotConverged {
                    iterations,
                    residual,
                    tolerance: tol_abs,
                });
            }
            NonConvergencePolicy::Warn => {
                log::warn!(
                    "Sternheimer solve stopped at {iterations} iterations \
                     (residual {residual:.3e}, tolerance {tol_abs:.3e})"
                );
            }
        }
    }

    Ok(SternheimerSolution {
        delta_psi: x,
        iterations,
        residual_norm: residual,
        converged,
    })
}
