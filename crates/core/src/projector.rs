//! Orthogonal-complement projector for the computed orbital subspace.

use num_complex::Complex64;

use crate::{
    backend::{copy_buffer, SpectralBackend},
    operator::HamiltonianOperator,
};

/// Q = I − ΨΨ^H for the orthonormal orbital block Ψ at one k-point.
///
/// A single application only guarantees orthogonality of its own output;
/// any operator wrapped by Q must be applied as QAQ, since A does not
/// commute with Q and would leak components back into the subspace.
pub struct OccupiedProjector<'a, B: SpectralBackend> {
    orbitals: &'a [B::Buffer],
}

impl<'a, B: SpectralBackend> OccupiedProjector<'a, B> {
    pub fn new(orbitals: &'a [B::Buffer]) -> Self {
        Self { orbitals }
    }

    pub fn len(&self) -> usize {
        self.orbitals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orbitals.is_empty()
    }

    /// buffer ← buffer − Σ_i ψ_i ⟨ψ_i, buffer⟩
    pub fn apply(&self, backend: &B, buffer: &mut B::Buffer) {
        for orbital in self.orbitals {
            let overlap = backend.dot(orbital, buffer);
            backend.axpy(-overlap, orbital, buffer);
        }
    }
}

/// The composed projected operator Q(H − ε)Q used by the Sternheimer solve.
///
/// Composing once, rather than reapplying Q by convention at every call
/// site, makes the orthogonality invariant structural.
pub struct ProjectedHamiltonian<'a, B, H>
where
    B: SpectralBackend,
    H: HamiltonianOperator<B>,
{
    hamiltonian: &'a mut H,
    projector: &'a OccupiedProjector<'a, B>,
    eigenvalue: f64,
    scratch: B::Buffer,
}

impl<'a, B, H> ProjectedHamiltonian<'a, B, H>
where
    B: SpectralBackend,
    H: HamiltonianOperator<B>,
{
    pub fn new(
        hamiltonian: &'a mut H,
        projector: &'a OccupiedProjector<'a, B>,
        eigenvalue: f64,
    ) -> Self {
        let scratch = hamiltonian.alloc_field();
        Self {
            hamiltonian,
            projector,
            eigenvalue,
            scratch,
        }
    }

    pub fn apply(&mut self, input: &B::Buffer, output: &mut B::Buffer) {
        copy_buffer(&mut self.scratch, input);
        self.projector
            .apply(self.hamiltonian.backend(), &mut self.scratch);
        self.hamiltonian.apply(&self.scratch, output);
        let backend = self.hamiltonian.backend();
        backend.axpy(
            Complex64::new(-self.eigenvalue, 0.0),
            &self.scratch,
            output,
        );
        self.projector.apply(backend, output);
    }

    pub fn backend(&self) -> &B {
        self.hamiltonian.backend()
    }

    pub fn alloc_field(&self) -> B::Buffer {
        self.hamiltonian.alloc_field()
    }
}
