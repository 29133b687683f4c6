//! Core numerics for the independent-particle susceptibility χ0: occupation
//! smearing, projected Sternheimer solves, symmetry accumulation, and the
//! dense/matrix-free response entry points.

pub mod backend;
pub mod field;
pub mod grid;
pub mod kpoint;
pub mod operator;
pub mod preconditioner;
pub mod projector;
pub mod response;
pub mod smearing;
pub mod sternheimer;
pub mod symmetry;

#[cfg(test)]
mod _tests_response;
#[cfg(test)]
mod _tests_smearing;
