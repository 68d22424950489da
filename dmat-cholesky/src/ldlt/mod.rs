//! The $LDL^H$ decomposition of a hermitian matrix $A$ is such that:
//! $$A = LDL^H,$$
//! where $D$ is a diagonal matrix, and $L$ is a unit lower triangular matrix.
//!
//! The symmetric variant $A = LDL^\top$ is obtained by passing [`Conj::No`](dmat_core::Conj)
//! instead. No pivoting is performed, so the decomposition exists when every leading principal
//! minor of $A$ is nonzero; it does not require $A$ to be positive definite.

pub mod compute;
pub mod reconstruct;
pub mod solve;
