//! The Cholesky decomposition of a hermitian positive definite matrix $A$ is such that:
//! $$A = LL^H,$$
//! where $L$ is a lower triangular matrix.
//!
//! The diagonal block of each panel is factored redundantly as `[STAR, STAR]`, the block below
//! it is solved as `[VC, STAR]`, and the trailing matrix receives a lower triangular rank-`k`
//! update on the local buffers.

pub mod compute;
pub mod reconstruct;
pub mod solve;
