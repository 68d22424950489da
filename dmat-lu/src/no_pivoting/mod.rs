//! The LU decomposition without pivoting of a square matrix $A$ is such that:
//! $$A = LU,$$
//! where $L$ is a unit lower triangular matrix, and $U$ is an upper triangular matrix.
//!
//! It exists when every leading principal minor of $A$ is nonzero, e.g. for diagonally
//! dominant matrices. The factors share their storage layout with the partial pivoting
//! decomposition, so [`reconstruct_lu`](crate::partial_pivoting::reconstruct::reconstruct_lu)
//! applies to them as well.

pub mod compute;
pub mod solve;
