//! The partial pivoting LU decomposition is such that:
//! $$PA = LU,$$
//! where $P$ is a permutation matrix, $L$ is a unit lower triangular matrix, and $U$ is
//! an upper triangular matrix.
//!
//! At each step, the pivot of a column is the entry of largest magnitude on or below the
//! diagonal, with ties resolved in favor of the lowest global row. Since the candidates are
//! gathered over the column communicator and reduced identically everywhere, every process
//! records the same permutation.

pub mod compute;
pub mod reconstruct;
pub mod solve;
