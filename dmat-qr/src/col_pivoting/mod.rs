//! The QR decomposition with column pivoting decomposes a matrix $A$ into the product
//! $$AP = QR,$$
//! where $P$ is a permutation matrix, $Q$ is a unitary matrix (represented as a sequence of
//! Householder reflectors), and $R$ is an upper trapezoidal matrix whose diagonal entries are
//! non-increasing in modulus.
//!
//! At each step the remaining column of largest norm is moved to the front. The column norms
//! are replicated on every process and downdated after each reflector, and recomputed with one
//! reduction over the grid when the downdate loses accuracy. The factorization can stop early
//! once the remaining columns fall below a tolerance, or after a given number of steps, which
//! yields the numerical rank of $A$.

pub mod compute;
pub mod reconstruct;
