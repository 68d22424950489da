//! The QR decomposition decomposes a matrix $A$ into the product
//! $$A = QR,$$
//! where $Q$ is a unitary matrix (represented as a sequence of Householder reflectors), and
//! $R$ is an upper trapezoidal matrix.
//!
//! The reflectors of each panel are aggregated into the compact WY form
//! $I - V T V^H$, so that the trailing matrix is updated with local Level-3 products and two
//! reductions over the column communicator.

pub mod compute;
pub mod reconstruct;
pub mod solve;
