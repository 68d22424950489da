//! Distributed Cholesky and LDL decompositions of Hermitian matrices stored as `[MC, MR]`, or
//! in any other layout through a temporary copy.
//!
//! Only the lower triangular part of the input is read, and the factors overwrite it.

#![allow(clippy::too_many_arguments)]

pub mod ldlt;
pub mod llt;
