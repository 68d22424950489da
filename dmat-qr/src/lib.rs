//! Distributed Householder QR decomposition of dense matrices stored as `[MC, MR]`, or in any
//! other layout through a temporary copy.

#![allow(clippy::too_many_arguments)]

pub mod col_pivoting;
pub mod no_pivoting;
