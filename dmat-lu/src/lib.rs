//! Distributed LU decompositions of dense matrices stored as `[MC, MR]`.
//!
//! Matrices in other layouts are accepted and factored through an `[MC, MR]` working copy.

#![allow(clippy::too_many_arguments)]

pub mod no_pivoting;
pub mod partial_pivoting;
