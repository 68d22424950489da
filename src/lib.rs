//! `dmat` is a distributed dense linear algebra library: a matrix is partitioned across a 2D
//! grid of cooperating processes, and blocked factorizations operate directly on the
//! partitioned representation.
//!
//! The vocabulary types live in `dmat-core` and are re-exported here: a [`Universe`] launches
//! an SPMD program where every process receives a [`Comm`], a [`Grid`] arranges the processes
//! of a communicator in `height × width` cells, and a [`DistMatrix`] stores the entries that
//! its [`DistSpec`] assigns to each process. Views ([`DistMatRef`]/[`DistMatMut`]) select
//! blocks without copying, and [`DistMatrix::redistributed_from`] or [`redist::copy`] move
//! data between any two distributions.
//!
//! The factorization crates (`dmat-lu`, `dmat-cholesky`, `dmat-qr`, `dmat-evd`) are exposed
//! through the [`lu`], [`cholesky`], [`qr`] and [`evd`] modules. They are collective: every
//! process of the grid must call the same routine with its own view of the same matrix. The
//! [`solvers`] module wraps the most common ones in owning types.
//!
//! # Example
//! ```
//! use dmat::{prelude::*, solvers::PartialPivLu};
//!
//! let residuals = Universe::run(4, |comm| {
//!     let grid = Grid::new(&comm, 2, 2).unwrap();
//!     let spec = DistSpec::new(Dist::Mc, Dist::Mr);
//!     let a = DistMatrix::from_fn(6, 6, &grid, spec, |i, j| {
//!         if i == j {
//!             10.0
//!         } else {
//!             1.0 / (i + j + 1) as f64
//!         }
//!     })
//!     .unwrap();
//!
//!     let ctrl = BlockCtrl::for_grid(&grid).with_block_size(2);
//!     let lu = PartialPivLu::new(a.as_ref(), ctrl).unwrap();
//!     let product = lu.reconstruct().unwrap();
//!
//!     let a = a.to_local().unwrap();
//!     let product = product.to_local().unwrap();
//!     let mut residual = 0.0f64;
//!     for j in 0..6 {
//!         for i in 0..6 {
//!             residual = residual.max((a.read(i, j) - product.read(i, j)).abs());
//!         }
//!     }
//!     residual
//! });
//! assert!(residuals.iter().all(|&r| r < 1e-12));
//! ```
//!
//! # Matrix decompositions
//!
//! ## LU decomposition with partial pivoting
//! [`lu::partial_pivoting`] decomposes a matrix $A$ such that $$PA = LU,$$ where $P$ is a
//! permutation matrix, $L$ is unit lower trapezoidal and $U$ is upper trapezoidal.
//!
//! ## LU decomposition without pivoting
//! [`lu::no_pivoting`] computes $A = LU$ for matrices that do not need pivoting, such as
//! diagonally dominant ones.
//!
//! ## Cholesky decomposition
//! [`cholesky::llt`] decomposes a self-adjoint positive definite matrix such that
//! $$A = LL^H.$$
//!
//! ## LDL decomposition
//! [`cholesky::ldlt`] computes $A = LDL^H$ (or $LDL^\top$ for complex symmetric matrices),
//! where $D$ is diagonal, without pivoting.
//!
//! ## QR decomposition
//! [`qr::no_pivoting`] computes $A = QR$ with Householder reflectors, applied to the trailing
//! matrix in blocks.
//!
//! ## QR decomposition with column pivoting
//! [`qr::col_pivoting`] computes $AP = QR$, choosing the column of largest remaining norm at
//! each step. With a tolerance or a rank bound it stops early and reports the numerical rank.
//!
//! ## Hessenberg and tridiagonal reductions
//! [`evd::hessenberg`] computes $A = QHQ^H$ with $H$ upper Hessenberg, and [`evd::tridiag`]
//! reduces a self-adjoint matrix to real tridiagonal form.
//!
//! # Transports
//! [`Universe::run`] runs every process as a thread of the calling program. With the `mpi`
//! feature, `comm::MpiUniverse` runs one process per MPI rank instead.

#![warn(rust_2018_idioms)]

pub use dmat_core::{
    c32, c64, comm, dist, distmat, error, grid, householder, level3, mat, mul, panel,
    permutation, redist, reduce, solve, BlockCtrl, Comm, CommError, CommScope, ComplexField,
    Conj, Diag, Dist, DistError, DistMatMut, DistMatRef, DistMatrix, DistSpec, Grid, GridShape,
    Mat, MatMut, MatRef, PanelVariant, Parallelism, Permutation, RealField, Result, Universe,
};

pub mod solvers;

/// LU decompositions, with and without partial pivoting.
pub mod lu {
    pub use dmat_lu::*;
}

/// Cholesky and LDL decompositions of self-adjoint matrices.
pub mod cholesky {
    pub use dmat_cholesky::*;
}

/// Householder QR decompositions, with and without column pivoting.
pub mod qr {
    pub use dmat_qr::*;
}

/// Reductions used by eigenvalue solvers.
pub mod evd {
    pub use dmat_evd::*;
}

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        BlockCtrl, Comm, ComplexField, Conj, Dist, DistMatMut, DistMatRef, DistMatrix,
        DistSpec, Grid, PanelVariant, Parallelism, RealField, Universe,
    };
    pub use reborrow::*;
}
