//! Two-sided reductions used as the first stage of distributed eigenvalue decompositions.
//!
//! - [`hessenberg`] reduces a square matrix $A$ to upper Hessenberg form $A = QHQ^H$,
//! - [`tridiag`] reduces a hermitian matrix $A$ to hermitian tridiagonal form $A = QTQ^H$,
//!   with a real diagonal.
//!
//! In both cases $Q$ is a product of Householder reflectors whose essential parts are stored
//! below the first subdiagonal, in the same layout as the QR factors of
//! `A[1.., ..n - 1]`, so that [`dmat_qr::no_pivoting::solve::apply_q`] applies to them.

#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

use core::cmp::Ordering;
use std::sync::Arc;

use dmat_core::{
    householder::make_householder_in_place, BlockCtrl, ComplexField, Conj, Dist, DistMatRef,
    DistMatrix, DistSpec, Grid, MatMut, MatRef, Result,
};
use dmat_qr::no_pivoting::solve::apply_q;
use reborrow::*;

pub mod hessenberg;
pub mod tridiag;

/// Computes the reflector that maps `column[start..]` to `[beta; 0]`, on a column replicated
/// on every process. Writes `beta` at `start` and the essential part below it, and returns
/// `tau`.
fn reflect_tail<T: ComplexField>(column: MatMut<'_, T>, start: usize) -> T {
    let len = column.nrows();
    let (_, mut tail) = column.split_at_row(start);
    let head = tail.read(0, 0);
    let mut tail_squared_norm = <T::Real as ComplexField>::zero();
    for i in start + 1..len {
        tail_squared_norm = tail_squared_norm + tail.read(i - start, 0).abs2();
    }
    let essential = tail.rb_mut().submatrix(1, 0, len - start - 1, 1);
    let (tau, beta) = make_householder_in_place(Some(essential), head, tail_squared_norm);
    tail.write(0, 0, beta);
    tau
}

/// Stores in column `j` of `basis` the reflector whose head is at row `start` of the
/// replicated `column`, with a unit head and zeros above it.
fn store_reflector<T: ComplexField>(
    mut basis: MatMut<'_, T>,
    j: usize,
    column: MatRef<'_, T>,
    start: usize,
) {
    for i in 0..basis.nrows() {
        let value = match i.cmp(&start) {
            Ordering::Less => T::zero(),
            Ordering::Equal => T::one(),
            Ordering::Greater => column.read(i, 0),
        };
        basis.write(i, j, value);
    }
}

/// Replicated `[MC, STAR]` or `[MR, STAR]` copy of `src`, aligned on `align`.
fn spread<T: ComplexField>(
    src: MatRef<'_, T>,
    grid: &Arc<Grid>,
    dist: Dist,
    align: usize,
) -> Result<DistMatrix<T>> {
    DistMatrix::from_fn(
        src.nrows(),
        src.ncols(),
        grid,
        DistSpec::new(dist, Dist::Star).with_align(align, 0),
        |i, j| src.read(i, j),
    )
}

/// Computes the explicit `n × n` unitary matrix `Q = diag(1, Q')`, where `Q'` is given by the
/// reflectors stored below the first subdiagonal of `factors`.
fn explicit_q<T: ComplexField>(
    factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let n = factors.height();
    let mut q = DistMatrix::from_fn(
        n,
        n,
        factors.grid(),
        DistSpec::new(Dist::Mc, Dist::Mr),
        |i, j| if i == j { T::one() } else { T::zero() },
    )?;
    if n > 1 {
        apply_q(
            factors.submatrix(1, 0, n - 1, n - 1),
            householder_factor,
            Conj::No,
            q.submatrix_mut(1, 1, n - 1, n - 1),
            ctrl,
        )?;
    }
    Ok(q)
}

/// Computes `Q M Qᴴ`.
fn conjugate_by<T: ComplexField>(
    q: DistMatRef<'_, T>,
    m: DistMatRef<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let n = q.height();
    let spec = DistSpec::new(Dist::Mc, Dist::Mr);
    let mut qm = DistMatrix::zeros(n, n, q.grid(), spec)?;
    dmat_core::level3::gemm(qm.as_mut(), q, Conj::No, m, Conj::No, None, T::one(), ctrl)?;
    let mut qmqh = DistMatrix::zeros(n, n, q.grid(), spec)?;
    dmat_core::level3::gemm(
        qmqh.as_mut(),
        qm.as_ref(),
        Conj::No,
        q.transpose(),
        Conj::Yes,
        None,
        T::one(),
        ctrl,
    )?;
    Ok(qmqh)
}
