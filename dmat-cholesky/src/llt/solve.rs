use dmat_core::{
    level3::{trsm_left_lower, trsm_left_upper},
    BlockCtrl, ComplexField, Conj, Diag, DistMatMut, DistMatRef, Result,
};
use reborrow::*;

/// Given the Cholesky factor of a matrix $A$ and a matrix $B$ stored in `rhs`, overwrites
/// `rhs` with the solution of $A X = B$.
///
/// The strictly upper triangular part of `cholesky_factor` is not accessed.
///
/// Every process of the grid must call this function.
pub fn solve_in_place<T: ComplexField>(
    cholesky_factor: DistMatRef<'_, T>,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "cholesky_solve",
        n = cholesky_factor.height(),
        nrhs = rhs.width()
    )
    .entered();
    trsm_left_lower(Diag::NonUnit, Conj::No, cholesky_factor, rhs.rb_mut(), ctrl)?;
    // Lᴴ is the conjugate of the upper triangular part of the transposed view
    trsm_left_upper(
        Diag::NonUnit,
        Conj::Yes,
        cholesky_factor.transpose(),
        rhs,
        ctrl,
    )
}

/// Given the upper Cholesky factor $U$ of a matrix $A = U^H U$ computed by
/// [`cholesky_upper_in_place`], overwrites `rhs` with the solution of $A X = B$.
///
/// The strictly lower triangular part of `cholesky_factor` is not accessed.
///
/// [`cholesky_upper_in_place`]: super::compute::cholesky_upper_in_place
pub fn solve_upper_in_place<T: ComplexField>(
    cholesky_factor: DistMatRef<'_, T>,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "cholesky_upper_solve",
        n = cholesky_factor.height(),
        nrhs = rhs.width()
    )
    .entered();
    trsm_left_lower(
        Diag::NonUnit,
        Conj::Yes,
        cholesky_factor.transpose(),
        rhs.rb_mut(),
        ctrl,
    )?;
    trsm_left_upper(Diag::NonUnit, Conj::No, cholesky_factor, rhs, ctrl)
}
