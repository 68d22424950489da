use dmat_core::{
    level3::{trsm_left_lower, trsm_left_upper},
    BlockCtrl, ComplexField, Conj, Diag, DistMatMut, DistMatRef, Result,
};
use reborrow::*;

/// Given the LU factors of a square matrix $A$ computed by [`lu_in_place`], overwrites `rhs`
/// with the solution of $A X = B$.
///
/// Every process of the grid must call this function.
///
/// [`lu_in_place`]: crate::no_pivoting::compute::lu_in_place
pub fn solve_in_place<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "lu_no_pivoting_solve",
        n = lu_factors.height(),
        nrhs = rhs.width()
    )
    .entered();
    trsm_left_lower(Diag::Unit, Conj::No, lu_factors, rhs.rb_mut(), ctrl)?;
    trsm_left_upper(Diag::NonUnit, Conj::No, lu_factors, rhs, ctrl)
}

/// Same as [`solve_in_place`], but solves $\text{op}(A)^\top X = B$, where $\text{op}$
/// conjugates the entries if `conj` is [`Conj::Yes`].
pub fn solve_transpose_in_place<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    conj: Conj,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "lu_no_pivoting_solve_transpose",
        n = lu_factors.height(),
        nrhs = rhs.width()
    )
    .entered();
    let transposed = lu_factors.transpose();
    trsm_left_lower(Diag::NonUnit, conj, transposed, rhs.rb_mut(), ctrl)?;
    trsm_left_upper(Diag::Unit, conj, transposed, rhs, ctrl)
}
