use dmat_core::{
    level3::{trsm_left_lower, trsm_left_upper},
    BlockCtrl, ComplexField, Conj, Diag, DistMatMut, DistMatRef, Permutation, Result,
};
use reborrow::*;

/// Given the LU factors of a square matrix $A$ computed by [`lu_in_place`], and its row
/// permutation $P$, overwrites `rhs` with the solution of $A X = B$.
///
/// Every process of the grid must call this function.
///
/// [`lu_in_place`]: crate::partial_pivoting::compute::lu_in_place
pub fn solve_in_place<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    row_perm: &Permutation,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!("lu_solve", n = lu_factors.height(), nrhs = rhs.width())
        .entered();
    row_perm.apply_rows(rhs.rb_mut())?;
    trsm_left_lower(Diag::Unit, Conj::No, lu_factors, rhs.rb_mut(), ctrl)?;
    trsm_left_upper(Diag::NonUnit, Conj::No, lu_factors, rhs, ctrl)
}

/// Same as [`solve_in_place`], but solves $\text{op}(A)^\top X = B$, where $\text{op}$
/// conjugates the entries if `conj` is [`Conj::Yes`].
pub fn solve_transpose_in_place<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    conj: Conj,
    row_perm: &Permutation,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "lu_solve_transpose",
        n = lu_factors.height(),
        nrhs = rhs.width()
    )
    .entered();
    // Aᵀ = Uᵀ Lᵀ P, where Uᵀ is stored in the lower part of the transposed view
    let transposed = lu_factors.transpose();
    trsm_left_lower(Diag::NonUnit, conj, transposed, rhs.rb_mut(), ctrl)?;
    trsm_left_upper(Diag::Unit, conj, transposed, rhs.rb_mut(), ctrl)?;
    row_perm.apply_rows_inverse(rhs)
}
