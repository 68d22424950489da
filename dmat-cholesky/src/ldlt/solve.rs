use dmat_core::{
    level3::{trsm_left_lower, trsm_left_upper},
    BlockCtrl, ComplexField, Conj, Diag, DistMatMut, DistMatRef, Result,
};
use reborrow::*;

use super::reconstruct::diagonal;

/// Given the factors computed by [`ldlt_in_place`] with the same `conj`, overwrites `rhs` with
/// the solution of $A X = B$, where $A = L D L^H$ if `conj` is [`Conj::Yes`], and
/// $A = L D L^\top$ otherwise.
///
/// The strictly upper triangular part of `ldlt_factors` is not accessed.
///
/// Every process of the grid must call this function.
///
/// [`ldlt_in_place`]: super::compute::ldlt_in_place
pub fn solve_in_place<T: ComplexField>(
    ldlt_factors: DistMatRef<'_, T>,
    conj: Conj,
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let _span = tracing::debug_span!(
        "ldlt_solve",
        n = ldlt_factors.height(),
        nrhs = rhs.width(),
        ?conj
    )
    .entered();
    trsm_left_lower(Diag::Unit, Conj::No, ldlt_factors, rhs.rb_mut(), ctrl)?;

    let inv_d: Vec<T> = diagonal(ldlt_factors)?.into_iter().map(T::inv).collect();
    rhs.update_local(|i, _, value| value * inv_d[i]);

    trsm_left_upper(Diag::Unit, conj, ldlt_factors.transpose(), rhs, ctrl)
}
