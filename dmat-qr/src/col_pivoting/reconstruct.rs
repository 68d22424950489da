use dmat_core::{
    BlockCtrl, ComplexField, Conj, Dist, DistMatRef, DistMatrix, DistSpec, Permutation, Result,
};

use crate::no_pivoting::solve::apply_q;

/// Computes the matrix $A = QRP^\top$ from its column pivoted QR decomposition. If the
/// factorization stopped early, the trailing block stored in `qr_factors` is included as is.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    qr_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    col_perm: &Permutation,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let rank = householder_factor.len();
    let mut a = DistMatrix::redistributed_from(qr_factors, DistSpec::new(Dist::Mc, Dist::Mr))?;
    a.update_local(|i, j, value| {
        if i <= j || (i >= rank && j >= rank) {
            value
        } else {
            T::zero()
        }
    });
    apply_q(qr_factors, householder_factor, Conj::No, a.as_mut(), ctrl)?;
    col_perm.apply_rows_inverse(a.as_mut().transpose())?;
    Ok(a)
}
