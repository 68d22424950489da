use dmat_core::{BlockCtrl, ComplexField, Conj, Dist, DistMatRef, DistMatrix, DistSpec, Result};

use super::solve::apply_q;

/// Computes the explicit `m × m` unitary factor `Q`.
///
/// Every process of the grid must call this function.
pub fn explicit_q<T: ComplexField>(
    qr_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let m = qr_factors.height();
    let mut q = DistMatrix::from_fn(
        m,
        m,
        qr_factors.grid(),
        DistSpec::new(Dist::Mc, Dist::Mr),
        |i, j| if i == j { T::one() } else { T::zero() },
    )?;
    apply_q(qr_factors, householder_factor, Conj::No, q.as_mut(), ctrl)?;
    Ok(q)
}

/// Computes the matrix $A = QR$ from its QR decomposition.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    qr_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let mut a = DistMatrix::redistributed_from(qr_factors, DistSpec::new(Dist::Mc, Dist::Mr))?;
    a.update_local(|i, j, value| if i <= j { value } else { T::zero() });
    apply_q(qr_factors, householder_factor, Conj::No, a.as_mut(), ctrl)?;
    Ok(a)
}
