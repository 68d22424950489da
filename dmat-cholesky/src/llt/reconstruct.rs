use dmat_core::{
    level3::gemm, BlockCtrl, ComplexField, Conj, Dist, DistMatRef, DistMatrix, DistSpec, Result,
};

/// Computes $L L^H$ from the Cholesky factor stored in the lower triangular part of
/// `cholesky_factor`. The result is a full Hermitian `[MC, MR]` matrix.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    cholesky_factor: DistMatRef<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let spec = DistSpec::new(Dist::Mc, Dist::Mr);
    let mut l = DistMatrix::redistributed_from(cholesky_factor, spec)?;
    l.update_local(|i, j, value| if i >= j { value } else { T::zero() });

    let n = cholesky_factor.height();
    let mut product = DistMatrix::zeros(n, n, cholesky_factor.grid(), spec)?;
    gemm(
        product.as_mut(),
        l.as_ref(),
        Conj::No,
        l.as_ref().transpose(),
        Conj::Yes,
        None,
        T::one(),
        ctrl,
    )?;
    Ok(product)
}

/// Computes $U^H U$ from the Cholesky factor stored in the upper triangular part of
/// `cholesky_factor`. The result is a full Hermitian `[MC, MR]` matrix.
pub fn reconstruct_upper<T: ComplexField>(
    cholesky_factor: DistMatRef<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let spec = DistSpec::new(Dist::Mc, Dist::Mr);
    let mut u = DistMatrix::redistributed_from(cholesky_factor, spec)?;
    u.update_local(|i, j, value| if i <= j { value } else { T::zero() });

    let n = cholesky_factor.height();
    let mut product = DistMatrix::zeros(n, n, cholesky_factor.grid(), spec)?;
    gemm(
        product.as_mut(),
        u.as_ref().transpose(),
        Conj::Yes,
        u.as_ref(),
        Conj::No,
        None,
        T::one(),
        ctrl,
    )?;
    Ok(product)
}
