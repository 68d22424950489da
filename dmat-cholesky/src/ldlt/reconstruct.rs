use dmat_core::{
    level3::gemm, BlockCtrl, ComplexField, Conj, Dist, DistMatRef, DistMatrix, DistSpec, Result,
};

/// Returns the diagonal of `D` from the factors computed by
/// [`ldlt_in_place`](super::compute::ldlt_in_place), replicated on every process.
pub fn diagonal<T: ComplexField>(ldlt_factors: DistMatRef<'_, T>) -> Result<Vec<T>> {
    let d = ldlt_factors.diagonal(0)?.to_local()?;
    Ok((0..d.nrows()).map(|i| d.read(i, 0)).collect())
}

/// Computes $L D L^H$ (if `conj` is [`Conj::Yes`]) or $L D L^\top$ (if `conj` is
/// [`Conj::No`]) from the factors stored in `ldlt_factors`. The result is a full `[MC, MR]`
/// matrix.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    ldlt_factors: DistMatRef<'_, T>,
    conj: Conj,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let spec = DistSpec::new(Dist::Mc, Dist::Mr);
    let d = diagonal(ldlt_factors)?;

    let mut l = DistMatrix::redistributed_from(ldlt_factors, spec)?;
    l.update_local(|i, j, value| {
        if i == j {
            T::one()
        } else if i > j {
            value
        } else {
            T::zero()
        }
    });
    let mut ld = DistMatrix::redistributed_from(l.as_ref(), spec)?;
    ld.update_local(|_, j, value| value * d[j]);

    let n = ldlt_factors.height();
    let mut product = DistMatrix::zeros(n, n, ldlt_factors.grid(), spec)?;
    gemm(
        product.as_mut(),
        ld.as_ref(),
        Conj::No,
        l.as_ref().transpose(),
        conj,
        None,
        T::one(),
        ctrl,
    )?;
    Ok(product)
}
