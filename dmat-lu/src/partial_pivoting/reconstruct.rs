use dmat_core::{
    level3::gemm, BlockCtrl, ComplexField, Conj, Dist, DistMatRef, DistMatrix, DistSpec,
    Permutation, Result,
};

const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);

/// Returns the unit lower trapezoidal factor `L` (`m × min(m, n)`) and the upper trapezoidal
/// factor `U` (`min(m, n) × n`) stored in `lu_factors`, as `[MC, MR]` matrices.
pub fn split_factors<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
) -> Result<(DistMatrix<T>, DistMatrix<T>)> {
    let (m, n) = (lu_factors.height(), lu_factors.width());
    let size = m.min(n);

    let mut l = DistMatrix::redistributed_from(lu_factors.submatrix(0, 0, m, size), MC_MR)?;
    l.update_local(|i, j, value| {
        if i == j {
            T::one()
        } else if i > j {
            value
        } else {
            T::zero()
        }
    });
    let mut u = DistMatrix::redistributed_from(lu_factors.submatrix(0, 0, size, n), MC_MR)?;
    u.update_local(|i, j, value| if i <= j { value } else { T::zero() });
    Ok((l, u))
}

/// Computes the product $LU$ of the factors stored in `lu_factors`, i.e. $PA$.
///
/// Every process of the grid must call this function.
pub fn reconstruct_lu<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let (l, u) = split_factors(lu_factors)?;
    let mut product = DistMatrix::zeros(
        lu_factors.height(),
        lu_factors.width(),
        lu_factors.grid(),
        MC_MR,
    )?;
    gemm(
        product.as_mut(),
        l.as_ref(),
        Conj::No,
        u.as_ref(),
        Conj::No,
        None,
        T::one(),
        ctrl,
    )?;
    Ok(product)
}

/// Computes the matrix $A = P^\top L U$ from its partial pivoting LU decomposition.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    lu_factors: DistMatRef<'_, T>,
    row_perm: &Permutation,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let mut product = reconstruct_lu(lu_factors, ctrl)?;
    row_perm.apply_rows_inverse(product.as_mut())?;
    Ok(product)
}
