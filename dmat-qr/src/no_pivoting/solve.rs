use dmat_core::{
    error::DistError,
    grid::ensure_same_grid,
    level3::{trsm_left_upper, with_mc_mr},
    panel::Sweep,
    BlockCtrl, ComplexField, Conj, Diag, DistMatMut, DistMatRef, Result,
};
use reborrow::*;

use super::compute::apply_block_reflector;

/// Overwrites `rhs` with `Q rhs` (if `conj` is [`Conj::No`]) or `Qᴴ rhs` (if `conj` is
/// [`Conj::Yes`]), where `Q` is given by the Householder reflectors stored below the diagonal
/// of `qr_factors` and their scalars `householder_factor`.
///
/// Every process of the grid must call this function.
pub fn apply_q<T: ComplexField>(
    qr_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    conj: Conj,
    rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    ensure_same_grid(qr_factors.grid(), rhs.grid(), "apply_q")?;
    let m = qr_factors.height();
    let size = householder_factor.len();
    if rhs.height() != m || size > m.min(qr_factors.width()) {
        return Err(DistError::ShapeMismatch {
            op: "apply_q",
            expected: (m, size),
            got: (rhs.height(), householder_factor.len()),
        });
    }
    let _span = tracing::debug_span!("apply_q", m, nrhs = rhs.width(), ?conj).entered();

    with_mc_mr(rhs, true, |mut rhs| {
        let nrhs = rhs.width();
        // Q = H_0 … H_{k-1}, so Qᴴ applies the first block first
        let sweep = match conj {
            Conj::Yes => Sweep::forward(size, ctrl.block_size),
            Conj::No => Sweep::backward(size, ctrl.block_size),
        };
        for step in sweep {
            let (k, nb) = (step.k, step.nb);
            apply_block_reflector(
                qr_factors.submatrix(k, k, m - k, nb),
                &householder_factor[k..k + nb],
                conj,
                rhs.rb_mut().submatrix(k, 0, m - k, nrhs),
                ctrl,
            )?;
        }
        Ok(())
    })
}

/// Given the QR factors of an `m × n` matrix $A$ with `m >= n`, overwrites the first `n` rows
/// of `rhs` with the least squares solution of $A X = B$. The remaining rows hold the
/// components of `Qᴴ B` that lie outside the range of $A$.
///
/// Every process of the grid must call this function.
pub fn solve_in_place<T: ComplexField>(
    qr_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    mut rhs: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let (m, n) = (qr_factors.height(), qr_factors.width());
    if m < n || householder_factor.len() != n {
        return Err(DistError::ShapeMismatch {
            op: "qr_solve",
            expected: (m.max(n), n),
            got: (m, householder_factor.len()),
        });
    }
    apply_q(qr_factors, householder_factor, Conj::Yes, rhs.rb_mut(), ctrl)?;
    let nrhs = rhs.width();
    trsm_left_upper(
        Diag::NonUnit,
        Conj::No,
        qr_factors.submatrix(0, 0, n, n),
        rhs.submatrix(0, 0, n, nrhs),
        ctrl,
    )
}
