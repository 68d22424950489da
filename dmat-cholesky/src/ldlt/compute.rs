use core::ops::ControlFlow;

use assert2::assert as fancy_assert;
use dmat_core::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatrix},
    level3::{local_trrk_lower, with_mc_mr},
    panel::{self, BlockCtrl, Blocks3x3, Step},
    redist,
    solve::solve_lower_triangular_in_place,
    ComplexField, Conj, Diag, MatMut, Result,
};
use reborrow::*;

/// Information about the resulting LDL factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LdltInfo {
    /// Index of the first diagonal entry of `D` that was exactly zero, if any. The
    /// factorization stopped there.
    pub first_zero_pivot: Option<usize>,
}

/// Unblocked LDL of the lower part of a replicated diagonal block. `conj` selects between
/// `L D Lᴴ` and `L D Lᵀ`. Returns the index of the first zero pivot, relative to the block.
fn ldlt_in_place_unblocked<T: ComplexField>(mut block: MatMut<'_, T>, conj: Conj) -> Option<usize> {
    let n = block.nrows();
    let mut w = Vec::with_capacity(n);
    for j in 0..n {
        let d = match conj {
            Conj::Yes => T::from_real(block.read(j, j).real()),
            Conj::No => block.read(j, j),
        };
        if d == T::zero() {
            return Some(j);
        }
        block.write(j, j, d);

        let inv = d.inv();
        w.clear();
        for i in j + 1..n {
            let value = block.read(i, j);
            w.push(value);
            block.write(i, j, value * inv);
        }
        // A22 -= l wᵒᵖ, where w = l d
        for c in j + 1..n {
            let w_c = conj.apply(w[c - j - 1]);
            for i in c..n {
                let value = block.read(i, c) - block.read(i, j) * w_c;
                block.write(i, c, value);
            }
        }
    }
    None
}

/// Computes the `L D Lᴴ` (if `conj` is [`Conj::Yes`]) or `L D Lᵀ` (if `conj` is [`Conj::No`])
/// decomposition of the input matrix without pivoting, where `L` is unit lower triangular
/// and `D` is diagonal.
///
/// The input matrix is interpreted as Hermitian (respectively symmetric) and only its lower
/// triangular part is read. `D` overwrites the diagonal, and the strictly lower part of `L`
/// overwrites the strictly lower part of the matrix.
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the input matrix is not square.
#[track_caller]
pub fn ldlt_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    conj: Conj,
    ctrl: &BlockCtrl,
) -> Result<LdltInfo> {
    let n = matrix.height();
    fancy_assert!(matrix.width() == n);
    let _span = tracing::debug_span!("ldlt", n, ?conj, block_size = ctrl.block_size).entered();

    let mut first_zero_pivot = None;
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, n, |Step { k, nb }, a| {
            let Blocks3x3 { a11, a21, a22, .. } = panel::repartition(a, k, nb);

            let mut ld11 =
                DistMatrix::redistributed_from(a11.rb(), DistSpec::new(Dist::Star, Dist::Star))?;
            let failed = ldlt_in_place_unblocked(ld11.local_mut(), conj);
            redist::copy(ld11.as_ref(), a11)?;
            if let Some(j) = failed {
                tracing::debug!(pivot = k + j, "zero pivot");
                first_zero_pivot = Some(k + j);
                return Ok(ControlFlow::Break(()));
            }
            if a22.height() == 0 {
                return Ok(ControlFlow::Continue(()));
            }

            // W := A21 L11⁻ᵒᵖ, solved as op(L11) Wᵀ = A21ᵀ
            let mut w21 =
                DistMatrix::redistributed_from(a21.rb(), DistSpec::new(Dist::Vc, Dist::Star))?;
            solve_lower_triangular_in_place(
                ld11.local(),
                Diag::Unit,
                conj,
                w21.local_mut().transpose(),
                ctrl.parallelism,
            );
            let w21_mr = DistMatrix::redistributed_from(
                w21.as_ref(),
                DistSpec::new(Dist::Mr, Dist::Star).with_align(a22.row_align(), 0),
            )?;

            // L21 := W D11⁻¹
            let inv_d: Vec<T> = (0..nb).map(|c| ld11.local().read(c, c).inv()).collect();
            let mut l21 = w21;
            l21.update_local(|_, j, value| value * inv_d[j]);
            let l21_mc = DistMatrix::redistributed_from(
                l21.as_ref(),
                DistSpec::new(Dist::Mc, Dist::Star).with_align(a22.col_align(), 0),
            )?;
            redist::copy(l21.as_ref(), a21)?;

            local_trrk_lower(
                a22,
                l21_mc.as_ref(),
                Conj::No,
                w21_mr.as_ref().transpose(),
                conj,
                -T::one(),
                ctrl.parallelism,
            );
            Ok(ControlFlow::Continue(()))
        })
    })?;

    Ok(LdltInfo { first_zero_pivot })
}
