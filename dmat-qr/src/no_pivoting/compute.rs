use core::ops::ControlFlow;

use assert2::assert as fancy_assert;
use dmat_core::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatRef, DistMatrix},
    householder::{
        make_householder_in_place, qr_in_place_unblocked, upper_triangular_factor_from_gram,
    },
    level3::{local_gemm, with_mc_mr},
    mul::matmul,
    panel::{self, BlockCtrl, PanelVariant, Step},
    redist, reduce, CommScope, ComplexField, Conj, Mat, Result,
};
use reborrow::*;

/// Householder QR of a panel stored as `[MC, STAR]`. Every norm and every reflector
/// application is reduced over the column communicator.
fn qr_in_place_distributed<T: ComplexField>(
    panel: &mut DistMatrix<T>,
    taus: &mut Vec<T>,
) -> Result<()> {
    let grid = panel.grid().clone();
    let comm = grid.col_comm();
    let nb = panel.width();
    let Some(map) = panel.col_map() else {
        unreachable!()
    };
    let local_rows = panel.local_height();

    for j in 0..nb {
        let head_row = panel.local_row(j);
        let tail_start = map.count_below(j + 1);

        let mut tail_squared_norm = <T::Real as ComplexField>::zero();
        for il in tail_start..local_rows {
            tail_squared_norm = tail_squared_norm + panel.get_local(il, j).abs2();
        }
        let head = head_row.map_or(T::zero(), |il| panel.get_local(il, j));
        let sums = comm.all_reduce_sum(vec![T::from_real(tail_squared_norm), head])?;
        let (tail_squared_norm, head) = (sums[0].real(), sums[1]);

        let mut local = panel.local_mut();
        let essential = local
            .rb_mut()
            .submatrix(tail_start, j, local_rows - tail_start, 1);
        let (tau, beta) = make_householder_in_place(Some(essential), head, tail_squared_norm);
        if let Some(il) = head_row {
            local.write(il, j, beta);
        }
        taus.push(tau);
        if j + 1 == nb || tau == T::zero() {
            continue;
        }

        // w = vᴴ A(j.., j + 1..)
        let mut w: Vec<T> = (j + 1..nb)
            .map(|c| head_row.map_or(T::zero(), |il| local.read(il, c)))
            .collect();
        for il in tail_start..local_rows {
            let v = local.read(il, j).conj();
            for c in j + 1..nb {
                w[c - j - 1] = w[c - j - 1] + v * local.read(il, c);
            }
        }
        let w = comm.all_reduce_sum(w)?;

        if let Some(il) = head_row {
            for c in j + 1..nb {
                let value = local.read(il, c) - tau * w[c - j - 1];
                local.write(il, c, value);
            }
        }
        for il in tail_start..local_rows {
            let v = local.read(il, j);
            for c in j + 1..nb {
                let value = local.read(il, c) - tau * v * w[c - j - 1];
                local.write(il, c, value);
            }
        }
    }
    Ok(())
}

/// Applies the block reflector `Q = I - V T Vᴴ` (if `conj` is [`Conj::No`]) or
/// `Qᴴ = I - V Tᴴ Vᴴ` (if `conj` is [`Conj::Yes`]) to `dst` from the left.
///
/// The essential parts of the reflectors are stored strictly below the diagonal of `basis`,
/// and their scalars in `taus`. `dst` must be distributed as `[MC, MR]`. The triangular factor
/// `T` is built from the Gram matrix `Vᴴ V`, which is reduced over the column communicator
/// along with `Vᴴ dst`.
///
/// Every process of the grid must call this function.
#[track_caller]
pub fn apply_block_reflector<T: ComplexField>(
    basis: DistMatRef<'_, T>,
    taus: &[T],
    conj: Conj,
    dst: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    let nb = basis.width();
    fancy_assert!(taus.len() == nb);
    fancy_assert!(basis.height() == dst.height());
    fancy_assert!((dst.col_dist(), dst.row_dist()) == (Dist::Mc, Dist::Mr));
    let grid = dst.grid().clone();
    let par = ctrl.parallelism;

    let mut v = DistMatrix::redistributed_from(
        basis,
        DistSpec::new(Dist::Mc, Dist::Star).with_align(dst.col_align(), 0),
    )?;
    v.update_local(|i, j, value| {
        if i == j {
            T::one()
        } else if i > j {
            value
        } else {
            T::zero()
        }
    });

    let mut gram = DistMatrix::<T>::zeros(nb, nb, &grid, DistSpec::new(Dist::Star, Dist::Star))?;
    matmul(
        gram.local_mut(),
        v.local().transpose(),
        Conj::Yes,
        v.local(),
        Conj::No,
        None,
        T::one(),
        par,
    );
    reduce::all_reduce_sum(gram.as_mut(), CommScope::Col)?;
    let mut factor = Mat::<T>::zeros(nb, nb);
    upper_triangular_factor_from_gram(factor.as_mut(), gram.local(), taus);

    let star_mr = DistSpec::new(Dist::Star, Dist::Mr).with_align(0, dst.row_align());
    let mut w = DistMatrix::<T>::zeros(nb, dst.width(), &grid, star_mr)?;
    matmul(
        w.local_mut(),
        v.local().transpose(),
        Conj::Yes,
        dst.local(),
        Conj::No,
        None,
        T::one(),
        par,
    );
    reduce::all_reduce_sum(w.as_mut(), CommScope::Col)?;

    let mut z = DistMatrix::<T>::zeros(nb, dst.width(), &grid, star_mr)?;
    let op_factor = match conj {
        Conj::No => factor.as_ref(),
        Conj::Yes => factor.as_ref().transpose(),
    };
    matmul(
        z.local_mut(),
        op_factor,
        conj,
        w.local(),
        Conj::No,
        None,
        T::one(),
        par,
    );
    local_gemm(
        dst,
        v.as_ref(),
        Conj::No,
        z.as_ref(),
        Conj::No,
        Some(T::one()),
        -T::one(),
        par,
    );
    Ok(())
}

/// Computes the QR decomposition of `matrix` in place, and returns the Householder scalars,
/// replicated on every process.
///
/// `R` is stored on and above the diagonal, and the essential parts of the Householder
/// reflectors are stored below it. The matrix `Q` is the product `H_0 H_1 … H_{k-1}`, where
/// `k = min(m, n)` and `H_i = I - tau_i v_i v_iᴴ`.
///
/// Every process of the grid must call this function.
pub fn qr_in_place<T: ComplexField>(matrix: DistMatMut<'_, T>, ctrl: &BlockCtrl) -> Result<Vec<T>> {
    let (m, n) = (matrix.height(), matrix.width());
    let size = m.min(n);
    let _span = tracing::debug_span!(
        "qr",
        m,
        n,
        block_size = ctrl.block_size,
        variant = ?ctrl.variant
    )
    .entered();

    let mut taus = Vec::with_capacity(size);
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, size, |Step { k, nb }, mut a| {
            let panel = a.rb().submatrix(k, k, m - k, nb);
            match ctrl.variant {
                PanelVariant::Distributed => {
                    let mut copy = DistMatrix::redistributed_from(
                        panel,
                        DistSpec::new(Dist::Mc, Dist::Star).with_align(panel.col_align(), 0),
                    )?;
                    qr_in_place_distributed(&mut copy, &mut taus)?;
                    redist::copy(copy.as_ref(), a.rb_mut().submatrix(k, k, m - k, nb))?;
                }
                PanelVariant::Replicated => {
                    let mut copy = DistMatrix::redistributed_from(
                        panel,
                        DistSpec::new(Dist::Star, Dist::Star),
                    )?;
                    let mut block_taus = vec![T::zero(); nb];
                    qr_in_place_unblocked(copy.local_mut(), &mut block_taus);
                    taus.extend_from_slice(&block_taus);
                    redist::copy(copy.as_ref(), a.rb_mut().submatrix(k, k, m - k, nb))?;
                }
            }

            if k + nb < n {
                let (_, _, left, right) = a.split_at(k, k + nb);
                let basis = left.rb().submatrix(0, k, m - k, nb);
                apply_block_reflector(basis, &taus[k..k + nb], Conj::Yes, right, ctrl)?;
            }
            Ok(ControlFlow::Continue(()))
        })
    })?;
    Ok(taus)
}
