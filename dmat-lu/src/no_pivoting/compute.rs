use assert2::assert as fancy_assert;
use core::ops::ControlFlow;

use dmat_core::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatrix},
    level3::{local_gemm, with_mc_mr},
    panel::{self, BlockCtrl, Blocks3x3, Step},
    redist,
    solve::solve_lower_triangular_in_place,
    ComplexField, Conj, Diag, MatMut, Result,
};
use reborrow::*;

/// Information about the resulting LU factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LuInfo {
    /// Index of the first pivot that was exactly zero, if any. The factorization stops there:
    /// the columns from that index onwards are left partially updated.
    pub first_zero_pivot: Option<usize>,
}

/// Unblocked LU of a replicated diagonal block. Returns the index of the first zero pivot,
/// relative to the block.
fn lu_in_place_unblocked<T: ComplexField>(mut block: MatMut<'_, T>) -> Option<usize> {
    let n = block.nrows();
    for j in 0..n {
        let pivot = block.read(j, j);
        if pivot == T::zero() {
            return Some(j);
        }
        let inv = pivot.inv();
        for i in j + 1..n {
            let l = block.read(i, j) * inv;
            block.write(i, j, l);
            for c in j + 1..n {
                let value = block.read(i, c) - l * block.read(j, c);
                block.write(i, c, value);
            }
        }
    }
    None
}

/// Computes the LU decomposition of `matrix` without pivoting, in place: `A = L U`.
///
/// The matrix must be square. `L` is unit lower triangular and is stored strictly below the
/// diagonal, `U` is stored on and above it.
///
/// Every process of the grid must call this function.
#[track_caller]
pub fn lu_in_place<T: ComplexField>(matrix: DistMatMut<'_, T>, ctrl: &BlockCtrl) -> Result<LuInfo> {
    let n = matrix.height();
    fancy_assert!(matrix.width() == n);
    let _span = tracing::debug_span!("lu_no_pivoting", n, block_size = ctrl.block_size).entered();

    let mut first_zero_pivot = None;
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, n, |Step { k, nb }, a| {
            let Blocks3x3 {
                a11,
                a12,
                a21,
                a22,
                ..
            } = panel::repartition(a, k, nb);

            let mut lu11 =
                DistMatrix::redistributed_from(a11.rb(), DistSpec::new(Dist::Star, Dist::Star))?;
            let zero = lu_in_place_unblocked(lu11.local_mut());
            redist::copy(lu11.as_ref(), a11)?;
            if let Some(j) = zero {
                tracing::debug!(pivot = k + j, "zero pivot");
                first_zero_pivot = Some(k + j);
                return Ok(ControlFlow::Break(()));
            }
            let rest = a22.height();
            if rest == 0 {
                return Ok(ControlFlow::Continue(()));
            }

            // A21 := A21 U11⁻¹, solved as U11ᵀ A21ᵀ = A21ᵀ
            let mut l21 =
                DistMatrix::redistributed_from(a21.rb(), DistSpec::new(Dist::Vc, Dist::Star))?;
            solve_lower_triangular_in_place(
                lu11.local().transpose(),
                Diag::NonUnit,
                Conj::No,
                l21.local_mut().transpose(),
                ctrl.parallelism,
            );
            // A12 := L11⁻¹ A12
            let mut u12 =
                DistMatrix::redistributed_from(a12.rb(), DistSpec::new(Dist::Star, Dist::Vr))?;
            solve_lower_triangular_in_place(
                lu11.local(),
                Diag::Unit,
                Conj::No,
                u12.local_mut(),
                ctrl.parallelism,
            );

            let l21_mc = DistMatrix::redistributed_from(
                l21.as_ref(),
                DistSpec::new(Dist::Mc, Dist::Star).with_align(a22.col_align(), 0),
            )?;
            let u12_mr = DistMatrix::redistributed_from(
                u12.as_ref(),
                DistSpec::new(Dist::Star, Dist::Mr).with_align(0, a22.row_align()),
            )?;
            redist::copy(l21.as_ref(), a21)?;
            redist::copy(u12.as_ref(), a12)?;
            local_gemm(
                a22,
                l21_mc.as_ref(),
                Conj::No,
                u12_mr.as_ref(),
                Conj::No,
                Some(T::one()),
                -T::one(),
                ctrl.parallelism,
            );
            Ok(ControlFlow::Continue(()))
        })
    })?;

    Ok(LuInfo { first_zero_pivot })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        no_pivoting::solve::{solve_in_place, solve_transpose_in_place},
        partial_pivoting::reconstruct::reconstruct_lu,
    };
    use assert_approx_eq::assert_approx_eq;
    use dmat_core::{
        c64, BlockCtrl, ComplexField, Dist, DistMatrix, DistSpec, Grid, Mat, Universe,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);

    fn diagonally_dominant(seed: u64, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut a = Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), n, n);
        for i in 0..n {
            a.write(i, i, a.read(i, i) + c64::new(2.0 * n as f64, 0.0));
        }
        a
    }

    fn distance(a: &Mat<c64>, b: &Mat<c64>) -> f64 {
        Mat::with_dims(|i, j| a.read(i, j) - b.read(i, j), a.nrows(), a.ncols()).norm_frobenius()
    }

    #[test]
    fn residuals() {
        for (h, w) in [(1, 1), (2, 2), (1, 3), (3, 1), (2, 3)] {
            for n in [1, 5, 14] {
                let a = diagonally_dominant(n as u64, n);
                Universe::run(h * w, |comm| {
                    let grid = Grid::new(&comm, h, w).unwrap();
                    let ctrl = BlockCtrl::default().with_block_size(3);
                    let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                    let info = lu_in_place(lu.as_mut(), &ctrl).unwrap();
                    assert_eq!(info.first_zero_pivot, None);

                    let product = reconstruct_lu(lu.as_ref(), &ctrl).unwrap();
                    assert!(distance(&product.to_local().unwrap(), &a) < 1e-12 * a.norm_frobenius());
                });
            }
        }
    }

    #[test]
    fn non_mc_mr_storage() {
        let a = diagonally_dominant(7, 9);
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 2, 3).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(4);
            let mut lu = DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Vr, Dist::Star))
                .unwrap();
            lu_in_place(lu.as_mut(), &ctrl).unwrap();

            let b = Mat::with_dims(|i, j| c64::new((i + j) as f64, 1.0), 9, 2);
            let mut x = DistMatrix::from_local(&b, &grid, MC_MR).unwrap();
            solve_in_place(lu.as_ref(), x.as_mut(), &ctrl).unwrap();
            let x = x.to_local().unwrap();
            for j in 0..2 {
                for i in 0..9 {
                    let mut acc = c64::zero();
                    for k in 0..9 {
                        acc = acc + a.read(i, k) * x.read(k, j);
                    }
                    assert_approx_eq!(acc.re, b.read(i, j).re, 1e-10);
                    assert_approx_eq!(acc.im, b.read(i, j).im, 1e-10);
                }
            }
        });
    }

    #[test]
    fn solve_residuals() {
        let n = 13;
        let a = diagonally_dominant(3, n);
        let b = Mat::with_dims(|i, j| c64::new(i as f64 - 2.0, (j + 1) as f64), n, 3);
        for (h, w) in [(1, 1), (2, 2), (1, 4), (4, 1)] {
            for conj in [None, Some(Conj::No), Some(Conj::Yes)] {
                Universe::run(h * w, |comm| {
                    let grid = Grid::new(&comm, h, w).unwrap();
                    let ctrl = BlockCtrl::default().with_block_size(4);
                    let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                    lu_in_place(lu.as_mut(), &ctrl).unwrap();

                    let mut x = DistMatrix::from_local(&b, &grid, MC_MR).unwrap();
                    match conj {
                        None => solve_in_place(lu.as_ref(), x.as_mut(), &ctrl).unwrap(),
                        Some(conj) => {
                            solve_transpose_in_place(lu.as_ref(), conj, x.as_mut(), &ctrl)
                                .unwrap()
                        }
                    }
                    let x = x.to_local().unwrap();

                    let op = |i: usize, k: usize| match conj {
                        None => a.read(i, k),
                        Some(Conj::No) => a.read(k, i),
                        Some(Conj::Yes) => a.read(k, i).conj(),
                    };
                    let residual = Mat::with_dims(
                        |i, j| {
                            let mut acc = c64::zero();
                            for k in 0..n {
                                acc = acc + op(i, k) * x.read(k, j);
                            }
                            acc - b.read(i, j)
                        },
                        n,
                        3,
                    );
                    assert!(residual.norm_frobenius() < 1e-12 * b.norm_frobenius() * n as f64);
                });
            }
        }
    }

    #[test]
    fn stops_at_the_first_zero_pivot() {
        // the leading 2x2 minor is singular
        let a = Mat::with_dims(
            |i, j| {
                [
                    [1.0, 2.0, 0.0, 1.0],
                    [2.0, 4.0, 1.0, 0.0],
                    [0.0, 1.0, 3.0, 1.0],
                    [1.0, 0.0, 1.0, 5.0],
                ][i][j]
            },
            4,
            4,
        );
        for block_size in [1, 2, 4] {
            Universe::run(4, |comm| {
                let grid = Grid::new(&comm, 2, 2).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(block_size);
                let mut lu = DistMatrix::<f64>::from_local(&a, &grid, MC_MR).unwrap();
                let info = lu_in_place(lu.as_mut(), &ctrl).unwrap();
                assert_eq!(info.first_zero_pivot, Some(1));
                // the first multiplier is stored
                assert_eq!(lu.get(1, 0).unwrap(), 2.0);
            });
        }
    }
}
