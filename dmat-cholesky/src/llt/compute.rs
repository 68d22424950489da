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

/// Information about the resulting Cholesky factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LltInfo {
    /// Index of the first diagonal entry that was not strictly positive when it was reached,
    /// if any. The matrix is not positive definite, and the factorization stopped there.
    pub non_positive_pivot: Option<usize>,
}

impl LltInfo {
    #[inline]
    pub fn is_positive_definite(&self) -> bool {
        self.non_positive_pivot.is_none()
    }
}

/// Right-looking unblocked Cholesky of the lower part of a replicated diagonal block. Returns
/// the index of the first non-positive pivot, relative to the block.
fn cholesky_in_place_unblocked<T: ComplexField>(mut block: MatMut<'_, T>) -> Option<usize> {
    let n = block.nrows();
    let zero = <T::Real as ComplexField>::zero();
    for j in 0..n {
        let d = block.read(j, j).real();
        if !(d > zero) {
            return Some(j);
        }
        let d = d.sqrt();
        block.write(j, j, T::from_real(d));
        let inv = d.inv();
        for i in j + 1..n {
            let value = block.read(i, j).scale(inv);
            block.write(i, j, value);
        }
        for c in j + 1..n {
            let l_c = block.read(c, j).conj();
            for i in c..n {
                let value = block.read(i, c) - block.read(i, j) * l_c;
                block.write(i, c, value);
            }
        }
    }
    None
}

/// Computes the Cholesky factor `L` of the input matrix such that `L` is lower triangular, and
/// `L × Lᴴ == matrix`, then stores it back in the lower triangular part of the same matrix.
///
/// The input matrix is interpreted as Hermitian and only its lower triangular part is read.
/// The strictly upper triangular part is not modified.
///
/// If a non-positive pivot is encountered, the factorization stops and the index of the
/// pivot is reported in [`LltInfo::non_positive_pivot`].
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the input matrix is not square.
#[track_caller]
pub fn cholesky_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<LltInfo> {
    let n = matrix.height();
    fancy_assert!(matrix.width() == n);
    let _span = tracing::debug_span!("cholesky", n, block_size = ctrl.block_size).entered();

    let mut non_positive_pivot = None;
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, n, |Step { k, nb }, a| {
            let Blocks3x3 { a11, a21, a22, .. } = panel::repartition(a, k, nb);

            let mut l11 =
                DistMatrix::redistributed_from(a11.rb(), DistSpec::new(Dist::Star, Dist::Star))?;
            let failed = cholesky_in_place_unblocked(l11.local_mut());
            redist::copy(l11.as_ref(), a11)?;
            if let Some(j) = failed {
                tracing::debug!(pivot = k + j, "non-positive pivot");
                non_positive_pivot = Some(k + j);
                return Ok(ControlFlow::Break(()));
            }
            if a22.height() == 0 {
                return Ok(ControlFlow::Continue(()));
            }

            // A21 := A21 L11⁻ᴴ, solved as conj(L11) A21ᵀ = A21ᵀ
            let mut l21 =
                DistMatrix::redistributed_from(a21.rb(), DistSpec::new(Dist::Vc, Dist::Star))?;
            solve_lower_triangular_in_place(
                l11.local(),
                Diag::NonUnit,
                Conj::Yes,
                l21.local_mut().transpose(),
                ctrl.parallelism,
            );

            let l21_mc = DistMatrix::redistributed_from(
                l21.as_ref(),
                DistSpec::new(Dist::Mc, Dist::Star).with_align(a22.col_align(), 0),
            )?;
            let l21_mr = DistMatrix::redistributed_from(
                l21.as_ref(),
                DistSpec::new(Dist::Mr, Dist::Star).with_align(a22.row_align(), 0),
            )?;
            redist::copy(l21.as_ref(), a21)?;
            local_trrk_lower(
                a22,
                l21_mc.as_ref(),
                Conj::No,
                l21_mr.as_ref().transpose(),
                Conj::Yes,
                -T::one(),
                ctrl.parallelism,
            );
            Ok(ControlFlow::Continue(()))
        })
    })?;

    Ok(LltInfo { non_positive_pivot })
}

/// Computes the Cholesky factor `U` of the input matrix such that `U` is upper triangular, and
/// `Uᴴ × U == matrix`, then stores it back in the upper triangular part of the same matrix.
///
/// The input matrix is interpreted as Hermitian and only its upper triangular part is read.
/// The strictly lower triangular part is not modified.
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the input matrix is not square.
#[track_caller]
pub fn cholesky_upper_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<LltInfo> {
    // the lower part of the transposed view holds conj(A), whose factor L satisfies U = Lᵀ
    cholesky_in_place(matrix.transpose(), ctrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llt::{reconstruct::*, solve::*};
    use assert_approx_eq::assert_approx_eq;
    use dmat_core::{c64, BlockCtrl, ComplexField, Dist, DistMatrix, DistSpec, Grid, Mat, Universe};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);

    fn random_positive_definite(seed: u64, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let b = Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), n, n);
        Mat::with_dims(
            |i, j| {
                let mut acc = if i == j {
                    c64::new(n as f64, 0.0)
                } else {
                    c64::zero()
                };
                for k in 0..n {
                    acc = acc + b.read(i, k) * b.read(j, k).conj();
                }
                acc
            },
            n,
            n,
        )
    }

    fn distance(a: &Mat<c64>, b: &Mat<c64>) -> f64 {
        Mat::with_dims(|i, j| a.read(i, j) - b.read(i, j), a.nrows(), a.ncols()).norm_frobenius()
    }

    #[test]
    fn roundtrip() {
        for (h, w) in [(1, 1), (2, 2), (1, 3), (3, 1), (2, 3)] {
            for n in [0, 1, 7, 16] {
                let a = random_positive_definite(n as u64, n);
                Universe::run(h * w, |comm| {
                    let grid = Grid::new(&comm, h, w).unwrap();
                    let ctrl = BlockCtrl::default().with_block_size(3);
                    let mut l = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                    let info = cholesky_in_place(l.as_mut(), &ctrl).unwrap();
                    assert!(info.is_positive_definite());

                    let product = reconstruct(l.as_ref(), &ctrl).unwrap();
                    assert!(distance(&product.to_local().unwrap(), &a) < 1e-12 * (1.0 + a.norm_frobenius()));

                    // the strict upper part is left untouched
                    let l = l.to_local().unwrap();
                    for j in 0..n {
                        for i in 0..j {
                            assert_eq!(l.read(i, j), a.read(i, j));
                        }
                    }
                });
            }
        }
    }

    #[test]
    fn factor_is_grid_independent() {
        let n = 11;
        let a = random_positive_definite(3, n);
        let ctrl = BlockCtrl::default().with_block_size(4);
        let reference = Universe::run(1, |comm| {
            let grid = Grid::new(&comm, 1, 1).unwrap();
            let mut l = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            cholesky_in_place(l.as_mut(), &ctrl).unwrap();
            l.to_local().unwrap()
        });
        for (h, w) in [(2, 2), (1, 4), (4, 1)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let mut l =
                    DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Star, Dist::Vc)).unwrap();
                cholesky_in_place(l.as_mut(), &ctrl).unwrap();
                assert!(distance(&l.to_local().unwrap(), &reference[0]) < 1e-12);
            });
        }
    }

    #[test]
    fn solves() {
        let n = 9;
        let a = random_positive_definite(5, n);
        let mut rng = StdRng::seed_from_u64(6);
        let b = Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), n, 2);
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 3, 2).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(2);
            let mut l = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            cholesky_in_place(l.as_mut(), &ctrl).unwrap();

            let mut x = DistMatrix::from_local(&b, &grid, DistSpec::new(Dist::Star, Dist::Star))
                .unwrap();
            solve_in_place(l.as_ref(), x.as_mut(), &ctrl).unwrap();
            let x = x.to_local().unwrap();
            for j in 0..2 {
                for i in 0..n {
                    let mut acc = c64::zero();
                    for k in 0..n {
                        acc = acc + a.read(i, k) * x.read(k, j);
                    }
                    assert_approx_eq!(acc.re, b.read(i, j).re, 1e-10);
                    assert_approx_eq!(acc.im, b.read(i, j).im, 1e-10);
                }
            }
        });
    }

    #[test]
    fn upper_factor() {
        let n = 13;
        let a = random_positive_definite(8, n);
        let mut rng = StdRng::seed_from_u64(9);
        let b = Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), n, 3);
        for (h, w) in [(1, 1), (2, 2), (1, 4), (4, 1)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(4);
                let mut u = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                let info = cholesky_upper_in_place(u.as_mut(), &ctrl).unwrap();
                assert!(info.is_positive_definite());

                let product = reconstruct_upper(u.as_ref(), &ctrl).unwrap();
                assert!(distance(&product.to_local().unwrap(), &a) < 1e-12 * a.norm_frobenius());

                let factor = u.to_local().unwrap();
                for j in 0..n {
                    assert_eq!(factor.read(j, j).im, 0.0);
                    assert!(factor.read(j, j).re > 0.0);
                    // the strict lower part is left untouched
                    for i in j + 1..n {
                        assert_eq!(factor.read(i, j), a.read(i, j));
                    }
                }

                let mut x = DistMatrix::from_local(&b, &grid, MC_MR).unwrap();
                solve_upper_in_place(u.as_ref(), x.as_mut(), &ctrl).unwrap();
                let x = x.to_local().unwrap();
                let residual = Mat::with_dims(
                    |i, j| {
                        let mut acc = c64::zero();
                        for k in 0..n {
                            acc = acc + a.read(i, k) * x.read(k, j);
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

    #[test]
    fn non_positive_pivot_stops() {
        let n = 6;
        let mut a = Mat::<f64>::identity(n, n);
        a.write(3, 3, -1.0);
        for block_size in [1, 2, 4, 8] {
            let a = &a;
            Universe::run(4, |comm| {
                let grid = Grid::new(&comm, 2, 2).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(block_size);
                let mut l = DistMatrix::from_local(a, &grid, MC_MR).unwrap();
                let info = cholesky_in_place(l.as_mut(), &ctrl).unwrap();
                assert_eq!(info.non_positive_pivot, Some(3));
                assert!(!info.is_positive_definite());
            });
        }
    }
}
