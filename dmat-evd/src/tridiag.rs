//! The tridiagonal decomposition of a hermitian matrix $A$ is such that:
//! $$A = QTQ^H,$$
//! where $T$ is a hermitian tridiagonal matrix with a real diagonal, and $Q$ is a unitary
//! matrix.
//!
//! Only the lower triangular part of $A$ is read and updated. The reduction runs over panels
//! of `block_size` columns, keeping the pending two-sided update as `A - V Wᴴ - W Vᴴ`. Each
//! column of a panel is gathered on every process and receives that update before its
//! reflector is computed, and the matching column of `W` needs one product with the trailing
//! matrix, reduced over the grid. Once the panel is done, the trailing matrix receives the
//! rank-`2 nb` update as two lower triangular local products.

use core::ops::ControlFlow;
use std::sync::Arc;

use assert2::assert as fancy_assert;
use dmat_core::{
    level3::{local_trrk_lower, with_mc_mr},
    mul::matmul,
    panel::{self, Step},
    redist, BlockCtrl, ComplexField, Conj, Dist, DistMatMut, DistMatRef, DistMatrix, DistSpec,
    Grid, Mat, MatMut, MatRef, Parallelism, Result,
};
use reborrow::*;

use crate::{reflect_tail, spread, store_reflector};

/// Diagonal, subdiagonal and Householder scalars of a tridiagonal decomposition, replicated on
/// every process.
#[derive(Clone, Debug)]
pub struct Tridiagonal<T: ComplexField> {
    pub diag: Vec<T::Real>,
    pub subdiag: Vec<T>,
    pub householder_factor: Vec<T>,
}

impl<T: ComplexField> Tridiagonal<T> {
    /// Returns `T` as a dense `[MC, MR]` matrix.
    pub fn to_dist_matrix(&self, grid: &Arc<Grid>) -> Result<DistMatrix<T>> {
        let n = self.diag.len();
        DistMatrix::from_fn(n, n, grid, DistSpec::new(Dist::Mc, Dist::Mr), |i, j| {
            if i == j {
                T::from_real(self.diag[i])
            } else if i == j + 1 {
                self.subdiag[j]
            } else if j == i + 1 {
                self.subdiag[i].conj()
            } else {
                T::zero()
            }
        })
    }
}

/// Replicated state of the panel being reduced, with a row for each row of `A`.
struct PanelState<T> {
    basis: Mat<T>,
    w: Mat<T>,
}

impl<T: ComplexField> PanelState<T> {
    fn new(n: usize, nb: usize) -> Self {
        Self {
            basis: Mat::zeros(n, nb),
            w: Mat::zeros(n, nb),
        }
    }

    /// `c -= V W[col, ..]ᴴ + W V[col, ..]ᴴ` over the first `j` columns, where `c` holds the
    /// rows `col..` of column `col`.
    fn update_column(&self, j: usize, col: usize, mut c: MatMut<'_, T>, par: Parallelism) {
        if j == 0 {
            return;
        }
        let m = c.nrows();
        let (basis, w) = (self.basis.as_ref(), self.w.as_ref());
        matmul(
            c.rb_mut(),
            basis.submatrix(col, 0, m, j),
            Conj::No,
            w.submatrix(col, 0, 1, j).transpose(),
            Conj::Yes,
            Some(T::one()),
            -T::one(),
            par,
        );
        matmul(
            c,
            w.submatrix(col, 0, m, j),
            Conj::No,
            basis.submatrix(col, 0, 1, j).transpose(),
            Conj::Yes,
            Some(T::one()),
            -T::one(),
            par,
        );
    }

    /// Computes the `j`-th column of `W` from the reflector stored in `basis`, whose head is
    /// at row `col + 1`: `w = tau p - (tau² / 2)(vᴴ p) v`, with `p` the product of `v` and the
    /// updated trailing matrix.
    fn push(
        &mut self,
        j: usize,
        col: usize,
        tau: T,
        a: DistMatRef<'_, T>,
        par: Parallelism,
    ) -> Result<()> {
        let start = col + 1;
        let m = self.basis.nrows() - start;
        let v = self.basis.as_ref().submatrix(start, j, m, 1);

        let av = hermitian_times_replicated(a, v, start)?;
        let mut p = Mat::with_dims(|i, _| av[i], m, 1);
        if j > 0 {
            let basis = self.basis.as_ref().submatrix(start, 0, m, j);
            let w = self.w.as_ref().submatrix(start, 0, m, j);
            let mut tmp = Mat::zeros(j, 1);
            matmul(tmp.as_mut(), w.transpose(), Conj::Yes, v, Conj::No, None, T::one(), par);
            let (one, minus_one) = (Some(T::one()), -T::one());
            matmul(p.as_mut(), basis, Conj::No, tmp.as_ref(), Conj::No, one, minus_one, par);
            matmul(tmp.as_mut(), basis.transpose(), Conj::Yes, v, Conj::No, None, T::one(), par);
            matmul(p.as_mut(), w, Conj::No, tmp.as_ref(), Conj::No, one, minus_one, par);
        }

        let mut vh_p = T::zero();
        for i in 0..m {
            vh_p = vh_p + v.read(i, 0).conj() * p.read(i, 0);
        }
        let scale = tau * tau * T::from_real(vh_p.real()) * T::from_f64(0.5);
        for i in 0..m {
            let value = tau * p.read(i, 0) - scale * v.read(i, 0);
            self.w.write(start + i, j, value);
        }
        Ok(())
    }
}

/// `A[start.., start..] v` for a vector `v` replicated on every process, where `A` is
/// hermitian and only its lower part is read. Every stored entry is owned by exactly one
/// process, so a single reduction over the grid completes the product.
fn hermitian_times_replicated<T: ComplexField>(
    a: DistMatRef<'_, T>,
    v: MatRef<'_, T>,
    start: usize,
) -> Result<Vec<T>> {
    let mut p = vec![T::zero(); a.height() - start];
    if let (Some(cmap), Some(rmap)) = (a.col_map(), a.row_map()) {
        let local = a.local();
        for jl in 0..local.ncols() {
            let k = rmap.global(jl);
            if k < start {
                continue;
            }
            for il in 0..local.nrows() {
                let i = cmap.global(il);
                if i < k {
                    continue;
                }
                let x = local.read(il, jl);
                p[i - start] = p[i - start] + x * v.read(k - start, 0);
                if i > k {
                    p[k - start] = p[k - start] + x.conj() * v.read(i - start, 0);
                }
            }
        }
    }
    Ok(a.grid().comm().all_reduce_sum(p)?)
}

/// Computes the tridiagonal decomposition of the hermitian matrix `matrix` in place.
///
/// On exit, the diagonal and first subdiagonal of `matrix` hold those of `T`, and the
/// essential parts of the reflectors are stored below the subdiagonal. The strictly upper
/// triangular part is not accessed.
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the input matrix is not square.
#[track_caller]
pub fn tridiagonalize_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<Tridiagonal<T>> {
    let n = matrix.height();
    fancy_assert!(matrix.width() == n);
    let _span = tracing::debug_span!("tridiagonalize", n, block_size = ctrl.block_size).entered();

    let size = n.saturating_sub(1);
    let par = ctrl.parallelism;
    let mut householder_factor = Vec::with_capacity(size);
    let mut diag = Vec::with_capacity(n);
    let mut subdiag = Vec::with_capacity(size);
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, size, |Step { k, nb }, mut a| {
            let grid = a.grid().clone();
            let mut state = PanelState::new(n, nb);
            for j in 0..nb {
                let col = k + j;
                let mut x = DistMatrix::redistributed_from(
                    a.rb().submatrix(col, col, n - col, 1),
                    DistSpec::new(Dist::Star, Dist::Star),
                )?;
                state.update_column(j, col, x.local_mut(), par);
                let mut c = x.local_mut();
                let d = c.read(0, 0).real();
                c.write(0, 0, T::from_real(d));
                let tau = reflect_tail(c, 1);
                redist::copy(x.as_ref(), a.rb_mut().submatrix(col, col, n - col, 1))?;
                store_reflector(
                    state.basis.as_mut().submatrix(col, 0, n - col, nb),
                    j,
                    x.local(),
                    1,
                );
                householder_factor.push(tau);
                state.push(j, col, tau, a.rb(), par)?;
            }

            // A22 -= V Wᴴ + W Vᴴ on the lower part
            let rest = n - k - nb;
            let mut a22 = a.submatrix(k + nb, k + nb, rest, rest);
            let (col_align, row_align) = (a22.col_align(), a22.row_align());
            let basis = state.basis.as_ref().submatrix(k + nb, 0, rest, nb);
            let w = state.w.as_ref().submatrix(k + nb, 0, rest, nb);
            let v_mc = spread(basis, &grid, Dist::Mc, col_align)?;
            let v_mr = spread(basis, &grid, Dist::Mr, row_align)?;
            let w_mc = spread(w, &grid, Dist::Mc, col_align)?;
            let w_mr = spread(w, &grid, Dist::Mr, row_align)?;
            local_trrk_lower(
                a22.rb_mut(),
                v_mc.as_ref(),
                Conj::No,
                w_mr.as_ref().transpose(),
                Conj::Yes,
                -T::one(),
                par,
            );
            local_trrk_lower(
                a22,
                w_mc.as_ref(),
                Conj::No,
                v_mr.as_ref().transpose(),
                Conj::Yes,
                -T::one(),
                par,
            );
            Ok(ControlFlow::Continue(()))
        })?;

        let d = matrix.rb().diagonal(0)?.to_local()?;
        diag.extend((0..d.nrows()).map(|i| d.read(i, 0).real()));
        let e = matrix.rb().diagonal(-1)?.to_local()?;
        subdiag.extend((0..e.nrows()).map(|i| e.read(i, 0)));
        Ok(())
    })?;

    Ok(Tridiagonal {
        diag,
        subdiag,
        householder_factor,
    })
}

/// Computes the explicit unitary factor `Q` of the tridiagonal decomposition.
///
/// Every process of the grid must call this function.
pub fn explicit_q<T: ComplexField>(
    tridiagonal_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    crate::explicit_q(tridiagonal_factors, householder_factor, ctrl)
}

/// Computes the matrix $A = QTQ^H$ from its tridiagonal decomposition.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    tridiagonal_factors: DistMatRef<'_, T>,
    tridiagonal: &Tridiagonal<T>,
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let q = explicit_q(
        tridiagonal_factors,
        &tridiagonal.householder_factor,
        ctrl,
    )?;
    let t = tridiagonal.to_dist_matrix(tridiagonal_factors.grid())?;
    crate::conjugate_by(q.as_ref(), t.as_ref(), ctrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use dmat_core::{c64, Grid, Mat, Universe};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_hermitian(seed: u64, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut a = Mat::<c64>::zeros(n, n);
        for j in 0..n {
            for i in j..n {
                let value = if i == j {
                    c64::new(rng.gen::<f64>() - 0.5, 0.0)
                } else {
                    c64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
                };
                a.write(i, j, value);
                a.write(j, i, value.conj());
            }
        }
        a
    }

    fn distance(a: &Mat<c64>, b: &Mat<c64>) -> f64 {
        Mat::with_dims(|i, j| a.read(i, j) - b.read(i, j), a.nrows(), a.ncols()).norm_frobenius()
    }

    #[test]
    fn roundtrip() {
        for (h, w) in [(1, 1), (2, 2), (1, 3), (3, 1), (2, 3)] {
            for n in [0, 1, 2, 11] {
                let a = random_hermitian(n as u64, n);
                Universe::run(h * w, |comm| {
                    let grid = Grid::new(&comm, h, w).unwrap();
                    let ctrl = BlockCtrl::default().with_block_size(4);
                    let mut factors =
                        DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Mc, Dist::Mr))
                            .unwrap();
                    let tridiagonal = tridiagonalize_in_place(factors.as_mut(), &ctrl).unwrap();
                    assert_eq!(tridiagonal.diag.len(), n);
                    assert_eq!(tridiagonal.subdiag.len(), n.saturating_sub(1));
                    assert_eq!(tridiagonal.householder_factor.len(), n.saturating_sub(1));

                    let product = reconstruct(factors.as_ref(), &tridiagonal, &ctrl).unwrap();
                    assert!(distance(&product.to_local().unwrap(), &a) < 1e-12);

                    // the strict upper part is left untouched
                    let stored = factors.to_local().unwrap();
                    for j in 0..n {
                        for i in 0..j {
                            assert_eq!(stored.read(i, j), a.read(i, j));
                        }
                    }
                });
            }
        }
    }

    #[test]
    fn trace_and_frobenius_norm_are_preserved() {
        let n = 12;
        let a = random_hermitian(5, n);
        let trace: f64 = (0..n).map(|i| a.read(i, i).re).sum();
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 2, 3).unwrap();
            let mut factors =
                DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Star, Dist::Vr)).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(5);
            let tridiagonal = tridiagonalize_in_place(factors.as_mut(), &ctrl).unwrap();
            assert_approx_eq!(tridiagonal.diag.iter().sum::<f64>(), trace, 1e-12);

            let t = tridiagonal.to_dist_matrix(&grid).unwrap();
            assert_approx_eq!(
                t.as_ref().norm_frobenius().unwrap(),
                a.norm_frobenius(),
                1e-12
            );
        });
    }

    #[test]
    fn factors_do_not_depend_on_the_grid_or_the_block_size() {
        let n = 14;
        let a = random_hermitian(9, n);
        let reduce_on = |h: usize, w: usize, block_size: usize| {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(block_size);
                let mut factors =
                    DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Mc, Dist::Mr)).unwrap();
                let tridiagonal = tridiagonalize_in_place(factors.as_mut(), &ctrl).unwrap();
                (factors.to_local().unwrap(), tridiagonal)
            })
            .swap_remove(0)
        };
        let (reference, expected) = reduce_on(1, 1, 1);
        for (h, w, block_size) in [(1, 1, 4), (2, 2, 4), (1, 4, 3), (4, 1, 3), (2, 2, 32)] {
            let (factors, tridiagonal) = reduce_on(h, w, block_size);
            assert!(distance(&factors, &reference) < 1e-12);
            for (x, y) in tridiagonal.diag.iter().zip(&expected.diag) {
                assert_approx_eq!(*x, *y, 1e-12);
            }
            for (x, y) in tridiagonal.subdiag.iter().zip(&expected.subdiag) {
                assert!((*x - *y).abs() < 1e-12);
            }
        }
    }
}
