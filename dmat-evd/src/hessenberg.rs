//! The Hessenberg decomposition of a square matrix $A$ is such that:
//! $$A = QHQ^H,$$
//! where $H$ is an upper Hessenberg matrix, and $Q$ is a unitary matrix.
//!
//! The reduction runs over panels of `block_size` columns. Inside a panel, each column is
//! gathered on every process and receives the pending updates of the previous reflectors of
//! the panel, `Y = A V T` from the right and `I - V Tᴴ Vᴴ` from the left. Its reflector is then
//! computed redundantly, and `A v` is formed with a single reduction over the grid. Once the
//! panel is done, the trailing columns are updated with `A -= Y Vᴴ` as a local product, and
//! with the block reflector from the left.

use core::ops::ControlFlow;

use assert2::assert as fancy_assert;
use dmat_core::{
    level3::{local_gemm, with_mc_mr},
    mul::matmul,
    panel::{self, Step},
    redist, BlockCtrl, ComplexField, Conj, Dist, DistMatMut, DistMatRef, DistMatrix, DistSpec,
    Mat, MatMut, MatRef, Parallelism, Result,
};
use dmat_qr::no_pivoting::compute::apply_block_reflector;
use reborrow::*;

use crate::{reflect_tail, spread, store_reflector};

/// Replicated state of the panel being reduced. Every matrix has one column per reflector.
struct PanelState<T> {
    /// Reflectors, with a row for each row of `A`.
    basis: Mat<T>,
    /// Upper triangular factor of the block reflector `I - V T Vᴴ`.
    factor: Mat<T>,
    /// `A V`, with `A` as it was at the start of the panel.
    av: Mat<T>,
    /// `A V T`.
    y: Mat<T>,
}

impl<T: ComplexField> PanelState<T> {
    fn new(n: usize, nb: usize) -> Self {
        Self {
            basis: Mat::zeros(n, nb),
            factor: Mat::zeros(nb, nb),
            av: Mat::zeros(n, nb),
            y: Mat::zeros(n, nb),
        }
    }

    /// `c := (I - V Tᴴ Vᴴ) (c - Y V[col, ..]ᴴ)`, restricted to the first `j` reflectors.
    fn update_column(&self, j: usize, col: usize, mut c: MatMut<'_, T>, par: Parallelism) {
        if j == 0 {
            return;
        }
        let n = c.nrows();
        let basis = self.basis.as_ref().submatrix(0, 0, n, j);
        matmul(
            c.rb_mut(),
            self.y.as_ref().submatrix(0, 0, n, j),
            Conj::No,
            self.basis.as_ref().submatrix(col, 0, 1, j).transpose(),
            Conj::Yes,
            Some(T::one()),
            -T::one(),
            par,
        );

        let mut w = Mat::zeros(j, 1);
        matmul(w.as_mut(), basis.transpose(), Conj::Yes, c.rb(), Conj::No, None, T::one(), par);
        let mut z = Mat::zeros(j, 1);
        matmul(
            z.as_mut(),
            self.factor.as_ref().submatrix(0, 0, j, j).transpose(),
            Conj::Yes,
            w.as_ref(),
            Conj::No,
            None,
            T::one(),
            par,
        );
        matmul(c, basis, Conj::No, z.as_ref(), Conj::No, Some(T::one()), -T::one(), par);
    }

    /// Records the `j`-th reflector, already stored in `basis`, in `T`, `A V` and `Y`.
    fn push(&mut self, j: usize, tau: T, a: DistMatRef<'_, T>, par: Parallelism) -> Result<()> {
        let n = self.basis.nrows();
        let basis = self.basis.as_ref();
        let v = basis.col(j);

        // T[..j, j] = -tau T[..j, ..j] V[.., ..j]ᴴ v
        if j > 0 {
            let mut gram = Mat::zeros(j, 1);
            matmul(
                gram.as_mut(),
                basis.submatrix(0, 0, n, j).transpose(),
                Conj::Yes,
                v,
                Conj::No,
                None,
                T::one(),
                par,
            );
            let (left, right) = self.factor.as_mut().split_at_col(j);
            matmul(
                right.submatrix(0, 0, j, 1),
                left.rb().submatrix(0, 0, j, j),
                Conj::No,
                gram.as_ref(),
                Conj::No,
                None,
                -tau,
                par,
            );
        }
        self.factor.write(j, j, tau);

        let av = times_replicated(a, v)?;
        for (i, value) in av.into_iter().enumerate() {
            self.av.write(i, j, value);
        }
        matmul(
            self.y.as_mut().col(j),
            self.av.as_ref().submatrix(0, 0, n, j + 1),
            Conj::No,
            self.factor.as_ref().submatrix(0, j, j + 1, 1),
            Conj::No,
            None,
            T::one(),
            par,
        );
        Ok(())
    }
}

/// `A v` for a vector `v` replicated on every process, with a single reduction over the grid.
fn times_replicated<T: ComplexField>(a: DistMatRef<'_, T>, v: MatRef<'_, T>) -> Result<Vec<T>> {
    let mut p = vec![T::zero(); a.height()];
    if let (Some(cmap), Some(rmap)) = (a.col_map(), a.row_map()) {
        let local = a.local();
        for jl in 0..local.ncols() {
            let x = v.read(rmap.global(jl), 0);
            if x == T::zero() {
                continue;
            }
            for il in 0..local.nrows() {
                let i = cmap.global(il);
                p[i] = p[i] + local.read(il, jl) * x;
            }
        }
    }
    Ok(a.grid().comm().all_reduce_sum(p)?)
}

/// Computes the Hessenberg decomposition of `matrix` in place, and returns the Householder
/// scalars, replicated on every process.
///
/// `H` is stored on and above the first subdiagonal, and the essential parts of the
/// reflectors below it. The returned vector has `n - 1` entries, or none if `n == 0`.
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the input matrix is not square.
#[track_caller]
pub fn make_hessenberg_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<Vec<T>> {
    let n = matrix.height();
    fancy_assert!(matrix.width() == n);
    let _span = tracing::debug_span!("hessenberg", n, block_size = ctrl.block_size).entered();

    let size = n.saturating_sub(1);
    let par = ctrl.parallelism;
    let mut householder_factor = Vec::with_capacity(size);
    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, size, |Step { k, nb }, mut a| {
            let grid = a.grid().clone();
            let mut state = PanelState::new(n, nb);
            for j in 0..nb {
                let col = k + j;
                let mut x = DistMatrix::redistributed_from(
                    a.rb().submatrix(0, col, n, 1),
                    DistSpec::new(Dist::Star, Dist::Star),
                )?;
                state.update_column(j, col, x.local_mut(), par);
                let tau = reflect_tail(x.local_mut(), col + 1);
                redist::copy(x.as_ref(), a.rb_mut().submatrix(0, col, n, 1))?;
                store_reflector(state.basis.as_mut(), j, x.local(), col + 1);
                householder_factor.push(tau);
                state.push(j, tau, a.rb(), par)?;
            }

            // A[.., k + nb..] -= Y V[k + nb.., ..]ᴴ
            let rest = n - k - nb;
            let (_, right) = a.rb_mut().split_at_col(k + nb);
            let y = spread(state.y.as_ref(), &grid, Dist::Mc, right.col_align())?;
            let v = spread(
                state.basis.as_ref().submatrix(k + nb, 0, rest, nb),
                &grid,
                Dist::Mr,
                right.row_align(),
            )?;
            local_gemm(
                right,
                y.as_ref(),
                Conj::No,
                v.as_ref().transpose(),
                Conj::Yes,
                Some(T::one()),
                -T::one(),
                par,
            );

            // A[k + 1.., k + nb..] := Qᴴ A[k + 1.., k + nb..]
            let (_, _, left, right) = a.split_at(k + 1, k + nb);
            let basis = left.rb().submatrix(0, k, n - k - 1, nb);
            apply_block_reflector(basis, &householder_factor[k..k + nb], Conj::Yes, right, ctrl)?;
            Ok(ControlFlow::Continue(()))
        })
    })?;
    Ok(householder_factor)
}

/// Computes the explicit unitary factor `Q` of the Hessenberg decomposition.
///
/// Every process of the grid must call this function.
pub fn explicit_q<T: ComplexField>(
    hessenberg_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    crate::explicit_q(hessenberg_factors, householder_factor, ctrl)
}

/// Returns the upper Hessenberg matrix `H` stored in `hessenberg_factors`, as `[MC, MR]`.
pub fn extract_hessenberg<T: ComplexField>(
    hessenberg_factors: DistMatRef<'_, T>,
) -> Result<DistMatrix<T>> {
    let mut h =
        DistMatrix::redistributed_from(hessenberg_factors, DistSpec::new(Dist::Mc, Dist::Mr))?;
    h.update_local(|i, j, value| if i <= j + 1 { value } else { T::zero() });
    Ok(h)
}

/// Computes the matrix $A = QHQ^H$ from its Hessenberg decomposition.
///
/// Every process of the grid must call this function.
pub fn reconstruct<T: ComplexField>(
    hessenberg_factors: DistMatRef<'_, T>,
    householder_factor: &[T],
    ctrl: &BlockCtrl,
) -> Result<DistMatrix<T>> {
    let q = explicit_q(hessenberg_factors, householder_factor, ctrl)?;
    let h = extract_hessenberg(hessenberg_factors)?;
    crate::conjugate_by(q.as_ref(), h.as_ref(), ctrl)
}
