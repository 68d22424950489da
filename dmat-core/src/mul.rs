//! Local matrix multiplication.
//!
//! Products over `f32`, `f64`, `c32` and `c64` are computed by the `gemm` crate. Any other
//! [`ComplexField`] goes through a column sweep.

use assert2::assert as fancy_assert;
use core::any::TypeId;
use reborrow::*;

use crate::{c32, c64, ComplexField, Conj, Mat, MatMut, MatRef, Parallelism};

/// Width of the column blocks that straddle the diagonal in [`matmul_lower`].
const DIAG_BLOCK: usize = 32;

/// Computes the matrix product `[alpha * dst] + beta * Op_lhs(lhs) * Op_rhs(rhs)` and
/// stores the result in `dst`.
///
/// If `alpha` is `None`, `dst` is overwritten and its previous contents are never read.
///
/// # Panics
///
/// Panics if the dimensions of `dst`, `lhs` and `rhs` are not compatible.
#[track_caller]
pub fn matmul<T: ComplexField>(
    dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    conj_lhs: Conj,
    rhs: MatRef<'_, T>,
    conj_rhs: Conj,
    alpha: Option<T>,
    beta: T,
    parallelism: Parallelism,
) {
    fancy_assert!(dst.nrows() == lhs.nrows());
    fancy_assert!(dst.ncols() == rhs.ncols());
    fancy_assert!(lhs.ncols() == rhs.nrows());
    matmul_dispatch(dst, lhs, conj_lhs, rhs, conj_rhs, alpha, beta, parallelism);
}

/// Same as [`matmul`], except that column `j` of `dst` is only read and written from row
/// `first_row(j)` down. Entries above that row are left untouched.
///
/// `first_row` must be nondecreasing in `j`, which holds for the lower trapezoid of any
/// submatrix, or for the locally owned part of a distributed lower triangle.
#[track_caller]
pub fn matmul_lower<T: ComplexField>(
    mut dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    conj_lhs: Conj,
    rhs: MatRef<'_, T>,
    conj_rhs: Conj,
    alpha: Option<T>,
    beta: T,
    first_row: &dyn Fn(usize) -> usize,
    parallelism: Parallelism,
) {
    fancy_assert!(dst.nrows() == lhs.nrows());
    fancy_assert!(dst.ncols() == rhs.ncols());
    fancy_assert!(lhs.ncols() == rhs.nrows());

    let m = dst.nrows();
    let n = dst.ncols();
    let k = lhs.ncols();

    let mut j0 = 0;
    while j0 < n {
        let bs = Ord::min(DIAG_BLOCK, n - j0);
        let top = Ord::min(first_row(j0), m);
        let full = Ord::min(first_row(j0 + bs - 1), m);
        fancy_assert!(top <= full);

        // rows every column of the block keeps
        matmul_dispatch(
            dst.rb_mut().submatrix(full, j0, m - full, bs),
            lhs.submatrix(full, 0, m - full, k),
            conj_lhs,
            rhs.submatrix(0, j0, k, bs),
            conj_rhs,
            alpha,
            beta,
            parallelism,
        );

        // ragged rows, computed into a scratch block and merged entry by entry
        let ragged = full - top;
        if ragged > 0 {
            let mut tmp = Mat::<T>::zeros(ragged, bs);
            matmul_dispatch(
                tmp.as_mut(),
                lhs.submatrix(top, 0, ragged, k),
                conj_lhs,
                rhs.submatrix(0, j0, k, bs),
                conj_rhs,
                None,
                beta,
                parallelism,
            );
            for jj in 0..bs {
                let start = Ord::min(first_row(j0 + jj), m);
                for i in Ord::max(start, top)..full {
                    let prod = tmp.read(i - top, jj);
                    let value = match alpha {
                        Some(alpha) => alpha * dst.read(i, j0 + jj) + prod,
                        None => prod,
                    };
                    dst.write(i, j0 + jj, value);
                }
            }
        }

        j0 += bs;
    }
}

fn gemm_parallelism(parallelism: Parallelism) -> gemm::Parallelism {
    match parallelism {
        Parallelism::None => gemm::Parallelism::None,
        Parallelism::Rayon(0) => gemm::Parallelism::Rayon(rayon::current_num_threads()),
        Parallelism::Rayon(n_threads) => gemm::Parallelism::Rayon(n_threads),
    }
}

/// Reinterprets a scalar as the `gemm` scalar with the same layout.
///
/// # Safety
///
/// `T` and `U` must have the same size and representation.
#[inline(always)]
unsafe fn coerce<T: Copy, U: Copy>(value: T) -> U {
    debug_assert!(core::mem::size_of::<T>() == core::mem::size_of::<U>());
    core::mem::transmute_copy(&value)
}

fn matmul_dispatch<T: ComplexField>(
    mut dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    conj_lhs: Conj,
    rhs: MatRef<'_, T>,
    conj_rhs: Conj,
    alpha: Option<T>,
    beta: T,
    parallelism: Parallelism,
) {
    let m = dst.nrows();
    let n = dst.ncols();
    let k = lhs.ncols();
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        scale(dst, alpha);
        return;
    }

    let par = gemm_parallelism(parallelism);
    let read_dst = alpha.is_some();
    let alpha = alpha.unwrap_or_else(T::zero);

    macro_rules! run_gemm {
        ($ty: ty) => {
            // SAFETY: the dimensions were checked by the caller, the strides come from valid
            // views, `$ty` has the layout of `T`, and `dst` does not alias the operands.
            unsafe {
                gemm::gemm(
                    m,
                    n,
                    k,
                    dst.rb_mut().as_ptr() as *mut $ty,
                    dst.col_stride(),
                    dst.row_stride(),
                    read_dst,
                    lhs.as_ptr() as *const $ty,
                    lhs.col_stride(),
                    lhs.row_stride(),
                    rhs.as_ptr() as *const $ty,
                    rhs.col_stride(),
                    rhs.row_stride(),
                    coerce::<T, $ty>(alpha),
                    coerce::<T, $ty>(beta),
                    false,
                    conj_lhs == Conj::Yes,
                    conj_rhs == Conj::Yes,
                    par,
                )
            }
        };
    }

    let id = TypeId::of::<T>();
    if id == TypeId::of::<f64>() {
        run_gemm!(f64);
    } else if id == TypeId::of::<f32>() {
        run_gemm!(f32);
    } else if id == TypeId::of::<c64>() {
        run_gemm!(gemm::c64);
    } else if id == TypeId::of::<c32>() {
        run_gemm!(gemm::c32);
    } else {
        let alpha = if read_dst { Some(alpha) } else { None };
        matmul_fallback(dst, lhs, conj_lhs, rhs, conj_rhs, alpha, beta);
    }
}

fn scale<T: ComplexField>(mut dst: MatMut<'_, T>, alpha: Option<T>) {
    for j in 0..dst.ncols() {
        for i in 0..dst.nrows() {
            let value = match alpha {
                Some(alpha) => alpha * dst.read(i, j),
                None => T::zero(),
            };
            dst.write(i, j, value);
        }
    }
}

fn matmul_fallback<T: ComplexField>(
    mut dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    conj_lhs: Conj,
    rhs: MatRef<'_, T>,
    conj_rhs: Conj,
    alpha: Option<T>,
    beta: T,
) {
    scale(dst.rb_mut(), alpha);
    for j in 0..dst.ncols() {
        for depth in 0..lhs.ncols() {
            let b = beta * conj_rhs.apply(rhs.read(depth, j));
            for i in 0..dst.nrows() {
                let value = dst.read(i, j) + conj_lhs.apply(lhs.read(i, depth)) * b;
                dst.write(i, j, value);
            }
        }
    }
}
