use assert2::assert as fancy_assert;
use dmat_core::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatRef, DistMatrix},
    householder::make_householder_in_place,
    level3::with_mc_mr,
    redist, BlockCtrl, ComplexField, Conj, MatMut, Permutation, RealField, Result,
};
use reborrow::*;

use crate::no_pivoting::compute::apply_block_reflector;

const STAR_STAR: DistSpec = DistSpec::new(Dist::Star, Dist::Star);

/// Stopping criteria of the column pivoted QR decomposition.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QrCtrl<R> {
    /// Maximum number of reflectors, if any.
    pub max_rank: Option<usize>,
    /// If set, the factorization stops once the largest remaining column norm is at most
    /// `tol` times the largest column norm of the input.
    pub tol: Option<R>,
    /// Recompute the remaining column norms after every step instead of downdating them.
    pub always_recompute_norms: bool,
}

impl<R> Default for QrCtrl<R> {
    #[inline]
    fn default() -> Self {
        Self {
            max_rank: None,
            tol: None,
            always_recompute_norms: false,
        }
    }
}

impl<R> QrCtrl<R> {
    #[inline]
    pub fn with_max_rank(self, max_rank: usize) -> Self {
        Self {
            max_rank: Some(max_rank),
            ..self
        }
    }

    #[inline]
    pub fn with_tolerance(self, tol: R) -> Self {
        Self {
            tol: Some(tol),
            ..self
        }
    }

    #[inline]
    pub fn with_always_recompute_norms(self, always_recompute_norms: bool) -> Self {
        Self {
            always_recompute_norms,
            ..self
        }
    }
}

/// Information about the resulting column pivoted QR factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ColPivQrInfo {
    /// Number of reflectors that were computed. This is `min(m, n)` unless the factorization
    /// stopped early because of [`QrCtrl::max_rank`] or [`QrCtrl::tol`].
    pub rank: usize,
}

/// Euclidean norms of the columns of `a`, replicated on every process.
fn column_norms<T: ComplexField>(a: DistMatRef<'_, T>) -> Result<Vec<T::Real>> {
    let zero = <T::Real as ComplexField>::zero();
    let mut sums = vec![zero; a.width()];
    if let Some(rmap) = a.row_map() {
        let local = a.local();
        for jl in 0..local.ncols() {
            let mut acc = zero;
            for il in 0..local.nrows() {
                acc = acc + local.read(il, jl).abs2();
            }
            sums[rmap.global(jl)] = acc;
        }
    }
    let sums = a.grid().comm().all_reduce_sum(sums)?;
    Ok(sums.into_iter().map(ComplexField::sqrt).collect())
}

/// Index and value of the largest entry of `norms[k..]`. Ties go to the lowest index.
fn find_pivot<R: RealField>(norms: &[R], k: usize) -> (usize, R) {
    let mut best = (k, norms[k]);
    for (j, &norm) in norms.iter().enumerate().skip(k + 1) {
        if norm > best.1 {
            best = (j, norm);
        }
    }
    best
}

fn swap_columns<T: ComplexField>(mut a: DistMatMut<'_, T>, i: usize, j: usize) -> Result<()> {
    let m = a.height();
    let ci = DistMatrix::redistributed_from(a.rb().submatrix(0, i, m, 1), STAR_STAR)?;
    let cj = DistMatrix::redistributed_from(a.rb().submatrix(0, j, m, 1), STAR_STAR)?;
    redist::copy(ci.as_ref(), a.rb_mut().submatrix(0, j, m, 1))?;
    redist::copy(cj.as_ref(), a.submatrix(0, i, m, 1))
}

/// Replaces the replicated `column` by `[beta; essential]`, and returns `tau`.
fn reflect_in_place<T: ComplexField>(column: MatMut<'_, T>) -> T {
    let (mut head, tail) = column.split_at_row(1);
    let mut tail_squared_norm = <T::Real as ComplexField>::zero();
    for i in 0..tail.nrows() {
        tail_squared_norm = tail_squared_norm + tail.read(i, 0).abs2();
    }
    let (tau, beta) = make_householder_in_place(Some(tail), head.read(0, 0), tail_squared_norm);
    head.write(0, 0, beta);
    tau
}

/// Downdates the norms of the columns `k + 1..` of `a` after the `k`-th reflector was applied,
/// so that they cover the rows `k + 1..`. A norm that lost too much accuracy is recomputed,
/// and becomes the new reference for the following downdates.
fn downdate_norms<T: ComplexField>(
    a: DistMatRef<'_, T>,
    k: usize,
    norms: &mut [T::Real],
    reference: &mut [T::Real],
    always_recompute: bool,
) -> Result<()> {
    let (m, n) = (a.height(), a.width());
    let zero = <T::Real as ComplexField>::zero();
    let one = <T::Real as ComplexField>::one();
    let threshold = <T::Real as RealField>::epsilon().sqrt();

    let row = DistMatrix::redistributed_from(a.submatrix(k, k + 1, 1, n - k - 1), STAR_STAR)?;
    let mut stale = Vec::new();
    for j in k + 1..n {
        if always_recompute {
            stale.push(j);
            continue;
        }
        if norms[j] == zero {
            continue;
        }
        let ratio = row.local().read(0, j - k - 1).abs() / norms[j];
        let remaining = (one - ratio * ratio).max(zero);
        let relative = norms[j] / reference[j];
        if remaining * relative * relative <= threshold {
            stale.push(j);
        } else {
            norms[j] = norms[j] * remaining.sqrt();
        }
    }

    if !stale.is_empty() {
        tracing::trace!(k, n_stale = stale.len(), "recomputing column norms");
        let fresh = column_norms(a.submatrix(k + 1, k + 1, m - k - 1, n - k - 1))?;
        for j in stale {
            norms[j] = fresh[j - k - 1];
            reference[j] = norms[j];
        }
    }
    Ok(())
}

/// Computes the QR decomposition with column pivoting of `matrix` in place: `A P = Q R`.
///
/// Returns the Householder scalars, the column permutation and the number of reflectors that
/// were computed, all replicated on every process. Column `k` of `A P` is column
/// `col_perm.indices()[k]` of the input.
///
/// `R` is stored on and above the diagonal of the first `rank` rows, and the essential parts
/// of the reflectors below it. If the factorization stopped early, the trailing block
/// `A[rank.., rank..]` holds the part of `A P` that is not captured by the first `rank`
/// columns of `Q`.
///
/// Every process of the grid must call this function.
///
/// # Panics
///
/// Panics if the tolerance is negative.
#[track_caller]
pub fn qr_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
    qr_ctrl: &QrCtrl<T::Real>,
) -> Result<(Vec<T>, Permutation, ColPivQrInfo)> {
    let (m, n) = (matrix.height(), matrix.width());
    let zero = <T::Real as ComplexField>::zero();
    if let Some(tol) = qr_ctrl.tol {
        fancy_assert!(tol >= zero);
    }
    let max_steps = qr_ctrl.max_rank.map_or(m.min(n), |rank| rank.min(m).min(n));
    let _span = tracing::debug_span!("qr_col_pivoting", m, n, max_steps).entered();

    let mut taus = Vec::with_capacity(max_steps);
    let mut perm = Permutation::identity(n);
    with_mc_mr(matrix, true, |mut a| {
        let mut norms = column_norms(a.rb())?;
        let mut reference = norms.clone();
        let largest = norms.iter().fold(zero, |acc, &norm| acc.max(norm));

        for k in 0..max_steps {
            let (pivot, pivot_norm) = find_pivot(&norms, k);
            if let Some(tol) = qr_ctrl.tol {
                if pivot_norm <= tol * largest {
                    tracing::debug!(rank = k, "remaining columns are below the tolerance");
                    break;
                }
            }
            if pivot != k {
                swap_columns(a.rb_mut(), k, pivot)?;
                norms.swap(k, pivot);
                reference.swap(k, pivot);
            }
            perm.push_swap(k, pivot);

            let mut column =
                DistMatrix::redistributed_from(a.rb().submatrix(k, k, m - k, 1), STAR_STAR)?;
            let tau = reflect_in_place(column.local_mut());
            redist::copy(column.as_ref(), a.rb_mut().submatrix(k, k, m - k, 1))?;
            taus.push(tau);
            if k + 1 == n {
                continue;
            }

            let (_, _, left, right) = a.rb_mut().split_at(k, k + 1);
            let basis = left.rb().submatrix(0, k, m - k, 1);
            apply_block_reflector(basis, &[tau], Conj::Yes, right, ctrl)?;
            downdate_norms(
                a.rb(),
                k,
                &mut norms,
                &mut reference,
                qr_ctrl.always_recompute_norms,
            )?;
        }
        Ok(())
    })?;

    let rank = taus.len();
    Ok((taus, perm, ColPivQrInfo { rank }))
}
