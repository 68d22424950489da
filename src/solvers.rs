//! Owning wrappers around the distributed decompositions.
//!
//! Each type stores its factors as an `[MC, MR]` matrix together with the [`BlockCtrl`] that
//! produced them, so that later solves and reconstructions use the same blocking. All methods
//! are collective.

use assert2::assert as fancy_assert;
use thiserror::Error;

use crate::{
    BlockCtrl, ComplexField, Conj, Dist, DistError, DistMatMut, DistMatRef, DistMatrix,
    DistSpec, Permutation, Result,
};
use dmat_cholesky::llt;
use dmat_lu::partial_pivoting::{self, compute::PartialPivLuInfo};
use dmat_qr::{
    col_pivoting::{self, compute::QrCtrl},
    no_pivoting,
};

const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);

/// Error returned by [`Cholesky::new`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CholeskyError {
    /// The matrix is not positive definite: the diagonal entry at `pivot` was not strictly
    /// positive when it was reached.
    #[error("the matrix is not positive definite (pivot {pivot})")]
    NotPositiveDefinite { pivot: usize },

    #[error(transparent)]
    Dist(#[from] DistError),
}

/// Copies `rhs` into a new matrix with the same distribution, then solves in place.
fn solve_copy<T: ComplexField>(
    rhs: DistMatRef<'_, T>,
    solve_in_place: impl FnOnce(DistMatMut<'_, T>) -> Result<()>,
) -> Result<DistMatrix<T>> {
    let mut sol = DistMatrix::redistributed_from(rhs, rhs.spec())?;
    solve_in_place(sol.as_mut())?;
    Ok(sol)
}

/// LU decomposition with partial pivoting.
#[derive(Debug)]
pub struct PartialPivLu<T> {
    factors: DistMatrix<T>,
    row_perm: Permutation,
    info: PartialPivLuInfo,
    ctrl: BlockCtrl,
}

impl<T: ComplexField> PartialPivLu<T> {
    /// Returns the LU decomposition of the input matrix with partial (row) pivoting.
    ///
    /// The factorization is such that $PA = LU$, where $L$ is unit lower triangular, $U$ is
    /// upper triangular, and $P$ is the permutation arising from the pivoting.
    ///
    /// # Panics
    ///
    /// Panics if the matrix is not square.
    #[track_caller]
    pub fn new(matrix: DistMatRef<'_, T>, ctrl: BlockCtrl) -> Result<Self> {
        fancy_assert!(matrix.height() == matrix.width());
        let mut factors = DistMatrix::redistributed_from(matrix, MC_MR)?;
        let (row_perm, info) = partial_pivoting::compute::lu_in_place(factors.as_mut(), &ctrl)?;
        Ok(Self {
            factors,
            row_perm,
            info,
            ctrl,
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.factors.height()
    }

    /// Returns the row permutation due to pivoting.
    #[inline]
    pub fn row_permutation(&self) -> &Permutation {
        &self.row_perm
    }

    /// Returns the number of transpositions that constitute the permutation.
    #[inline]
    pub fn transposition_count(&self) -> usize {
        self.info.n_transpositions
    }

    /// Returns the index of the first exactly zero pivot, if the matrix is singular.
    #[inline]
    pub fn first_zero_pivot(&self) -> Option<usize> {
        self.info.first_zero_pivot
    }

    /// Returns the packed factors, with $L$ strictly below the diagonal and $U$ on and above
    /// it.
    #[inline]
    pub fn factors(&self) -> DistMatRef<'_, T> {
        self.factors.as_ref()
    }

    /// Returns the factor $L$ of the LU decomposition.
    pub fn compute_l(&self) -> Result<DistMatrix<T>> {
        Ok(partial_pivoting::reconstruct::split_factors(self.factors.as_ref())?.0)
    }

    /// Returns the factor $U$ of the LU decomposition.
    pub fn compute_u(&self) -> Result<DistMatrix<T>> {
        Ok(partial_pivoting::reconstruct::split_factors(self.factors.as_ref())?.1)
    }

    /// Returns the determinant of the original matrix, replicated on every process.
    pub fn determinant(&self) -> Result<T> {
        let diag = self.factors.as_ref().diagonal(0)?.to_local()?;
        let mut det = T::one();
        for i in 0..diag.nrows() {
            det = det * diag.read(i, 0);
        }
        if self.transposition_count() % 2 == 1 {
            det = -det;
        }
        Ok(det)
    }

    /// Overwrites `rhs` with the solution of $AX = B$.
    pub fn solve_in_place(&self, rhs: DistMatMut<'_, T>) -> Result<()> {
        partial_pivoting::solve::solve_in_place(
            self.factors.as_ref(),
            &self.row_perm,
            rhs,
            &self.ctrl,
        )
    }

    /// Overwrites `rhs` with the solution of $\text{op}(A)^\top X = B$, where $\text{op}$
    /// conjugates the entries if `conj` is [`Conj::Yes`].
    pub fn solve_transpose_in_place(&self, conj: Conj, rhs: DistMatMut<'_, T>) -> Result<()> {
        partial_pivoting::solve::solve_transpose_in_place(
            self.factors.as_ref(),
            conj,
            &self.row_perm,
            rhs,
            &self.ctrl,
        )
    }

    /// Returns the solution of $AX = B$, distributed like `rhs`.
    pub fn solve(&self, rhs: DistMatRef<'_, T>) -> Result<DistMatrix<T>> {
        solve_copy(rhs, |rhs| self.solve_in_place(rhs))
    }

    /// Reconstructs the original matrix using the decomposition.
    pub fn reconstruct(&self) -> Result<DistMatrix<T>> {
        partial_pivoting::reconstruct::reconstruct(self.factors.as_ref(), &self.row_perm, &self.ctrl)
    }
}

/// Cholesky decomposition.
#[derive(Debug)]
pub struct Cholesky<T> {
    factors: DistMatrix<T>,
    ctrl: BlockCtrl,
}

impl<T: ComplexField> Cholesky<T> {
    /// Returns the Cholesky decomposition of the input matrix, or an error if the matrix is
    /// not positive definite.
    ///
    /// The factorization is such that $A = LL^H$, where $L$ is lower triangular. Only the
    /// lower triangular half of the input is accessed.
    ///
    /// # Panics
    ///
    /// Panics if the matrix is not square.
    #[track_caller]
    pub fn new(matrix: DistMatRef<'_, T>, ctrl: BlockCtrl) -> core::result::Result<Self, CholeskyError> {
        fancy_assert!(matrix.height() == matrix.width());
        let mut factors = DistMatrix::redistributed_from(matrix, MC_MR)?;
        let info = llt::compute::cholesky_in_place(factors.as_mut(), &ctrl)?;
        if let Some(pivot) = info.non_positive_pivot {
            return Err(CholeskyError::NotPositiveDefinite { pivot });
        }
        Ok(Self { factors, ctrl })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.factors.height()
    }

    /// Returns the factor $L$ of the Cholesky decomposition.
    pub fn compute_l(&self) -> Result<DistMatrix<T>> {
        let mut l = DistMatrix::redistributed_from(self.factors.as_ref(), MC_MR)?;
        l.update_local(|i, j, value| if i >= j { value } else { T::zero() });
        Ok(l)
    }

    /// Overwrites `rhs` with the solution of $AX = B$.
    pub fn solve_in_place(&self, rhs: DistMatMut<'_, T>) -> Result<()> {
        llt::solve::solve_in_place(self.factors.as_ref(), rhs, &self.ctrl)
    }

    /// Returns the solution of $AX = B$, distributed like `rhs`.
    pub fn solve(&self, rhs: DistMatRef<'_, T>) -> Result<DistMatrix<T>> {
        solve_copy(rhs, |rhs| self.solve_in_place(rhs))
    }

    /// Reconstructs the original matrix using the decomposition.
    pub fn reconstruct(&self) -> Result<DistMatrix<T>> {
        llt::reconstruct::reconstruct(self.factors.as_ref(), &self.ctrl)
    }
}

/// QR decomposition.
#[derive(Debug)]
pub struct Qr<T> {
    factors: DistMatrix<T>,
    householder_factor: Vec<T>,
    ctrl: BlockCtrl,
}

impl<T: ComplexField> Qr<T> {
    /// Returns the QR decomposition of the input matrix.
    ///
    /// The factorization is such that $A = QR$, where $R$ is upper trapezoidal and $Q$ is
    /// unitary.
    pub fn new(matrix: DistMatRef<'_, T>, ctrl: BlockCtrl) -> Result<Self> {
        let mut factors = DistMatrix::redistributed_from(matrix, MC_MR)?;
        let householder_factor = no_pivoting::compute::qr_in_place(factors.as_mut(), &ctrl)?;
        Ok(Self {
            factors,
            householder_factor,
            ctrl,
        })
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.factors.height()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.factors.width()
    }

    /// Returns the Householder scalars of the reflectors stored below the diagonal.
    #[inline]
    pub fn householder_factor(&self) -> &[T] {
        &self.householder_factor
    }

    /// Returns the factor $R$ of the QR decomposition, of size `min(m, n) × n`.
    pub fn compute_thin_r(&self) -> Result<DistMatrix<T>> {
        let size = self.nrows().min(self.ncols());
        let mut r = DistMatrix::redistributed_from(
            self.factors.submatrix(0, 0, size, self.ncols()),
            MC_MR,
        )?;
        r.update_local(|i, j, value| if i <= j { value } else { T::zero() });
        Ok(r)
    }

    /// Returns the factor $Q$ of the QR decomposition, of size `m × m`.
    pub fn compute_q(&self) -> Result<DistMatrix<T>> {
        no_pivoting::reconstruct::explicit_q(
            self.factors.as_ref(),
            &self.householder_factor,
            &self.ctrl,
        )
    }

    /// Overwrites `rhs` with `Q rhs` (if `conj` is [`Conj::No`]) or `Qᴴ rhs` (if `conj` is
    /// [`Conj::Yes`]).
    pub fn apply_q_in_place(&self, conj: Conj, rhs: DistMatMut<'_, T>) -> Result<()> {
        no_pivoting::solve::apply_q(
            self.factors.as_ref(),
            &self.householder_factor,
            conj,
            rhs,
            &self.ctrl,
        )
    }

    /// Overwrites the first `n` rows of `rhs` with the least squares solution of $AX = B$.
    pub fn solve_lstsq_in_place(&self, rhs: DistMatMut<'_, T>) -> Result<()> {
        no_pivoting::solve::solve_in_place(
            self.factors.as_ref(),
            &self.householder_factor,
            rhs,
            &self.ctrl,
        )
    }

    /// Returns the least squares solution of $AX = B$, of size `n × k`, distributed like
    /// `rhs`.
    pub fn solve_lstsq(&self, rhs: DistMatRef<'_, T>) -> Result<DistMatrix<T>> {
        let n = self.ncols();
        let k = rhs.width();
        let full = solve_copy(rhs, |rhs| self.solve_lstsq_in_place(rhs))?;
        DistMatrix::redistributed_from(full.submatrix(0, 0, n.min(full.height()), k), rhs.spec())
    }

    /// Reconstructs the original matrix using the decomposition.
    pub fn reconstruct(&self) -> Result<DistMatrix<T>> {
        no_pivoting::reconstruct::reconstruct(
            self.factors.as_ref(),
            &self.householder_factor,
            &self.ctrl,
        )
    }
}

/// QR decomposition with column pivoting.
#[derive(Debug)]
pub struct ColPivQr<T> {
    factors: DistMatrix<T>,
    householder_factor: Vec<T>,
    col_perm: Permutation,
    ctrl: BlockCtrl,
}

impl<T: ComplexField> ColPivQr<T> {
    /// Returns the QR decomposition with column pivoting of the input matrix.
    ///
    /// The factorization is such that $AP = QR$, where $P$ is a permutation matrix, $R$ is
    /// upper trapezoidal and $Q$ is unitary. It stops early as requested by `qr_ctrl`, in
    /// which case [`ColPivQr::rank`] is smaller than `min(m, n)`.
    pub fn new(
        matrix: DistMatRef<'_, T>,
        ctrl: BlockCtrl,
        qr_ctrl: QrCtrl<T::Real>,
    ) -> Result<Self> {
        let mut factors = DistMatrix::redistributed_from(matrix, MC_MR)?;
        let (householder_factor, col_perm, info) =
            col_pivoting::compute::qr_in_place(factors.as_mut(), &ctrl, &qr_ctrl)?;
        tracing::debug!(rank = info.rank, "column pivoted QR");
        Ok(Self {
            factors,
            householder_factor,
            col_perm,
            ctrl,
        })
    }

    /// Number of reflectors that were computed, i.e. the numerical rank of the input when a
    /// tolerance was given.
    #[inline]
    pub fn rank(&self) -> usize {
        self.householder_factor.len()
    }

    #[inline]
    pub fn col_perm(&self) -> &Permutation {
        &self.col_perm
    }

    /// Returns the Householder scalars of the reflectors stored below the diagonal.
    #[inline]
    pub fn householder_factor(&self) -> &[T] {
        &self.householder_factor
    }

    /// Returns the first `rank` rows of the factor $R$.
    pub fn compute_r(&self) -> Result<DistMatrix<T>> {
        let mut r = DistMatrix::redistributed_from(
            self.factors.submatrix(0, 0, self.rank(), self.factors.width()),
            MC_MR,
        )?;
        r.update_local(|i, j, value| if i <= j { value } else { T::zero() });
        Ok(r)
    }

    /// Reconstructs the original matrix using the decomposition.
    pub fn reconstruct(&self) -> Result<DistMatrix<T>> {
        col_pivoting::reconstruct::reconstruct(
            self.factors.as_ref(),
            &self.householder_factor,
            &self.col_perm,
            &self.ctrl,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{c64, Grid, Mat, Universe};
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random(seed: u64, m: usize, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::with_dims(|_, _| c64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5), m, n)
    }

    fn max_distance(a: &Mat<c64>, b: &Mat<c64>) -> f64 {
        assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
        let mut max = 0.0f64;
        for j in 0..a.ncols() {
            for i in 0..a.nrows() {
                max = max.max((a.read(i, j) - b.read(i, j)).norm());
            }
        }
        max
    }

    fn matmul(a: &Mat<c64>, b: &Mat<c64>) -> Mat<c64> {
        Mat::with_dims(
            |i, j| {
                let mut acc = c64::new(0.0, 0.0);
                for k in 0..a.ncols() {
                    acc += a.read(i, k) * b.read(k, j);
                }
                acc
            },
            a.nrows(),
            b.ncols(),
        )
    }

    #[test]
    fn partial_piv_lu() {
        let n = 9;
        let a = random(0, n, n);
        let b = random(1, n, 2);
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 2, 3).unwrap();
            // the input does not need to be stored as [MC, MR]
            let da = DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Vr, Dist::Star))
                .unwrap();
            let ctrl = BlockCtrl::default().with_block_size(2);
            let lu = PartialPivLu::new(da.as_ref(), ctrl).unwrap();
            assert_eq!(lu.dim(), n);
            assert_eq!(lu.first_zero_pivot(), None);
            assert_eq!(
                lu.transposition_count(),
                lu.row_permutation().n_transpositions()
            );

            let rec = lu.reconstruct().unwrap().to_local().unwrap();
            assert!(max_distance(&rec, &a) < 1e-12);

            let l = lu.compute_l().unwrap().to_local().unwrap();
            let u = lu.compute_u().unwrap().to_local().unwrap();
            let indices = lu.row_permutation().indices();
            let pa = Mat::with_dims(|i, j| a.read(indices[i], j), n, n);
            assert!(max_distance(&matmul(&l, &u), &pa) < 1e-12);

            let db = DistMatrix::from_local(&b, &grid, DistSpec::new(Dist::Mc, Dist::Mr))
                .unwrap();
            let x = lu.solve(db.as_ref()).unwrap();
            assert_eq!(x.spec(), db.spec());
            let x = x.to_local().unwrap();
            assert!(max_distance(&matmul(&a, &x), &b) < 1e-10);
        });
    }

    #[test]
    fn determinant() {
        let a = Mat::with_dims(
            |i, j| [[0.0, 2.0, 1.0], [1.0, 1.0, 0.0], [3.0, 0.0, 1.0]][i][j],
            3,
            3,
        );
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let lu = PartialPivLu::new(da.as_ref(), BlockCtrl::default()).unwrap();
            // 0·(1 - 0) - 2·(1 - 0) + 1·(0 - 3)
            assert_approx_eq!(lu.determinant().unwrap(), -5.0, 1e-12);
        });
    }

    #[test]
    fn cholesky() {
        let n = 8;
        let g = random(2, n, n);
        let a = Mat::with_dims(
            |i, j| {
                let mut acc = if i == j {
                    c64::new(n as f64, 0.0)
                } else {
                    c64::new(0.0, 0.0)
                };
                for k in 0..n {
                    acc += g.read(i, k) * g.read(j, k).conj();
                }
                acc
            },
            n,
            n,
        );
        let b = random(3, n, 3);
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(3);
            let llt = Cholesky::new(da.as_ref(), ctrl).unwrap();
            assert_eq!(llt.dim(), n);

            let rec = llt.reconstruct().unwrap().to_local().unwrap();
            assert!(max_distance(&rec, &a) < 1e-12);

            let l = llt.compute_l().unwrap().to_local().unwrap();
            for j in 0..n {
                for i in 0..j {
                    assert_eq!(l.read(i, j), c64::new(0.0, 0.0));
                }
            }

            let db = DistMatrix::from_local(&b, &grid, DistSpec::new(Dist::Vc, Dist::Star))
                .unwrap();
            let x = llt.solve(db.as_ref()).unwrap().to_local().unwrap();
            assert!(max_distance(&matmul(&a, &x), &b) < 1e-10);
        });
    }

    #[test]
    fn cholesky_rejects_indefinite_matrices() {
        let a = Mat::with_dims(
            |i, j| [[4.0, 2.0, 0.0], [2.0, 1.0, 0.0], [0.0, 0.0, 1.0]][i][j],
            3,
            3,
        );
        Universe::run(2, |comm| {
            let grid = Grid::new(&comm, 1, 2).unwrap();
            let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let err = Cholesky::new(da.as_ref(), BlockCtrl::default()).unwrap_err();
            assert_eq!(err, CholeskyError::NotPositiveDefinite { pivot: 1 });
        });
    }

    #[test]
    fn qr() {
        let (m, n) = (11, 6);
        let a = random(4, m, n);
        let b = random(5, m, 2);
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(4);
            let qr = Qr::new(da.as_ref(), ctrl).unwrap();
            assert_eq!((qr.nrows(), qr.ncols()), (m, n));
            assert_eq!(qr.householder_factor().len(), n);

            let rec = qr.reconstruct().unwrap().to_local().unwrap();
            assert!(max_distance(&rec, &a) < 1e-12);

            let q = qr.compute_q().unwrap().to_local().unwrap();
            let r = qr.compute_thin_r().unwrap().to_local().unwrap();
            let q_thin = Mat::with_dims(|i, j| q.read(i, j), m, n);
            assert!(max_distance(&matmul(&q_thin, &r), &a) < 1e-12);

            // normal equations: Aᴴ (A x - b) = 0
            let db = DistMatrix::from_local(&b, &grid, MC_MR).unwrap();
            let x = qr.solve_lstsq(db.as_ref()).unwrap().to_local().unwrap();
            assert_eq!((x.nrows(), x.ncols()), (n, 2));
            let ax = matmul(&a, &x);
            let residual = Mat::with_dims(|i, j| ax.read(i, j) - b.read(i, j), m, 2);
            let ah = Mat::with_dims(|i, j| a.read(j, i).conj(), n, m);
            let normal = matmul(&ah, &residual);
            assert!(max_distance(&normal, &Mat::with_dims(|_, _| c64::new(0.0, 0.0), n, 2)) < 1e-10);
        });
    }

    #[test]
    fn col_piv_qr_rank() {
        let (m, n) = (10, 7);
        let b = random(6, m, 3);
        let c = random(7, 3, n);
        let a = matmul(&b, &c);
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 1, 4).unwrap();
            let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(2);
            let qr_ctrl = QrCtrl::default().with_tolerance(1e-10);
            let qr = ColPivQr::new(da.as_ref(), ctrl, qr_ctrl).unwrap();
            assert_eq!(qr.rank(), 3);
            assert_eq!(qr.col_perm().len(), n);

            let rec = qr.reconstruct().unwrap().to_local().unwrap();
            assert!(max_distance(&rec, &a) < 1e-12);

            let r = qr.compute_r().unwrap().to_local().unwrap();
            assert_eq!((r.nrows(), r.ncols()), (3, n));
            assert!(r.read(0, 0).norm() >= r.read(1, 1).norm());
            assert!(r.read(1, 1).norm() >= r.read(2, 2).norm());
        });
    }
}
