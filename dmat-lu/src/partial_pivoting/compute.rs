use core::ops::ControlFlow;

use dmat_core::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatrix},
    level3::{local_gemm, with_mc_mr},
    panel::{self, BlockCtrl, Blocks3x3, PanelVariant, Step},
    redist,
    solve::solve_lower_triangular_in_place,
    ComplexField, Conj, Diag, MatMut, Permutation, Result,
};
use reborrow::*;

/// Information about the resulting LU factorization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartialPivLuInfo {
    /// Number of transpositions that were performed, can be used to compute the determinant of
    /// $P$.
    pub n_transpositions: usize,
    /// Index of the first pivot that was exactly zero, if any. The factorization still runs to
    /// completion, but `U` is singular.
    pub first_zero_pivot: Option<usize>,
}

/// Elimination step shared by both panel variants: stores the multiplier of `row` in column
/// `j` and updates the columns to its right.
#[inline]
fn eliminate_row<T: ComplexField>(mut row: MatMut<'_, T>, j: usize, pivot_row: &[T], inv: T) {
    let l = row.read(0, j) * inv;
    row.write(0, j, l);
    for c in j + 1..pivot_row.len() {
        let value = row.read(0, c) - l * pivot_row[c];
        row.write(0, c, value);
    }
}

/// Unblocked LU with partial pivoting of a replicated panel. Returns the pivot row chosen for
/// each column, relative to the panel.
fn lu_in_place_unblocked<T: ComplexField>(
    mut panel: MatMut<'_, T>,
    offset: usize,
    first_zero_pivot: &mut Option<usize>,
) -> Vec<usize> {
    let m = panel.nrows();
    let nb = panel.ncols();
    let zero = <T::Real as ComplexField>::zero();
    let mut pivots = Vec::with_capacity(nb);

    for j in 0..nb {
        let mut max = zero;
        let mut imax = j;
        for i in j..m {
            let score = panel.read(i, j).score();
            if score > max {
                imax = i;
                max = score;
            }
        }
        pivots.push(imax);

        if max == zero {
            tracing::debug!(pivot = offset + j, "zero pivot");
            first_zero_pivot.get_or_insert(offset + j);
            continue;
        }
        panel.swap_rows(j, imax);

        let pivot_row: Vec<T> = (0..nb).map(|c| panel.read(j, c)).collect();
        let inv = pivot_row[j].inv();
        for i in j + 1..m {
            eliminate_row(panel.rb_mut().row(i), j, &pivot_row, inv);
        }
    }
    pivots
}

/// Candidate pivot of one process: score, global row, and the row itself.
type Candidate<T> = Option<(<T as ComplexField>::Real, usize, Vec<T>)>;

/// LU with partial pivoting of a panel stored as `[MC, STAR]`. Each column reduction runs
/// over the column communicator, with ties broken towards the lowest global row.
fn lu_in_place_distributed<T: ComplexField>(
    panel: &mut DistMatrix<T>,
    offset: usize,
    first_zero_pivot: &mut Option<usize>,
) -> Result<Vec<usize>> {
    let grid = panel.grid().clone();
    let nb = panel.width();
    let zero = <T::Real as ComplexField>::zero();
    let Some(map) = panel.col_map() else {
        unreachable!()
    };
    let local_rows = panel.local_height();
    let mut pivots = Vec::with_capacity(nb);

    fn row_of<T: ComplexField>(panel: &DistMatrix<T>, il: usize) -> Vec<T> {
        (0..panel.width()).map(|c| panel.get_local(il, c)).collect()
    }

    for j in 0..nb {
        let mut best: Option<(T::Real, usize)> = None;
        for il in map.count_below(j)..local_rows {
            let score = panel.get_local(il, j).score();
            if best.map_or(true, |(max, _)| score > max) {
                best = Some((score, il));
            }
        }
        let candidate: Candidate<T> =
            best.map(|(score, il)| (score, map.global(il), row_of(panel, il)));
        let current: Option<Vec<T>> = panel.local_row(j).map(|il| row_of(panel, il));

        let mut pivot: Candidate<T> = None;
        let mut current_row = None;
        for (candidate, current) in grid.col_comm().all_gather((candidate, current))? {
            if current.is_some() {
                current_row = current;
            }
            if let Some((score, i, row)) = candidate {
                let better = match &pivot {
                    None => true,
                    Some((max, imax, _)) => score > *max || (score == *max && i < *imax),
                };
                if better {
                    pivot = Some((score, i, row));
                }
            }
        }
        let (Some((max, imax, pivot_row)), Some(current_row)) = (pivot, current_row) else {
            unreachable!()
        };

        if max == zero {
            tracing::debug!(pivot = offset + j, "zero pivot");
            first_zero_pivot.get_or_insert(offset + j);
            pivots.push(j);
            continue;
        }
        pivots.push(imax);

        if imax != j {
            if let Some(il) = panel.local_row(j) {
                for (c, &value) in pivot_row.iter().enumerate() {
                    panel.set_local(il, c, value);
                }
            }
            if let Some(il) = panel.local_row(imax) {
                for (c, &value) in current_row.iter().enumerate() {
                    panel.set_local(il, c, value);
                }
            }
        }

        let inv = pivot_row[j].inv();
        let mut local = panel.local_mut();
        for il in map.count_below(j + 1)..local_rows {
            eliminate_row(local.rb_mut().row(il), j, &pivot_row, inv);
        }
    }
    Ok(pivots)
}

/// Computes the LU decomposition of `matrix` with partial pivoting, in place: `P A = L U`.
///
/// `L` is unit lower trapezoidal and is stored strictly below the diagonal, `U` is upper
/// trapezoidal and is stored on and above it. Every process returns the same permutation.
///
/// Every process of the grid must call this function.
pub fn lu_in_place<T: ComplexField>(
    matrix: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<(Permutation, PartialPivLuInfo)> {
    let (m, n) = (matrix.height(), matrix.width());
    let size = m.min(n);
    let _span = tracing::debug_span!(
        "lu_partial_pivoting",
        m,
        n,
        block_size = ctrl.block_size,
        variant = ?ctrl.variant
    )
    .entered();

    let mut perm = Permutation::identity(m);
    let mut first_zero_pivot = None;

    with_mc_mr(matrix, true, |mut matrix| {
        panel::factor(matrix.rb_mut(), ctrl, size, |Step { k, nb }, mut a| {
            let panel = a.rb().submatrix(k, k, m - k, nb);
            let pivots = match ctrl.variant {
                PanelVariant::Distributed => {
                    let mut copy = DistMatrix::redistributed_from(
                        panel,
                        DistSpec::new(Dist::Mc, Dist::Star).with_align(panel.col_align(), 0),
                    )?;
                    let pivots = lu_in_place_distributed(&mut copy, k, &mut first_zero_pivot)?;
                    redist::copy(copy.as_ref(), a.rb_mut().submatrix(k, k, m - k, nb))?;
                    pivots
                }
                PanelVariant::Replicated => {
                    let mut copy = DistMatrix::redistributed_from(
                        panel,
                        DistSpec::new(Dist::Star, Dist::Star),
                    )?;
                    let pivots =
                        lu_in_place_unblocked(copy.local_mut(), k, &mut first_zero_pivot);
                    redist::copy(copy.as_ref(), a.rb_mut().submatrix(k, k, m - k, nb))?;
                    pivots
                }
            };

            let mut swaps = Permutation::identity(m - k);
            for (j, &p) in pivots.iter().enumerate() {
                swaps.push_swap(j, p);
                perm.push_swap(k + j, k + p);
            }
            if swaps.n_transpositions() > 0 {
                let indices = swaps.indices();
                if k > 0 {
                    redist::permute_rows(a.rb_mut().submatrix(k, 0, m - k, k), &indices)?;
                }
                if k + nb < n {
                    redist::permute_rows(
                        a.rb_mut().submatrix(k, k + nb, m - k, n - k - nb),
                        &indices,
                    )?;
                }
            }

            let Blocks3x3 {
                a11, a12, a21, a22, ..
            } = panel::repartition(a, k, nb);
            if a12.width() == 0 {
                return Ok(ControlFlow::Continue(()));
            }

            let l11 =
                DistMatrix::redistributed_from(a11.rb(), DistSpec::new(Dist::Star, Dist::Star))?;
            let mut u12 = DistMatrix::redistributed_from(
                a12.rb(),
                DistSpec::new(Dist::Star, Dist::Mr).with_align(0, a12.row_align()),
            )?;
            solve_lower_triangular_in_place(
                l11.local(),
                Diag::Unit,
                Conj::No,
                u12.local_mut(),
                ctrl.parallelism,
            );
            redist::copy(u12.as_ref(), a12)?;

            if a22.height() > 0 {
                let l21 = DistMatrix::redistributed_from(
                    a21.rb(),
                    DistSpec::new(Dist::Mc, Dist::Star).with_align(a22.col_align(), 0),
                )?;
                local_gemm(
                    a22,
                    l21.as_ref(),
                    Conj::No,
                    u12.as_ref(),
                    Conj::No,
                    Some(T::one()),
                    -T::one(),
                    ctrl.parallelism,
                );
            }
            Ok(ControlFlow::Continue(()))
        })
    })?;

    let info = PartialPivLuInfo {
        n_transpositions: perm.n_transpositions(),
        first_zero_pivot,
    };
    Ok((perm, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial_pivoting::{reconstruct::*, solve::*};
    use assert_approx_eq::assert_approx_eq;
    use dmat_core::{
        c64, BlockCtrl, ComplexField, Dist, DistMatrix, DistSpec, Grid, Mat, PanelVariant,
        Permutation, Universe,
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);
    const GRIDS: [(usize, usize); 5] = [(1, 1), (2, 2), (1, 3), (3, 1), (2, 3)];

    fn random_real(seed: u64, m: usize, n: usize) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::with_dims(|_, _| rng.gen::<f64>() - 0.5, m, n)
    }

    fn random_complex(seed: u64, m: usize, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::with_dims(|_, _| c64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5), m, n)
    }

    fn distance<T: ComplexField<Real = f64>>(a: &Mat<T>, b: &Mat<T>) -> f64 {
        assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
        Mat::with_dims(|i, j| a.read(i, j) - b.read(i, j), a.nrows(), a.ncols()).norm_frobenius()
    }

    /// Factors `a` on an `h × w` grid and returns the relative residual `‖A - PᵀLU‖ / ‖A‖`,
    /// checked on every process.
    fn residual<T: ComplexField<Real = f64>>(
        a: &Mat<T>,
        h: usize,
        w: usize,
        ctrl: BlockCtrl,
    ) -> f64 {
        let residuals = Universe::run(h * w, |comm| {
            let grid = Grid::new(&comm, h, w).unwrap();
            let mut lu = DistMatrix::from_local(a, &grid, MC_MR).unwrap();
            let (perm, info) = lu_in_place(lu.as_mut(), &ctrl).unwrap();
            assert_eq!(info.n_transpositions, perm.n_transpositions());
            assert_eq!(info.first_zero_pivot, None);

            let product = reconstruct(lu.as_ref(), &perm, &ctrl).unwrap();
            distance(&product.to_local().unwrap(), a) / a.norm_frobenius()
        });
        for &r in &residuals[1..] {
            assert_eq!(r, residuals[0]);
        }
        residuals[0]
    }

    #[test]
    fn residuals_on_every_grid() {
        for (h, w) in GRIDS {
            for variant in [PanelVariant::Distributed, PanelVariant::Replicated] {
                let ctrl = BlockCtrl::default()
                    .with_block_size(3)
                    .with_variant(variant);
                let real = random_real(0, 14, 14);
                assert!(residual(&real, h, w, ctrl) < 1e-13);
                let complex = random_complex(1, 14, 14);
                assert!(residual(&complex, h, w, ctrl) < 1e-13);
            }
        }
    }

    #[test]
    fn rectangular_matrices() {
        for (m, n) in [(11, 5), (5, 11), (1, 7), (7, 1)] {
            for (h, w) in [(2, 2), (2, 3)] {
                let ctrl = BlockCtrl::default().with_block_size(2);
                let a = random_complex((m * n) as u64, m, n);
                assert!(residual(&a, h, w, ctrl) < 1e-13);
            }
        }
    }

    #[test]
    fn four_by_four_on_a_two_by_two_grid() {
        let a = Mat::with_dims(
            |i, j| {
                [
                    [1.0, 2.0, 3.0, 4.0],
                    [4.0, 3.0, 2.0, 1.0],
                    [2.0, 1.0, 4.0, 3.0],
                    [3.0, 5.0, 1.0, 2.0],
                ][i][j]
            },
            4,
            4,
        );
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(2);
            let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let (perm, info) = lu_in_place(lu.as_mut(), &ctrl).unwrap();
            assert_eq!(info.first_zero_pivot, None);

            // the first pivot is the 4 of the second row
            assert_eq!(perm.swaps(), [(0, 1), (1, 3), (2, 2), (3, 3)]);

            let mut direct: Vec<usize> = (0..4).collect();
            for &(x, y) in perm.swaps() {
                direct.swap(x, y);
            }
            assert_eq!(perm.indices(), direct);

            let pa = Mat::with_dims(|i, j| a.read(direct[i], j), 4, 4);
            let lu_product = reconstruct_lu(lu.as_ref(), &ctrl).unwrap();
            assert!(distance(&lu_product.to_local().unwrap(), &pa) < 1e-12);
        });
    }

    #[test]
    fn factors_do_not_depend_on_the_grid() {
        let a = random_real(2, 13, 13);
        let ctrl = BlockCtrl::default().with_block_size(4);
        let reference: Vec<(Mat<f64>, Permutation)> = Universe::run(1, |comm| {
            let grid = Grid::new(&comm, 1, 1).unwrap();
            let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
            let (perm, _) = lu_in_place(lu.as_mut(), &ctrl).unwrap();
            (lu.to_local().unwrap(), perm)
        });
        let (expected_lu, expected_perm) = &reference[0];

        for (h, w) in [(2, 2), (1, 4), (4, 1)] {
            for variant in [PanelVariant::Distributed, PanelVariant::Replicated] {
                let ctrl = ctrl.with_variant(variant);
                Universe::run(h * w, |comm| {
                    let grid = Grid::new(&comm, h, w).unwrap();
                    let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                    let (perm, _) = lu_in_place(lu.as_mut(), &ctrl).unwrap();
                    assert_eq!(&perm, expected_perm);
                    assert!(distance(&lu.to_local().unwrap(), expected_lu) < 1e-12);
                });
            }
        }
    }

    #[test]
    fn zero_pivot_is_reported() {
        let mut a = random_real(3, 6, 6);
        for i in 0..6 {
            a.write(i, 2, 0.0);
        }
        for variant in [PanelVariant::Distributed, PanelVariant::Replicated] {
            let a = &a;
            Universe::run(4, |comm| {
                let grid = Grid::new(&comm, 2, 2).unwrap();
                let ctrl = BlockCtrl::default()
                    .with_block_size(2)
                    .with_variant(variant);
                let mut lu = DistMatrix::from_local(a, &grid, MC_MR).unwrap();
                let (perm, info) = lu_in_place(lu.as_mut(), &ctrl).unwrap();
                assert_eq!(info.first_zero_pivot, Some(2));
                assert_eq!(perm.swaps()[2], (2, 2));

                let product = reconstruct(lu.as_ref(), &perm, &ctrl).unwrap();
                assert!(distance(&product.to_local().unwrap(), a) < 1e-12);
            });
        }
    }

    #[test]
    fn solves() {
        let n = 10;
        let a = random_complex(4, n, n);
        let b = random_complex(5, n, 3);
        for (h, w) in [(1, 1), (2, 3)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(3);
                let mut lu = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                let (perm, _) = lu_in_place(lu.as_mut(), &ctrl).unwrap();

                let rhs_spec = DistSpec::new(Dist::Vc, Dist::Star);
                let mut x = DistMatrix::from_local(&b, &grid, rhs_spec).unwrap();
                solve_in_place(lu.as_ref(), &perm, x.as_mut(), &ctrl).unwrap();
                let x = x.to_local().unwrap();
                for j in 0..3 {
                    for i in 0..n {
                        let mut acc = c64::zero();
                        for k in 0..n {
                            acc = acc + a.read(i, k) * x.read(k, j);
                        }
                        assert_approx_eq!(acc.re, b.read(i, j).re, 1e-10);
                        assert_approx_eq!(acc.im, b.read(i, j).im, 1e-10);
                    }
                }

                let mut y = DistMatrix::from_local(&b, &grid, MC_MR).unwrap();
                solve_transpose_in_place(lu.as_ref(), dmat_core::Conj::Yes, &perm, y.as_mut(), &ctrl)
                    .unwrap();
                let y = y.to_local().unwrap();
                for j in 0..3 {
                    for i in 0..n {
                        let mut acc = c64::zero();
                        for k in 0..n {
                            acc = acc + a.read(k, i).conj() * y.read(k, j);
                        }
                        assert_approx_eq!(acc.re, b.read(i, j).re, 1e-10);
                        assert_approx_eq!(acc.im, b.read(i, j).im, 1e-10);
                    }
                }
            });
        }
    }
}
