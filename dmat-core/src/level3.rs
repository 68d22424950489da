//! Distributed Level-3 building blocks.
//!
//! The `local_*` routines only touch the local buffers: the caller is responsible for laying
//! the operands out so that the local blocks line up, e.g. `[MC, STAR] × [STAR, MR]` into
//! `[MC, MR]`. The other routines are collective and accept operands in any layout.

use assert2::assert as fancy_assert;
use reborrow::*;

use crate::{
    dist::{Dist, DistSpec},
    distmat::{DistMatMut, DistMatRef, DistMatrix},
    error::{DistError, Result},
    grid::ensure_same_grid,
    mul::{matmul, matmul_lower},
    panel::{BlockCtrl, Sweep},
    redist,
    solve::{solve_lower_triangular_in_place, solve_upper_triangular_in_place},
    ComplexField, Conj, Diag, Parallelism,
};

const MC_MR: DistSpec = DistSpec::new(Dist::Mc, Dist::Mr);

#[track_caller]
fn check_local_product<T: ComplexField>(
    c: &DistMatMut<'_, T>,
    a: &DistMatRef<'_, T>,
    b: &DistMatRef<'_, T>,
) {
    fancy_assert!(c.height() == a.height());
    fancy_assert!(c.width() == b.width());
    fancy_assert!(a.width() == b.height());
    fancy_assert!((c.col_dist(), c.col_align()) == (a.col_dist(), a.col_align()));
    fancy_assert!((c.row_dist(), c.row_align()) == (b.row_dist(), b.row_align()));
    fancy_assert!((a.row_dist(), a.row_align()) == (b.col_dist(), b.col_align()));
}

/// `c = [alpha * c] + beta * op(a) * op(b)` on the local buffers.
///
/// # Panics
///
/// Panics if the row layout of `c` differs from that of `a`, its column layout differs from
/// that of `b`, or the inner layouts of `a` and `b` differ.
#[track_caller]
pub fn local_gemm<T: ComplexField>(
    mut c: DistMatMut<'_, T>,
    a: DistMatRef<'_, T>,
    conj_a: Conj,
    b: DistMatRef<'_, T>,
    conj_b: Conj,
    alpha: Option<T>,
    beta: T,
    parallelism: Parallelism,
) {
    check_local_product(&c, &a, &b);
    matmul(
        c.local_mut(),
        a.local(),
        conj_a,
        b.local(),
        conj_b,
        alpha,
        beta,
        parallelism,
    );
}

/// `c += beta * op(a) * op(b)` on the local buffers, restricted to the entries of `c` on or
/// below the global diagonal.
#[track_caller]
pub fn local_trrk_lower<T: ComplexField>(
    mut c: DistMatMut<'_, T>,
    a: DistMatRef<'_, T>,
    conj_a: Conj,
    b: DistMatRef<'_, T>,
    conj_b: Conj,
    beta: T,
    parallelism: Parallelism,
) {
    check_local_product(&c, &a, &b);
    let (Some(cmap), Some(rmap)) = (c.col_map(), c.row_map()) else {
        return;
    };
    matmul_lower(
        c.local_mut(),
        a.local(),
        conj_a,
        b.local(),
        conj_b,
        Some(T::one()),
        beta,
        &|jl| cmap.count_below(rmap.global(jl)),
        parallelism,
    );
}

fn check_shape(op: &'static str, expected: (usize, usize), got: (usize, usize)) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(DistError::ShapeMismatch { op, expected, got })
    }
}

/// Collective: runs `f` on `c` if it is distributed as `[MC, MR]`, and otherwise on an
/// `[MC, MR]` copy that is written back afterwards. The copy starts from the contents of `c`
/// if `read_back` is set, and from zeros otherwise.
pub fn with_mc_mr<T: ComplexField>(
    mut c: DistMatMut<'_, T>,
    read_back: bool,
    f: impl FnOnce(DistMatMut<'_, T>) -> Result<()>,
) -> Result<()> {
    if (c.col_dist(), c.row_dist()) == (Dist::Mc, Dist::Mr) {
        return f(c);
    }
    let mut tmp = if read_back {
        DistMatrix::redistributed_from(c.rb(), MC_MR)?
    } else {
        DistMatrix::zeros(c.height(), c.width(), c.grid(), MC_MR)?
    };
    f(tmp.as_mut())?;
    redist::copy(tmp.as_ref(), c.rb_mut())
}

/// Collective: `c = [alpha * c] + beta * op(a) * op(b)`, where `op` conjugates the entries
/// when requested. If `alpha` is `None`, `c` is overwritten.
///
/// The product is accumulated panel by panel: each column panel of `a` is spread as
/// `[MC, STAR]` and each row panel of `b` as `[STAR, MR]`, aligned with `c`.
pub fn gemm<T: ComplexField>(
    c: DistMatMut<'_, T>,
    a: DistMatRef<'_, T>,
    conj_a: Conj,
    b: DistMatRef<'_, T>,
    conj_b: Conj,
    alpha: Option<T>,
    beta: T,
    ctrl: &BlockCtrl,
) -> Result<()> {
    ensure_same_grid(c.grid(), a.grid(), "gemm")?;
    ensure_same_grid(c.grid(), b.grid(), "gemm")?;
    check_shape("gemm", (c.height(), a.width()), (a.height(), a.width()))?;
    check_shape("gemm", (a.width(), c.width()), (b.height(), b.width()))?;

    let _span = tracing::debug_span!(
        "gemm",
        m = c.height(),
        n = c.width(),
        k = a.width(),
        block_size = ctrl.block_size
    )
    .entered();

    with_mc_mr(c, alpha.is_some(), |mut c| {
        let (m, n, depth) = (c.height(), c.width(), a.width());
        match alpha {
            Some(alpha) => c.update_local(|_, _, x| alpha * x),
            None => c.fill(T::zero()),
        }
        for step in Sweep::forward(depth, ctrl.block_size) {
            let a1 = DistMatrix::redistributed_from(
                a.submatrix(0, step.k, m, step.nb),
                DistSpec::new(Dist::Mc, Dist::Star).with_align(c.col_align(), 0),
            )?;
            let b1 = DistMatrix::redistributed_from(
                b.submatrix(step.k, 0, step.nb, n),
                DistSpec::new(Dist::Star, Dist::Mr).with_align(0, c.row_align()),
            )?;
            local_gemm(
                c.rb_mut(),
                a1.as_ref(),
                conj_a,
                b1.as_ref(),
                conj_b,
                Some(T::one()),
                beta,
                ctrl.parallelism,
            );
        }
        Ok(())
    })
}

fn check_trsm<T: ComplexField>(
    op: &'static str,
    tri: DistMatRef<'_, T>,
    b: &DistMatMut<'_, T>,
) -> Result<()> {
    ensure_same_grid(tri.grid(), b.grid(), op)?;
    check_shape(op, (tri.height(), tri.height()), (tri.height(), tri.width()))?;
    check_shape(op, (tri.width(), b.width()), (b.height(), b.width()))
}

/// Collective: solves `op(l) X = b` in place, where `l` is lower triangular.
pub fn trsm_left_lower<T: ComplexField>(
    diag: Diag,
    conj: Conj,
    l: DistMatRef<'_, T>,
    b: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    check_trsm("trsm_left_lower", l, &b)?;
    let _span = tracing::debug_span!(
        "trsm_left_lower",
        n = l.height(),
        nrhs = b.width(),
        block_size = ctrl.block_size
    )
    .entered();

    with_mc_mr(b, true, |mut b| {
        let (n, nrhs) = (b.height(), b.width());
        for step in Sweep::forward(n, ctrl.block_size) {
            let (k, nb) = (step.k, step.nb);
            let l11 = DistMatrix::redistributed_from(
                l.submatrix(k, k, nb, nb),
                DistSpec::new(Dist::Star, Dist::Star),
            )?;
            let mut x1 = DistMatrix::redistributed_from(
                b.rb().submatrix(k, 0, nb, nrhs),
                DistSpec::new(Dist::Star, Dist::Mr).with_align(0, b.row_align()),
            )?;
            solve_lower_triangular_in_place(
                l11.local(),
                diag,
                conj,
                x1.local_mut(),
                ctrl.parallelism,
            );
            redist::copy(x1.as_ref(), b.rb_mut().submatrix(k, 0, nb, nrhs))?;

            let rest = n - k - nb;
            if rest > 0 {
                let b2 = b.rb_mut().submatrix(k + nb, 0, rest, nrhs);
                let l21 = DistMatrix::redistributed_from(
                    l.submatrix(k + nb, k, rest, nb),
                    DistSpec::new(Dist::Mc, Dist::Star).with_align(b2.col_align(), 0),
                )?;
                local_gemm(
                    b2,
                    l21.as_ref(),
                    conj,
                    x1.as_ref(),
                    Conj::No,
                    Some(T::one()),
                    -T::one(),
                    ctrl.parallelism,
                );
            }
        }
        Ok(())
    })
}

/// Collective: solves `op(u) X = b` in place, where `u` is upper triangular.
pub fn trsm_left_upper<T: ComplexField>(
    diag: Diag,
    conj: Conj,
    u: DistMatRef<'_, T>,
    b: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
) -> Result<()> {
    check_trsm("trsm_left_upper", u, &b)?;
    let _span = tracing::debug_span!(
        "trsm_left_upper",
        n = u.height(),
        nrhs = b.width(),
        block_size = ctrl.block_size
    )
    .entered();

    with_mc_mr(b, true, |mut b| {
        let (n, nrhs) = (b.height(), b.width());
        for step in Sweep::backward(n, ctrl.block_size) {
            let (k, nb) = (step.k, step.nb);
            let u11 = DistMatrix::redistributed_from(
                u.submatrix(k, k, nb, nb),
                DistSpec::new(Dist::Star, Dist::Star),
            )?;
            let mut x1 = DistMatrix::redistributed_from(
                b.rb().submatrix(k, 0, nb, nrhs),
                DistSpec::new(Dist::Star, Dist::Mr).with_align(0, b.row_align()),
            )?;
            solve_upper_triangular_in_place(
                u11.local(),
                diag,
                conj,
                x1.local_mut(),
                ctrl.parallelism,
            );
            redist::copy(x1.as_ref(), b.rb_mut().submatrix(k, 0, nb, nrhs))?;

            if k > 0 {
                let b0 = b.rb_mut().submatrix(0, 0, k, nrhs);
                let u01 = DistMatrix::redistributed_from(
                    u.submatrix(0, k, k, nb),
                    DistSpec::new(Dist::Mc, Dist::Star).with_align(b0.col_align(), 0),
                )?;
                local_gemm(
                    b0,
                    u01.as_ref(),
                    conj,
                    x1.as_ref(),
                    Conj::No,
                    Some(T::one()),
                    -T::one(),
                    ctrl.parallelism,
                );
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{c64, comm::Universe, grid::Grid, Mat};
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random(seed: u64, m: usize, n: usize) -> Mat<c64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), m, n)
    }

    fn reference(a: &Mat<c64>, conj_a: Conj, b: &Mat<c64>, conj_b: Conj) -> Mat<c64> {
        let mut c = Mat::zeros(a.nrows(), b.ncols());
        matmul(
            c.as_mut(),
            a.as_ref(),
            conj_a,
            b.as_ref(),
            conj_b,
            None,
            c64::one(),
            Parallelism::None,
        );
        c
    }

    fn assert_close(a: &Mat<c64>, b: &Mat<c64>) {
        assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
        for j in 0..a.ncols() {
            for i in 0..a.nrows() {
                assert_approx_eq!(a.read(i, j).re, b.read(i, j).re, 1e-10);
                assert_approx_eq!(a.read(i, j).im, b.read(i, j).im, 1e-10);
            }
        }
    }

    #[test]
    fn distributed_gemm() {
        for (h, w) in [(1, 1), (2, 2), (2, 3)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(3);
                let a = random(0, 9, 7);
                let b = random(1, 7, 8);
                let c0 = random(2, 9, 8);

                let da = DistMatrix::from_local(&a, &grid, MC_MR).unwrap();
                let db = DistMatrix::from_local(&b, &grid, DistSpec::new(Dist::Vc, Dist::Star))
                    .unwrap();
                let mut dc = DistMatrix::from_local(&c0, &grid, MC_MR.with_align(h - 1, 0)).unwrap();
                let alpha = c64::new(0.5, 0.0);
                let beta = c64::new(0.0, 2.0);
                gemm(
                    dc.as_mut(),
                    da.as_ref(),
                    Conj::Yes,
                    db.as_ref(),
                    Conj::No,
                    Some(alpha),
                    beta,
                    &ctrl,
                )
                .unwrap();

                let product = reference(&a, Conj::Yes, &b, Conj::No);
                let expected =
                    Mat::with_dims(|i, j| alpha * c0.read(i, j) + beta * product.read(i, j), 9, 8);
                assert_close(&dc.to_local().unwrap(), &expected);

                // transposed operands and a non-[MC, MR] destination
                let mut dt =
                    DistMatrix::<c64>::zeros(8, 9, &grid, DistSpec::new(Dist::Star, Dist::Vr))
                        .unwrap();
                gemm(
                    dt.as_mut(),
                    db.as_ref().transpose(),
                    Conj::No,
                    da.as_ref().transpose(),
                    Conj::No,
                    None,
                    c64::one(),
                    &ctrl,
                )
                .unwrap();
                let expected = Mat::with_dims(|i, j| {
                    let mut acc = c64::zero();
                    for k in 0..7 {
                        acc = acc + b.read(k, i) * a.read(j, k);
                    }
                    acc
                }, 8, 9);
                assert_close(&dt.to_local().unwrap(), &expected);
            });
        }
    }

    #[test]
    fn gemm_shape_errors() {
        Universe::run(1, |comm| {
            let grid = Grid::new(&comm, 1, 1).unwrap();
            let a = DistMatrix::<f64>::zeros(3, 4, &grid, MC_MR).unwrap();
            let b = DistMatrix::<f64>::zeros(5, 2, &grid, MC_MR).unwrap();
            let mut c = DistMatrix::<f64>::zeros(3, 2, &grid, MC_MR).unwrap();
            assert_eq!(
                gemm(
                    c.as_mut(),
                    a.as_ref(),
                    Conj::No,
                    b.as_ref(),
                    Conj::No,
                    None,
                    1.0,
                    &BlockCtrl::default()
                ),
                Err(DistError::ShapeMismatch {
                    op: "gemm",
                    expected: (4, 2),
                    got: (5, 2)
                })
            );
        });
    }

    #[test]
    fn triangular_solves() {
        for (h, w) in [(1, 1), (2, 2), (3, 1), (2, 3)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                let ctrl = BlockCtrl::default().with_block_size(2);
                let n = 7;
                let mut t = random(3, n, n);
                for i in 0..n {
                    t.write(i, i, t.read(i, i) + c64::new(4.0, 0.0));
                }
                let lower = Mat::with_dims(|i, j| if i >= j { t.read(i, j) } else { c64::zero() }, n, n);
                let upper = Mat::with_dims(|i, j| if i <= j { t.read(i, j) } else { c64::zero() }, n, n);
                let x = random(4, n, 3);
                let dt = DistMatrix::from_local(&t, &grid, MC_MR).unwrap();

                for (conj, diag) in [(Conj::No, Diag::NonUnit), (Conj::Yes, Diag::Unit)] {
                    let unit = |m: &Mat<c64>| {
                        Mat::with_dims(
                            |i, j| {
                                if diag == Diag::Unit && i == j {
                                    c64::one()
                                } else {
                                    m.read(i, j)
                                }
                            },
                            n,
                            n,
                        )
                    };
                    let b_lower = reference(&unit(&lower), conj, &x, Conj::No);
                    let mut db =
                        DistMatrix::from_local(&b_lower, &grid, DistSpec::new(Dist::Vc, Dist::Star))
                            .unwrap();
                    trsm_left_lower(diag, conj, dt.as_ref(), db.as_mut(), &ctrl).unwrap();
                    assert_close(&db.to_local().unwrap(), &x);

                    let b_upper = reference(&unit(&upper), conj, &x, Conj::No);
                    let mut db = DistMatrix::from_local(&b_upper, &grid, MC_MR).unwrap();
                    trsm_left_upper(diag, conj, dt.as_ref(), db.as_mut(), &ctrl).unwrap();
                    assert_close(&db.to_local().unwrap(), &x);
                }
            });
        }
    }

    #[test]
    fn lower_rank_k_update() {
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let a = random(5, 6, 3);
            let c0 = random(6, 6, 6);
            let mut dc = DistMatrix::from_local(&c0, &grid, MC_MR).unwrap();
            let a_mc = DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Mc, Dist::Star))
                .unwrap();
            let a_mr = DistMatrix::from_local(&a, &grid, DistSpec::new(Dist::Mr, Dist::Star))
                .unwrap();
            local_trrk_lower(
                dc.as_mut(),
                a_mc.as_ref(),
                Conj::No,
                a_mr.as_ref().transpose(),
                Conj::Yes,
                -c64::one(),
                Parallelism::None,
            );
            let product = reference(&a, Conj::No, &Mat::with_dims(|i, j| a.read(j, i), 3, 6), Conj::Yes);
            let expected = Mat::with_dims(
                |i, j| {
                    if i >= j {
                        c0.read(i, j) - product.read(i, j)
                    } else {
                        c0.read(i, j)
                    }
                },
                6,
                6,
            );
            assert_close(&dc.to_local().unwrap(), &expected);
        });
    }
}
