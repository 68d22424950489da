//! Local triangular solves.
//!
//! Only left solves are provided: a right solve `X op(A) = B` is the left solve
//! `op(A)ᵀ Xᵀ = Bᵀ`, which is expressed by passing transposed views.

use assert2::assert as fancy_assert;

use crate::{join_raw, ComplexField, Conj, Diag, MatMut, MatRef, Parallelism};

const PAR_THRESHOLD: usize = 64 * 64;

/// Computes the solution of `Op_triangular(triangular) × X = rhs`, and stores the result in
/// `rhs`.
///
/// `triangular` is interpreted as a lower triangular matrix: its strictly upper triangular
/// part is not accessed. If `diag` is [`Diag::Unit`], its diagonal is not accessed either and
/// is implicitly one.
///
/// # Panics
///
/// Panics if `triangular` is not square, or if the dimensions of `rhs` do not match.
#[track_caller]
pub fn solve_lower_triangular_in_place<T: ComplexField>(
    triangular: MatRef<'_, T>,
    diag: Diag,
    conj: Conj,
    rhs: MatMut<'_, T>,
    parallelism: Parallelism,
) {
    fancy_assert!(triangular.nrows() == triangular.ncols());
    fancy_assert!(rhs.nrows() == triangular.ncols());
    solve_impl(triangular, diag, conj, rhs, parallelism, false);
}

/// Computes the solution of `Op_triangular(triangular) × X = rhs`, and stores the result in
/// `rhs`.
///
/// `triangular` is interpreted as an upper triangular matrix: its strictly lower triangular
/// part is not accessed.
#[track_caller]
pub fn solve_upper_triangular_in_place<T: ComplexField>(
    triangular: MatRef<'_, T>,
    diag: Diag,
    conj: Conj,
    rhs: MatMut<'_, T>,
    parallelism: Parallelism,
) {
    fancy_assert!(triangular.nrows() == triangular.ncols());
    fancy_assert!(rhs.nrows() == triangular.ncols());
    solve_impl(triangular, diag, conj, rhs, parallelism, true);
}

fn solve_impl<T: ComplexField>(
    triangular: MatRef<'_, T>,
    diag: Diag,
    conj: Conj,
    mut rhs: MatMut<'_, T>,
    parallelism: Parallelism,
    upper: bool,
) {
    let n = triangular.nrows();
    let k = rhs.ncols();

    if parallelism != Parallelism::None && k >= 2 && n * n * k > PAR_THRESHOLD * k.min(16) {
        let (left, right) = rhs.split_at_col(k / 2);
        join_raw(
            |parallelism| solve_impl(triangular, diag, conj, left, parallelism, upper),
            |parallelism| solve_impl(triangular, diag, conj, right, parallelism, upper),
            parallelism,
        );
        return;
    }

    for j in 0..k {
        for step in 0..n {
            let p = if upper { n - 1 - step } else { step };
            let mut x = rhs.read(p, j);
            if diag == Diag::NonUnit {
                x = x / conj.apply(triangular.read(p, p));
            }
            rhs.write(p, j, x);
            if x == T::zero() {
                continue;
            }
            let (begin, end) = if upper { (0, p) } else { (p + 1, n) };
            for i in begin..end {
                let value = rhs.read(i, j) - conj.apply(triangular.read(i, p)) * x;
                rhs.write(i, j, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{c64, mul::matmul, Mat};
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_triangular(rng: &mut StdRng, n: usize, upper: bool) -> Mat<c64> {
        Mat::with_dims(
            |i, j| {
                let inside = if upper { i <= j } else { i >= j };
                if i == j {
                    c64::new(2.0 + rng.gen::<f64>(), rng.gen())
                } else if inside {
                    c64::new(rng.gen(), rng.gen())
                } else {
                    // never read by the solver
                    c64::new(f64::NAN, f64::NAN)
                }
            },
            n,
            n,
        )
    }

    fn check(upper: bool, diag: Diag, conj: Conj, parallelism: Parallelism) {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 17;
        let k = 9;
        let tri = random_triangular(&mut rng, n, upper);
        let clean = Mat::with_dims(
            |i, j| {
                let inside = if upper { i <= j } else { i >= j };
                if i == j && diag == Diag::Unit {
                    c64::one()
                } else if inside {
                    tri.read(i, j)
                } else {
                    c64::zero()
                }
            },
            n,
            n,
        );
        let rhs = Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), n, k);
        let mut sol = rhs.clone();
        if upper {
            solve_upper_triangular_in_place(tri.as_ref(), diag, conj, sol.as_mut(), parallelism);
        } else {
            solve_lower_triangular_in_place(tri.as_ref(), diag, conj, sol.as_mut(), parallelism);
        }

        let mut back = Mat::<c64>::zeros(n, k);
        matmul(
            back.as_mut(),
            clean.as_ref(),
            conj,
            sol.as_ref(),
            Conj::No,
            None,
            c64::one(),
            Parallelism::None,
        );
        for j in 0..k {
            for i in 0..n {
                assert_approx_eq!(back.read(i, j).re, rhs.read(i, j).re, 1e-10);
                assert_approx_eq!(back.read(i, j).im, rhs.read(i, j).im, 1e-10);
            }
        }
    }

    #[test]
    fn lower_and_upper_solves() {
        for upper in [false, true] {
            for diag in [Diag::NonUnit, Diag::Unit] {
                for conj in [Conj::No, Conj::Yes] {
                    check(upper, diag, conj, Parallelism::None);
                }
            }
        }
        check(false, Diag::NonUnit, Conj::No, Parallelism::Rayon(2));
    }

    #[test]
    fn right_solve_through_transpose() {
        // X * L^T = B  <=>  L * X^T = B^T
        let l = Mat::with_dims(
            |i, j| if i >= j { (i + j + 1) as f64 } else { 0.0 },
            3,
            3,
        );
        let b = Mat::with_dims(|i, j| (i * 3 + j) as f64, 2, 3);
        let mut x = b.clone();
        solve_lower_triangular_in_place(
            l.as_ref(),
            Diag::NonUnit,
            Conj::No,
            x.as_mut().transpose(),
            Parallelism::None,
        );
        let mut back = Mat::<f64>::zeros(2, 3);
        matmul(
            back.as_mut(),
            x.as_ref(),
            Conj::No,
            l.as_ref().transpose(),
            Conj::No,
            None,
            1.0,
            Parallelism::None,
        );
        for j in 0..3 {
            for i in 0..2 {
                assert_approx_eq!(back.read(i, j), b.read(i, j), 1e-12);
            }
        }
    }
}
