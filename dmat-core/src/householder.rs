//! Householder reflectors.
//!
//! A reflector is `H = I - tau * v * vᴴ`, where `v = [1; essential]` and `tau` is real, so that
//! `H` is both Hermitian and unitary. A block of `k` reflectors `H_0 H_1 … H_{k-1}` is stored
//! in compact WY form `I - V T Vᴴ`, with `V` unit lower trapezoidal and `T` upper triangular.

use assert2::assert as fancy_assert;
use reborrow::*;

use crate::{mul::matmul, ComplexField, Conj, Mat, MatMut, MatRef, Parallelism};

/// Computes the Householder reflector that maps `[head; tail]` to `[beta; 0]`.
///
/// `essential` holds `tail` on entry and the essential part of `v` on exit. Returns
/// `(tau, beta)`. A zero tail yields `tau = 0`, i.e. the identity.
pub fn make_householder_in_place<T: ComplexField>(
    essential: Option<MatMut<'_, T>>,
    head: T,
    tail_squared_norm: T::Real,
) -> (T, T) {
    let one = <T::Real as ComplexField>::one();
    let zero = <T::Real as ComplexField>::zero();

    if tail_squared_norm == zero {
        return (T::zero(), head);
    }
    let head_norm = head.abs();
    let norm = (head.abs2() + tail_squared_norm).sqrt();

    let sign = if head_norm == zero {
        T::one()
    } else {
        head.scale(head_norm.inv())
    };

    let signed_norm = sign.scale(norm);
    let head_with_beta = head + signed_norm;
    let inv = head_with_beta.inv();
    if let Some(mut essential) = essential {
        for j in 0..essential.ncols() {
            for i in 0..essential.nrows() {
                let value = essential.read(i, j) * inv;
                essential.write(i, j, value);
            }
        }
    }

    let two = one + one;
    let tau = two / (one + tail_squared_norm * inv.abs2());
    (T::from_real(tau), -signed_norm)
}

/// Applies `H = I - tau * v * vᴴ` to `matrix` from the left. The first row of `matrix`
/// corresponds to the implicit unit head of `v`.
#[track_caller]
pub fn apply_householder_on_the_left<T: ComplexField>(
    matrix: MatMut<'_, T>,
    essential: MatRef<'_, T>,
    tau: T,
) {
    fancy_assert!(essential.ncols() == 1);
    fancy_assert!(matrix.nrows() == 1 + essential.nrows());
    if tau == T::zero() {
        return;
    }

    let n = matrix.ncols();
    let (mut first_row, mut last_rows) = matrix.split_at_row(1);

    // w = vᴴ matrix
    let mut w = Mat::with_dims(|_, j| first_row.read(0, j), 1, n);
    matmul(
        w.as_mut(),
        essential.transpose(),
        Conj::Yes,
        last_rows.rb(),
        Conj::No,
        Some(T::one()),
        T::one(),
        Parallelism::None,
    );

    for j in 0..n {
        let value = first_row.read(0, j) - tau * w.read(0, j);
        first_row.write(0, j, value);
    }
    matmul(
        last_rows.rb_mut(),
        essential,
        Conj::No,
        w.as_ref(),
        Conj::No,
        Some(T::one()),
        -tau,
        Parallelism::None,
    );
}

/// Builds the upper triangular factor `T` of the compact WY representation from the Gram
/// matrix `G = Vᴴ V` of the reflectors and their scalars.
///
/// `T(i, i) = tau_i` and `T(0..i, i) = -tau_i T(0..i, 0..i) G(0..i, i)`.
#[track_caller]
pub fn upper_triangular_factor_from_gram<T: ComplexField>(
    mut factor: MatMut<'_, T>,
    gram: MatRef<'_, T>,
    taus: &[T],
) {
    let k = taus.len();
    fancy_assert!((factor.nrows(), factor.ncols()) == (k, k));
    fancy_assert!((gram.nrows(), gram.ncols()) == (k, k));

    factor.fill(T::zero());
    for i in 0..k {
        let tau = taus[i];
        factor.write(i, i, tau);
        for r in 0..i {
            let mut acc = T::zero();
            for c in r..i {
                acc = acc + factor.read(r, c) * gram.read(c, i);
            }
            factor.write(r, i, -tau * acc);
        }
    }
}

/// Returns the explicit unit lower trapezoidal basis `V` stored below the diagonal of
/// `packed`, for the first `k` columns.
pub fn explicit_basis<T: ComplexField>(packed: MatRef<'_, T>, k: usize) -> Mat<T> {
    Mat::with_dims(
        |i, j| {
            if i == j {
                T::one()
            } else if i > j {
                packed.read(i, j)
            } else {
                T::zero()
            }
        },
        packed.nrows(),
        k,
    )
}

/// Applies `Q = I - V T Vᴴ` (or `Qᴴ = I - V Tᴴ Vᴴ` when `conj` is [`Conj::Yes`]) to
/// `matrix` from the left. `basis` is the explicit `V`.
#[track_caller]
pub fn apply_block_householder_on_the_left<T: ComplexField>(
    mut matrix: MatMut<'_, T>,
    basis: MatRef<'_, T>,
    factor: MatRef<'_, T>,
    conj: Conj,
    parallelism: Parallelism,
) {
    fancy_assert!(matrix.nrows() == basis.nrows());
    fancy_assert!(factor.nrows() == basis.ncols());
    let k = basis.ncols();
    let n = matrix.ncols();

    let mut w = Mat::<T>::zeros(k, n);
    matmul(
        w.as_mut(),
        basis.transpose(),
        Conj::Yes,
        matrix.rb(),
        Conj::No,
        None,
        T::one(),
        parallelism,
    );
    let mut tw = Mat::<T>::zeros(k, n);
    let op_factor = match conj {
        Conj::No => factor,
        Conj::Yes => factor.transpose(),
    };
    matmul(
        tw.as_mut(),
        op_factor,
        conj,
        w.as_ref(),
        Conj::No,
        None,
        T::one(),
        parallelism,
    );
    matmul(
        matrix.rb_mut(),
        basis,
        Conj::No,
        tw.as_ref(),
        Conj::No,
        Some(T::one()),
        -T::one(),
        parallelism,
    );
}

/// Unblocked Householder QR of `matrix`: `R` is stored on and above the diagonal, the
/// essential parts of the reflectors below it, and their scalars in `taus`.
#[track_caller]
pub fn qr_in_place_unblocked<T: ComplexField>(mut matrix: MatMut<'_, T>, taus: &mut [T]) {
    let m = matrix.nrows();
    let n = matrix.ncols();
    let size = m.min(n);
    fancy_assert!(taus.len() == size);

    for k in 0..size {
        let (_, _, _, mut trailing) = matrix.rb_mut().split_at(k, k);
        let (mut col, mut rest) = trailing.rb_mut().split_at_col(1);
        let (mut head, tail) = col.rb_mut().split_at_row(1);
        let mut tail_squared_norm = <T::Real as ComplexField>::zero();
        for i in 0..tail.nrows() {
            tail_squared_norm = tail_squared_norm + tail.read(i, 0).abs2();
        }
        let (tau, beta) = make_householder_in_place(Some(tail), head.read(0, 0), tail_squared_norm);
        head.write(0, 0, beta);
        taus[k] = tau;

        let essential = col.rb().submatrix(1, 0, m - k - 1, 1);
        apply_householder_on_the_left(rest.rb_mut(), essential, tau);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c64;
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random(rng: &mut StdRng, m: usize, n: usize) -> Mat<c64> {
        Mat::with_dims(|_, _| c64::new(rng.gen(), rng.gen()), m, n)
    }

    #[test]
    fn reflector_annihilates_tail() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = random(&mut rng, 6, 1);
        let mut essential = x.as_ref().submatrix(1, 0, 5, 1).to_owned();
        let mut tail_sq = 0.0;
        for i in 0..5 {
            tail_sq += essential.read(i, 0).abs2();
        }
        let (tau, beta) = make_householder_in_place(Some(essential.as_mut()), x.read(0, 0), tail_sq);

        let mut y = x.clone();
        apply_householder_on_the_left(y.as_mut(), essential.as_ref(), tau);
        assert_approx_eq!(y.read(0, 0).re, beta.re, 1e-12);
        assert_approx_eq!(y.read(0, 0).im, beta.im, 1e-12);
        for i in 1..6 {
            assert_approx_eq!(y.read(i, 0).abs(), 0.0, 1e-12);
        }
        assert_approx_eq!(beta.abs(), x.norm_frobenius(), 1e-12);
    }

    #[test]
    fn zero_tail_gives_identity() {
        let mut essential = Mat::<f64>::zeros(3, 1);
        let (tau, beta) = make_householder_in_place(Some(essential.as_mut()), 0.0, 0.0);
        assert_eq!(tau, 0.0);
        assert_eq!(beta, 0.0);

        let head = c64::new(-2.0, 1.0);
        let (tau, beta) = make_householder_in_place::<c64>(None, head, 0.0);
        assert_eq!(tau, c64::zero());
        assert_eq!(beta, head);
    }

    #[test]
    fn compact_wy_matches_product_of_reflectors() {
        let mut rng = StdRng::seed_from_u64(2);
        let (m, k) = (7, 3);
        let a = random(&mut rng, m, k);
        let mut packed = a.clone();
        let mut taus = vec![c64::zero(); k];
        qr_in_place_unblocked(packed.as_mut(), &mut taus);

        let basis = explicit_basis(packed.as_ref(), k);
        let mut gram = Mat::<c64>::zeros(k, k);
        matmul(
            gram.as_mut(),
            basis.as_ref().transpose(),
            Conj::Yes,
            basis.as_ref(),
            Conj::No,
            None,
            c64::one(),
            Parallelism::None,
        );
        let mut factor = Mat::<c64>::zeros(k, k);
        upper_triangular_factor_from_gram(factor.as_mut(), gram.as_ref(), &taus);

        let b = random(&mut rng, m, 4);
        let mut by_block = b.clone();
        apply_block_householder_on_the_left(
            by_block.as_mut(),
            basis.as_ref(),
            factor.as_ref(),
            Conj::No,
            Parallelism::None,
        );
        let mut by_sequence = b.clone();
        for j in (0..k).rev() {
            let rows = by_sequence.as_mut().submatrix(j, 0, m - j, 4);
            apply_householder_on_the_left(
                rows,
                packed.as_ref().submatrix(j + 1, j, m - j - 1, 1),
                taus[j],
            );
        }
        for j in 0..4 {
            for i in 0..m {
                assert_approx_eq!(by_block.read(i, j).re, by_sequence.read(i, j).re, 1e-12);
                assert_approx_eq!(by_block.read(i, j).im, by_sequence.read(i, j).im, 1e-12);
            }
        }

        // Qᴴ A = R
        let mut qh_a = a.clone();
        apply_block_householder_on_the_left(
            qh_a.as_mut(),
            basis.as_ref(),
            factor.as_ref(),
            Conj::Yes,
            Parallelism::None,
        );
        for j in 0..k {
            for i in 0..m {
                let expected = if i <= j { packed.read(i, j) } else { c64::zero() };
                assert_approx_eq!(qh_a.read(i, j).re, expected.re, 1e-12);
                assert_approx_eq!(qh_a.read(i, j).im, expected.im, 1e-12);
            }
        }
    }
}
