//! `dmat` core module.
//!
//! This module contains:
//! - the scalar traits ([`ComplexField`], [`RealField`]) every routine is generic over,
//! - local matrix storage and views ([`Mat`], [`MatRef`], [`MatMut`]) together with the
//!   single-process kernels that operate on them ([`mul`], [`solve`], [`householder`]),
//! - communicators over in-process threads or MPI ranks ([`comm`]) and the 2D process grid
//!   ([`grid`]),
//! - the distribution model ([`dist`]), distributed matrices ([`distmat`]) and the
//!   redistribution protocol ([`redist`], [`reduce`]),
//! - the panel factorization framework ([`panel`]) and distributed Level-3 building blocks
//!   ([`level3`]) that the factorization crates are written against.

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

use core::{
    fmt::Debug,
    ops::{Add, Div, Mul, Neg, Sub},
};
use num_complex::Complex;

pub mod comm;
pub mod dist;
pub mod distmat;
pub mod error;
pub mod grid;
pub mod householder;
pub mod level3;
pub mod mat;
pub mod mul;
pub mod panel;
pub mod permutation;
pub mod redist;
pub mod reduce;
pub mod solve;

pub use comm::{Comm, CommError, Message, Universe};
pub use dist::{Dist, DistSpec, GridShape};
pub use distmat::{DistMatMut, DistMatRef, DistMatrix};
pub use error::{DistError, Result};
pub use grid::{CommScope, Grid};
pub use mat::{Mat, MatMut, MatRef};
pub use panel::{BlockCtrl, PanelVariant};
pub use permutation::Permutation;

/// Complex floating point number type, where the real and imaginary parts each occupy 32 bits.
#[allow(non_camel_case_types)]
pub type c32 = Complex<f32>;
/// Complex floating point number type, where the real and imaginary parts each occupy 64 bits.
#[allow(non_camel_case_types)]
pub type c64 = Complex<f64>;

/// Indicates whether the corresponding operand should be conjugated or not.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Conj {
    /// Do not conjugate
    No,
    /// Do conjugate
    Yes,
}

impl Conj {
    #[inline]
    pub fn apply<T: ComplexField>(self, value: T) -> T {
        match self {
            Conj::No => value,
            Conj::Yes => value.conj(),
        }
    }

    /// Returns the composition of two conjugation flags.
    #[inline]
    pub fn compose(self, other: Conj) -> Conj {
        if self == other {
            Conj::No
        } else {
            Conj::Yes
        }
    }
}

/// Whether a triangular operand has an implicit unit diagonal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Diag {
    /// The diagonal is stored explicitly.
    NonUnit,
    /// The diagonal is implicitly one and the stored values are ignored.
    Unit,
}

/// Parallelism strategy used by the local kernels.
///
/// This only controls threading *inside* a single process; the distributed routines always
/// run one cooperating process per grid cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    /// No parallelism.
    ///
    /// The code is executed sequentially on the same thread that calls a function
    /// and passes this argument.
    None,
    /// Rayon parallelism.
    ///
    /// The contained value represents a hint about the number of threads an implementation
    /// should use. A value of `0` is treated as equivalent to `rayon::current_num_threads()`.
    Rayon(usize),
}

#[inline]
#[doc(hidden)]
pub fn join_raw(
    op_a: impl Send + FnOnce(Parallelism),
    op_b: impl Send + FnOnce(Parallelism),
    parallelism: Parallelism,
) {
    match parallelism {
        Parallelism::None => {
            op_a(parallelism);
            op_b(parallelism);
        }
        Parallelism::Rayon(n_threads) => {
            if n_threads == 1 {
                op_a(Parallelism::None);
                op_b(Parallelism::None);
            } else {
                let n_threads = if n_threads > 0 {
                    n_threads
                } else {
                    rayon::current_num_threads()
                };
                let parallelism = Parallelism::Rayon(n_threads - n_threads / 2);
                rayon::join(|| op_a(parallelism), || op_b(parallelism));
            }
        }
    }
}

#[inline]
#[doc(hidden)]
pub fn parallelism_degree(parallelism: Parallelism) -> usize {
    match parallelism {
        Parallelism::None => 1,
        Parallelism::Rayon(0) => rayon::current_num_threads(),
        Parallelism::Rayon(n_threads) => n_threads,
    }
}

/// Trait that describes a complex number field.
///
/// Real numbers can also be seen as complex numbers, where the imaginary part is always zero.
pub trait ComplexField:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + PartialEq
    + Send
    + Sync
    + Debug
    + comm::Message
    + 'static
{
    type Real: RealField;

    /// Returns a complex number whose real part is equal to `real`, and a zero imaginary part.
    fn from_real(real: Self::Real) -> Self;
    /// Returns the real and imaginary part.
    fn into_real_imag(self) -> (Self::Real, Self::Real);
    /// Returns the real part.
    #[inline(always)]
    fn real(self) -> Self::Real {
        self.into_real_imag().0
    }
    /// Returns the imaginary part.
    #[inline(always)]
    fn imag(self) -> Self::Real {
        self.into_real_imag().1
    }

    /// Returns the value representing `0.0`.
    fn zero() -> Self;
    /// Returns the value representing `1.0`.
    fn one() -> Self;
    /// Converts an `f64` to the closest value of this type.
    fn from_f64(value: f64) -> Self;

    /// Returns the inverse of the number.
    fn inv(self) -> Self;
    /// Returns the conjugate of the number.
    fn conj(self) -> Self;
    /// Returns the square root of the number.
    fn sqrt(self) -> Self;
    /// Returns the input, scaled by `factor`.
    #[inline(always)]
    fn scale(self, factor: Self::Real) -> Self {
        self * Self::from_real(factor)
    }
    /// Returns the magnitude used for pivot selection.
    fn score(self) -> Self::Real;
    /// Returns the squared modulus.
    #[inline(always)]
    fn abs2(self) -> Self::Real {
        (self * self.conj()).real()
    }
    /// Returns the modulus.
    #[inline(always)]
    fn abs(self) -> Self::Real {
        self.abs2().sqrt()
    }
}

/// Trait that describes a real number field.
pub trait RealField: ComplexField<Real = Self> + PartialOrd {
    /// Machine epsilon.
    fn epsilon() -> Self;

    #[inline(always)]
    fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

macro_rules! impl_real {
    ($ty: ty) => {
        impl RealField for $ty {
            #[inline(always)]
            fn epsilon() -> Self {
                <$ty>::EPSILON
            }
        }

        impl ComplexField for $ty {
            type Real = $ty;

            #[inline(always)]
            fn from_real(real: Self::Real) -> Self {
                real
            }

            #[inline(always)]
            fn into_real_imag(self) -> (Self::Real, Self::Real) {
                (self, 0.0)
            }

            #[inline(always)]
            fn zero() -> Self {
                0.0
            }

            #[inline(always)]
            fn one() -> Self {
                1.0
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            #[inline(always)]
            fn inv(self) -> Self {
                1.0 / self
            }

            #[inline(always)]
            fn conj(self) -> Self {
                self
            }

            #[inline(always)]
            fn sqrt(self) -> Self {
                <$ty>::sqrt(self)
            }

            #[inline(always)]
            fn score(self) -> Self::Real {
                <$ty>::abs(self)
            }

            #[inline(always)]
            fn abs2(self) -> Self::Real {
                self * self
            }

            #[inline(always)]
            fn abs(self) -> Self::Real {
                <$ty>::abs(self)
            }
        }
    };
}

macro_rules! impl_complex {
    ($ty: ty, $real: ty) => {
        impl ComplexField for $ty {
            type Real = $real;

            #[inline(always)]
            fn from_real(real: Self::Real) -> Self {
                Complex { re: real, im: 0.0 }
            }

            #[inline(always)]
            fn into_real_imag(self) -> (Self::Real, Self::Real) {
                (self.re, self.im)
            }

            #[inline(always)]
            fn zero() -> Self {
                Complex { re: 0.0, im: 0.0 }
            }

            #[inline(always)]
            fn one() -> Self {
                Complex { re: 1.0, im: 0.0 }
            }

            #[inline(always)]
            fn from_f64(value: f64) -> Self {
                Complex {
                    re: value as $real,
                    im: 0.0,
                }
            }

            #[inline(always)]
            fn inv(self) -> Self {
                let norm2 = self.re * self.re + self.im * self.im;
                Complex {
                    re: self.re / norm2,
                    im: -self.im / norm2,
                }
            }

            #[inline(always)]
            fn conj(self) -> Self {
                Complex {
                    re: self.re,
                    im: -self.im,
                }
            }

            #[inline(always)]
            fn sqrt(self) -> Self {
                Complex::<$real>::sqrt(self)
            }

            #[inline(always)]
            fn score(self) -> Self::Real {
                self.norm()
            }

            #[inline(always)]
            fn abs2(self) -> Self::Real {
                self.re * self.re + self.im * self.im
            }

            #[inline(always)]
            fn abs(self) -> Self::Real {
                self.norm()
            }
        }
    };
}

impl_real!(f32);
impl_real!(f64);
impl_complex!(c32, f32);
impl_complex!(c64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn complex_field_basics() {
        let z = c64 { re: 3.0, im: -4.0 };
        assert_approx_eq!(z.abs(), 5.0);
        assert_approx_eq!(z.abs2(), 25.0);
        assert_eq!(z.conj(), c64 { re: 3.0, im: 4.0 });

        let w = z * z.inv();
        assert_approx_eq!(w.re, 1.0);
        assert_approx_eq!(w.im, 0.0);

        let s = z.sqrt();
        let back = s * s;
        assert_approx_eq!(back.re, 3.0);
        assert_approx_eq!(back.im, -4.0);

        assert_eq!(<f32 as ComplexField>::from_f64(0.5), 0.5f32);
        assert_eq!(RealField::max(1.0f64, 2.0), 2.0);
    }

    #[test]
    fn conj_flags() {
        let z = c64 { re: 1.0, im: 2.0 };
        assert_eq!(Conj::Yes.apply(z), z.conj());
        assert_eq!(Conj::No.apply(z), z);
        assert_eq!(Conj::Yes.compose(Conj::Yes), Conj::No);
        assert_eq!(Conj::Yes.compose(Conj::No), Conj::Yes);
    }
}
