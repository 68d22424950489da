//! Local dense storage.
//!
//! [`Mat`] owns a column-major buffer whose leading dimension is its row count. [`MatRef`] and
//! [`MatMut`] are strided windows into such a buffer, described by a base pointer, an extent
//! and two element strides. Every distributed matrix keeps the entries it owns in a [`Mat`],
//! and the local kernels in [`crate::mul`], [`crate::solve`] and [`crate::householder`]
//! operate on windows.

use assert2::assert as fancy_assert;
use core::{fmt::Debug, marker::PhantomData};
use reborrow::*;

use crate::ComplexField;

/// Extent and element strides of a window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Shape {
    rows: usize,
    cols: usize,
    rs: isize,
    cs: isize,
}

impl Shape {
    fn col_major(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            rs: 1,
            cs: rows as isize,
        }
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> isize {
        i as isize * self.rs + j as isize * self.cs
    }

    #[track_caller]
    #[inline]
    fn element(&self, i: usize, j: usize) -> isize {
        fancy_assert!(i < self.rows);
        fancy_assert!(j < self.cols);
        self.offset(i, j)
    }

    /// Offset of the window's origin, and its shape.
    #[track_caller]
    #[inline]
    fn window(&self, i: usize, j: usize, rows: usize, cols: usize) -> (isize, Shape) {
        fancy_assert!(i <= self.rows);
        fancy_assert!(j <= self.cols);
        fancy_assert!(rows <= self.rows - i);
        fancy_assert!(cols <= self.cols - j);
        (self.offset(i, j), Shape { rows, cols, ..*self })
    }

    #[inline]
    fn transposed(self) -> Shape {
        Shape {
            rows: self.cols,
            cols: self.rows,
            rs: self.cs,
            cs: self.rs,
        }
    }
}

/// Shared strided window over local elements.
pub struct MatRef<'a, T> {
    ptr: *const T,
    shape: Shape,
    _borrow: PhantomData<&'a T>,
}

/// Exclusive strided window over local elements.
pub struct MatMut<'a, T> {
    ptr: *mut T,
    shape: Shape,
    _borrow: PhantomData<&'a mut T>,
}

unsafe impl<T: Sync> Send for MatRef<'_, T> {}
unsafe impl<T: Sync> Sync for MatRef<'_, T> {}
unsafe impl<T: Send> Send for MatMut<'_, T> {}
unsafe impl<T: Sync> Sync for MatMut<'_, T> {}

impl<T> Copy for MatRef<'_, T> {}
impl<T> Clone for MatRef<'_, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<'b, T> Reborrow<'b> for MatRef<'_, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        *self
    }
}

impl<'b, T> ReborrowMut<'b> for MatRef<'_, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        *self
    }
}

impl<'b, T> Reborrow<'b> for MatMut<'_, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        MatRef {
            ptr: self.ptr,
            shape: self.shape,
            _borrow: PhantomData,
        }
    }
}

impl<'b, T> ReborrowMut<'b> for MatMut<'_, T> {
    type Target = MatMut<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        MatMut {
            ptr: self.ptr,
            shape: self.shape,
            _borrow: PhantomData,
        }
    }
}

impl<'a, T> IntoConst for MatRef<'a, T> {
    type Target = MatRef<'a, T>;
    #[inline]
    fn into_const(self) -> Self::Target {
        self
    }
}

impl<'a, T> IntoConst for MatMut<'a, T> {
    type Target = MatRef<'a, T>;
    #[inline]
    fn into_const(self) -> Self::Target {
        MatRef {
            ptr: self.ptr,
            shape: self.shape,
            _borrow: PhantomData,
        }
    }
}

impl<'a, T> MatRef<'a, T> {
    #[inline]
    fn with_shape(self, offset: isize, shape: Shape) -> Self {
        Self {
            ptr: self.ptr.wrapping_offset(offset),
            shape,
            _borrow: PhantomData,
        }
    }

    /// Base pointer, for handing the window to an external kernel along with
    /// [`Self::row_stride`] and [`Self::col_stride`].
    #[inline]
    pub fn as_ptr(self) -> *const T {
        self.ptr
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.shape.rows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.shape.cols
    }

    #[inline]
    pub fn row_stride(&self) -> isize {
        self.shape.rs
    }

    #[inline]
    pub fn col_stride(&self) -> isize {
        self.shape.cs
    }

    #[track_caller]
    #[inline]
    fn at(self, i: usize, j: usize) -> &'a T {
        let offset = self.shape.element(i, j);
        unsafe { &*self.ptr.offset(offset) }
    }

    #[track_caller]
    #[inline]
    pub fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        *self.at(i, j)
    }

    /// Window of `nrows × ncols` elements whose top left corner is `(i, j)`.
    #[track_caller]
    #[inline]
    pub fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> Self {
        let (offset, shape) = self.shape.window(i, j, nrows, ncols);
        self.with_shape(offset, shape)
    }

    /// Quadrants around `(i, j)`: top left, top right, bottom left, bottom right.
    #[track_caller]
    #[inline]
    pub fn split_at(self, i: usize, j: usize) -> (Self, Self, Self, Self) {
        let (top, bot) = self.split_at_row(i);
        let (tl, tr) = top.split_at_col(j);
        let (bl, br) = bot.split_at_col(j);
        (tl, tr, bl, br)
    }

    #[track_caller]
    #[inline]
    pub fn split_at_row(self, i: usize) -> (Self, Self) {
        let (m, n) = (self.nrows(), self.ncols());
        fancy_assert!(i <= m);
        (self.submatrix(0, 0, i, n), self.submatrix(i, 0, m - i, n))
    }

    #[track_caller]
    #[inline]
    pub fn split_at_col(self, j: usize) -> (Self, Self) {
        let (m, n) = (self.nrows(), self.ncols());
        fancy_assert!(j <= n);
        (self.submatrix(0, 0, m, j), self.submatrix(0, j, m, n - j))
    }

    #[track_caller]
    #[inline]
    pub fn col(self, j: usize) -> Self {
        self.submatrix(0, j, self.nrows(), 1)
    }

    #[track_caller]
    #[inline]
    pub fn row(self, i: usize) -> Self {
        self.submatrix(i, 0, 1, self.ncols())
    }

    #[inline]
    pub fn transpose(self) -> Self {
        self.with_shape(0, self.shape.transposed())
    }

    pub fn to_owned(self) -> Mat<T>
    where
        T: Clone,
    {
        Mat::with_dims(|i, j| self.at(i, j).clone(), self.nrows(), self.ncols())
    }

    /// Elements in column-major order.
    pub fn to_col_major_vec(self) -> Vec<T>
    where
        T: Clone,
    {
        (0..self.ncols())
            .flat_map(|j| (0..self.nrows()).map(move |i| self.at(i, j).clone()))
            .collect()
    }
}

impl<'a, T> MatMut<'a, T> {
    #[inline]
    fn with_shape(self, offset: isize, shape: Shape) -> Self {
        Self {
            ptr: self.ptr.wrapping_offset(offset),
            shape,
            _borrow: PhantomData,
        }
    }

    #[inline]
    pub fn as_ptr(self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.shape.rows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.shape.cols
    }

    #[inline]
    pub fn row_stride(&self) -> isize {
        self.shape.rs
    }

    #[inline]
    pub fn col_stride(&self) -> isize {
        self.shape.cs
    }

    #[track_caller]
    #[inline]
    fn at(self, i: usize, j: usize) -> &'a mut T {
        let offset = self.shape.element(i, j);
        unsafe { &mut *self.ptr.offset(offset) }
    }

    #[track_caller]
    #[inline]
    pub fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        self.rb().read(i, j)
    }

    #[track_caller]
    #[inline]
    pub fn write(&mut self, i: usize, j: usize, value: T) {
        *self.rb_mut().at(i, j) = value;
    }

    #[track_caller]
    #[inline]
    pub fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> Self {
        let (offset, shape) = self.shape.window(i, j, nrows, ncols);
        self.with_shape(offset, shape)
    }

    /// Disjoint quadrants around `(i, j)`: top left, top right, bottom left, bottom right.
    #[track_caller]
    #[inline]
    pub fn split_at(self, i: usize, j: usize) -> (Self, Self, Self, Self) {
        let (top, bot) = self.split_at_row(i);
        let (tl, tr) = top.split_at_col(j);
        let (bl, br) = bot.split_at_col(j);
        (tl, tr, bl, br)
    }

    #[track_caller]
    #[inline]
    pub fn split_at_row(self, i: usize) -> (Self, Self) {
        let (m, n) = (self.nrows(), self.ncols());
        fancy_assert!(i <= m);
        let (_, top) = self.shape.window(0, 0, i, n);
        let (offset, bot) = self.shape.window(i, 0, m - i, n);
        (
            Self {
                ptr: self.ptr,
                shape: top,
                _borrow: PhantomData,
            },
            self.with_shape(offset, bot),
        )
    }

    #[track_caller]
    #[inline]
    pub fn split_at_col(self, j: usize) -> (Self, Self) {
        let (l, r) = self.transpose().split_at_row(j);
        (l.transpose(), r.transpose())
    }

    #[track_caller]
    #[inline]
    pub fn col(self, j: usize) -> Self {
        let m = self.nrows();
        self.submatrix(0, j, m, 1)
    }

    #[track_caller]
    #[inline]
    pub fn row(self, i: usize) -> Self {
        let n = self.ncols();
        self.submatrix(i, 0, 1, n)
    }

    #[inline]
    pub fn transpose(self) -> Self {
        let shape = self.shape.transposed();
        self.with_shape(0, shape)
    }

    /// Overwrites the window with `src`, which must have the same dimensions.
    #[track_caller]
    pub fn copy_from(&mut self, src: MatRef<'_, T>)
    where
        T: Clone,
    {
        fancy_assert!((self.nrows(), self.ncols()) == (src.nrows(), src.ncols()));
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                *self.rb_mut().at(i, j) = src.at(i, j).clone();
            }
        }
    }

    /// Overwrites the window with elements listed in column-major order.
    #[track_caller]
    pub fn copy_from_col_major(&mut self, src: &[T])
    where
        T: Clone,
    {
        let m = self.nrows();
        fancy_assert!(src.len() == m * self.ncols());
        for (idx, value) in src.iter().enumerate() {
            *self.rb_mut().at(idx % m, idx / m) = value.clone();
        }
    }

    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                *self.rb_mut().at(i, j) = value.clone();
            }
        }
    }

    #[track_caller]
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        fancy_assert!(a < self.nrows());
        fancy_assert!(b < self.nrows());
        if a == b {
            return;
        }
        for j in 0..self.ncols() {
            let pa = self.shape.offset(a, j);
            let pb = self.shape.offset(b, j);
            unsafe { core::ptr::swap(self.ptr.offset(pa), self.ptr.offset(pb)) };
        }
    }
}

impl<'a, U, T: PartialEq<U>> PartialEq<MatRef<'a, U>> for MatRef<'a, T> {
    fn eq(&self, other: &MatRef<'a, U>) -> bool {
        (self.nrows(), self.ncols()) == (other.nrows(), other.ncols())
            && (0..self.ncols())
                .all(|j| (0..self.nrows()).all(|i| self.at(i, j) == other.at(i, j)))
    }
}

impl<T: Debug> Debug for MatRef<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let rows = (0..self.nrows())
            .map(|i| (0..self.ncols()).map(|j| self.at(i, j)).collect::<Vec<_>>());
        f.debug_list().entries(rows).finish()
    }
}

impl<T: Debug> Debug for MatMut<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.rb().fmt(f)
    }
}

/// Owned column-major matrix.
#[derive(Clone)]
pub struct Mat<T> {
    data: Vec<T>,
    nrows: usize,
    ncols: usize,
}

impl<T> Default for Mat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mat<T> {
    /// Empty `0 × 0` matrix. Does not allocate.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            nrows: 0,
            ncols: 0,
        }
    }

    /// `nrows × ncols` matrix whose entry `(i, j)` is `f(i, j)`.
    pub fn with_dims(mut f: impl FnMut(usize, usize) -> T, nrows: usize, ncols: usize) -> Self {
        let data = (0..nrows * ncols)
            .map(|idx| f(idx % nrows, idx / nrows))
            .collect();
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, T> {
        MatRef {
            ptr: self.data.as_ptr(),
            shape: Shape::col_major(self.nrows, self.ncols),
            _borrow: PhantomData,
        }
    }

    #[inline]
    pub fn as_mut(&mut self) -> MatMut<'_, T> {
        MatMut {
            ptr: self.data.as_mut_ptr(),
            shape: Shape::col_major(self.nrows, self.ncols),
            _borrow: PhantomData,
        }
    }

    #[track_caller]
    #[inline]
    pub fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        self.as_ref().read(i, j)
    }

    #[track_caller]
    #[inline]
    pub fn write(&mut self, i: usize, j: usize, value: T) {
        self.as_mut().write(i, j, value)
    }
}

impl<T: ComplexField> Mat<T> {
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![T::zero(); nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Rectangular identity: ones on the main diagonal, zeros elsewhere.
    pub fn identity(nrows: usize, ncols: usize) -> Self {
        Self::with_dims(
            |i, j| if i == j { T::one() } else { T::zero() },
            nrows,
            ncols,
        )
    }

    pub fn norm_frobenius(&self) -> T::Real {
        self.data
            .iter()
            .fold(<T::Real as ComplexField>::zero(), |acc, x| acc + x.abs2())
            .sqrt()
    }
}

impl<U, T: PartialEq<U>> PartialEq<Mat<U>> for Mat<T> {
    #[inline]
    fn eq(&self, other: &Mat<U>) -> bool {
        (self.nrows, self.ncols) == (other.nrows, other.ncols) && self.data == other.data
    }
}

impl<T: Debug> Debug for Mat<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_ref().fmt(f)
    }
}
