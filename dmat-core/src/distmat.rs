//! Distributed matrices and their borrowed views.
//!
//! A [`DistMatrix`] owns the local buffer holding exactly the entries that its layout maps to
//! the calling process. [`DistMatRef`] and [`DistMatMut`] borrow a rectangular block of a
//! parent matrix, so that a view can never outlive the matrix it views.
//!
//! Operations documented as *collective* must be called by every process of the grid, in
//! the same order.

use assert2::assert as fancy_assert;
use reborrow::*;
use std::sync::Arc;

use crate::{
    dist::{AxisMap, Coord, Dist, DistSpec, Layout},
    error::{DistError, Result},
    grid::Grid,
    redist, ComplexField, Mat, MatMut, MatRef,
};

/// Matrix distributed over a process grid.
#[derive(Debug)]
pub struct DistMatrix<T> {
    layout: Layout,
    grid: Arc<Grid>,
    local: Mat<T>,
}

/// Immutable view over a block of a distributed matrix.
#[derive(Debug)]
pub struct DistMatRef<'a, T> {
    layout: Layout,
    grid: &'a Arc<Grid>,
    local: MatRef<'a, T>,
}

/// Mutable view over a block of a distributed matrix.
#[derive(Debug)]
pub struct DistMatMut<'a, T> {
    layout: Layout,
    grid: &'a Arc<Grid>,
    local: MatMut<'a, T>,
}

impl<'a, T> Copy for DistMatRef<'a, T> {}
impl<'a, T> Clone for DistMatRef<'a, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<'b, 'a, T> Reborrow<'b> for DistMatRef<'a, T> {
    type Target = DistMatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        *self
    }
}
impl<'b, 'a, T> ReborrowMut<'b> for DistMatRef<'a, T> {
    type Target = DistMatRef<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        *self
    }
}
impl<'b, 'a, T> Reborrow<'b> for DistMatMut<'a, T> {
    type Target = DistMatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        DistMatRef {
            layout: self.layout,
            grid: self.grid,
            local: self.local.rb(),
        }
    }
}
impl<'b, 'a, T> ReborrowMut<'b> for DistMatMut<'a, T> {
    type Target = DistMatMut<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        DistMatMut {
            layout: self.layout,
            grid: self.grid,
            local: self.local.rb_mut(),
        }
    }
}
impl<'a, T> IntoConst for DistMatMut<'a, T> {
    type Target = DistMatRef<'a, T>;
    #[inline]
    fn into_const(self) -> Self::Target {
        DistMatRef {
            layout: self.layout,
            grid: self.grid,
            local: self.local.into_const(),
        }
    }
}

macro_rules! impl_accessors {
    () => {
        /// Size and layout of the matrix.
        #[inline]
        pub fn layout(&self) -> Layout {
            self.layout
        }

        #[inline]
        pub fn spec(&self) -> DistSpec {
            self.layout.spec
        }

        #[inline]
        pub fn grid(&self) -> &Arc<Grid> {
            &self.grid
        }

        #[inline]
        pub fn height(&self) -> usize {
            self.layout.height
        }

        #[inline]
        pub fn width(&self) -> usize {
            self.layout.width
        }

        #[inline]
        pub fn col_dist(&self) -> Dist {
            self.layout.spec.col_dist
        }

        #[inline]
        pub fn row_dist(&self) -> Dist {
            self.layout.spec.row_dist
        }

        #[inline]
        pub fn col_align(&self) -> usize {
            self.layout.spec.col_align
        }

        #[inline]
        pub fn row_align(&self) -> usize {
            self.layout.spec.row_align
        }

        #[inline]
        pub fn root(&self) -> usize {
            self.layout.spec.root
        }

        #[inline]
        pub fn local_height(&self) -> usize {
            self.local.nrows()
        }

        #[inline]
        pub fn local_width(&self) -> usize {
            self.local.ncols()
        }

        /// Index map of the rows owned by the calling process, if any.
        #[inline]
        pub fn col_map(&self) -> Option<AxisMap> {
            self.layout.col_map(self.grid.shape(), self.grid.coord())
        }

        /// Index map of the columns owned by the calling process, if any.
        #[inline]
        pub fn row_map(&self) -> Option<AxisMap> {
            self.layout.row_map(self.grid.shape(), self.grid.coord())
        }

        /// Whether the calling process may own entries of this matrix.
        #[inline]
        pub fn participating(&self) -> bool {
            self.layout
                .maps(self.grid.shape(), self.grid.coord())
                .is_some()
        }

        /// Whether the calling process holds entry `(i, j)`.
        #[inline]
        pub fn is_owner(&self, i: usize, j: usize) -> bool {
            i < self.height()
                && j < self.width()
                && self
                    .layout
                    .owner(self.grid.shape(), i, j)
                    .contains(self.grid.coord())
        }

        /// Global row index of local row `iloc`.
        #[track_caller]
        #[inline]
        pub fn global_row(&self, iloc: usize) -> usize {
            fancy_assert!(iloc < self.local_height());
            match self.col_map() {
                Some(map) => map.global(iloc),
                None => unreachable!(),
            }
        }

        /// Global column index of local column `jloc`.
        #[track_caller]
        #[inline]
        pub fn global_col(&self, jloc: usize) -> usize {
            fancy_assert!(jloc < self.local_width());
            match self.row_map() {
                Some(map) => map.global(jloc),
                None => unreachable!(),
            }
        }

        /// Local index of global row `i`, if the calling process owns it.
        #[inline]
        pub fn local_row(&self, i: usize) -> Option<usize> {
            if i >= self.height() {
                return None;
            }
            self.col_map()?.local(i)
        }

        /// Local index of global column `j`, if the calling process owns it.
        #[inline]
        pub fn local_col(&self, j: usize) -> Option<usize> {
            if j >= self.width() {
                return None;
            }
            self.row_map()?.local(j)
        }

        #[track_caller]
        #[inline]
        pub fn get_local(&self, iloc: usize, jloc: usize) -> T {
            self.local.read(iloc, jloc)
        }
    };
}

macro_rules! impl_mut_accessors {
    () => {
        #[track_caller]
        #[inline]
        pub fn set_local(&mut self, iloc: usize, jloc: usize, value: T) {
            self.local_mut().write(iloc, jloc, value)
        }

        /// Sets entry `(i, j)` on the processes that own it. Other processes do nothing.
        #[track_caller]
        pub fn set(&mut self, i: usize, j: usize, value: T) {
            fancy_assert!(i < self.height());
            fancy_assert!(j < self.width());
            if let (Some(il), Some(jl)) = (self.local_row(i), self.local_col(j)) {
                self.set_local(il, jl, value);
            }
        }

        /// Sets every entry to `value`.
        pub fn fill(&mut self, value: T) {
            self.local_mut().fill(value)
        }

        /// Applies `f(i, j, value)` to every locally owned entry, in place.
        pub fn update_local(&mut self, mut f: impl FnMut(usize, usize, T) -> T) {
            let (Some(cmap), Some(rmap)) = (self.col_map(), self.row_map()) else {
                return;
            };
            let mut local = self.local_mut();
            for jl in 0..local.ncols() {
                let j = rmap.global(jl);
                for il in 0..local.nrows() {
                    let i = cmap.global(il);
                    let value = f(i, j, local.read(il, jl));
                    local.write(il, jl, value);
                }
            }
        }
    };
}

/// Offsets into the local buffer of the block starting at `(i, j)`.
fn local_offsets(layout: Layout, grid: &Grid, i: usize, j: usize) -> (usize, usize) {
    match layout.maps(grid.shape(), grid.coord()) {
        Some((cmap, rmap)) => (cmap.count_below(i), rmap.count_below(j)),
        None => (0, 0),
    }
}

#[track_caller]
fn check_block(layout: Layout, i: usize, j: usize, m: usize, n: usize) {
    fancy_assert!(i <= layout.height);
    fancy_assert!(j <= layout.width);
    fancy_assert!(m <= layout.height - i);
    fancy_assert!(n <= layout.width - j);
}

impl<'a, T: ComplexField> DistMatRef<'a, T> {
    impl_accessors!();

    /// Local buffer.
    #[inline]
    pub fn local(&self) -> MatRef<'a, T> {
        self.local
    }

    /// Builds a view from its parts.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions of `local` differ from the local shape implied by `layout`.
    #[track_caller]
    pub fn from_parts(layout: Layout, grid: &'a Arc<Grid>, local: MatRef<'a, T>) -> Self {
        let expected = layout.local_shape(grid.shape(), grid.coord());
        fancy_assert!((local.nrows(), local.ncols()) == expected);
        Self {
            layout,
            grid,
            local,
        }
    }

    /// View over the block starting at `(i, j)` with dimensions `(m, n)`. The distribution is
    /// kept and the alignments are shifted by the block origin.
    #[track_caller]
    pub fn submatrix(self, i: usize, j: usize, m: usize, n: usize) -> Self {
        check_block(self.layout, i, j, m, n);
        let shape = self.grid.shape();
        let layout = self.layout.submatrix(shape, i, j, m, n);
        let (li, lj) = local_offsets(self.layout, self.grid, i, j);
        let (lm, ln) = layout.local_shape(shape, self.grid.coord());
        Self {
            layout,
            grid: self.grid,
            local: self.local.submatrix(li, lj, lm, ln),
        }
    }

    /// Splits the matrix into four blocks: top left, top right, bottom left, bottom right.
    #[track_caller]
    pub fn split_at(self, i: usize, j: usize) -> (Self, Self, Self, Self) {
        let (m, n) = (self.height(), self.width());
        fancy_assert!(i <= m);
        fancy_assert!(j <= n);
        (
            self.submatrix(0, 0, i, j),
            self.submatrix(0, j, i, n - j),
            self.submatrix(i, 0, m - i, j),
            self.submatrix(i, j, m - i, n - j),
        )
    }

    #[track_caller]
    pub fn split_at_row(self, i: usize) -> (Self, Self) {
        let (m, n) = (self.height(), self.width());
        fancy_assert!(i <= m);
        (self.submatrix(0, 0, i, n), self.submatrix(i, 0, m - i, n))
    }

    #[track_caller]
    pub fn split_at_col(self, j: usize) -> (Self, Self) {
        let (m, n) = (self.height(), self.width());
        fancy_assert!(j <= n);
        (self.submatrix(0, 0, m, j), self.submatrix(0, j, m, n - j))
    }

    /// Transposed view. This does not communicate: dimensions, distributions and alignments
    /// are swapped.
    #[inline]
    pub fn transpose(self) -> Self {
        Self {
            layout: self.layout.transpose(),
            grid: self.grid,
            local: self.local.transpose(),
        }
    }

    /// Collective: returns entry `(i, j)` on every process.
    pub fn get(self, i: usize, j: usize) -> Result<T> {
        fancy_assert!(i < self.height());
        fancy_assert!(j < self.width());
        let shape = self.grid.shape();
        let root = self
            .layout
            .owner(shape, i, j)
            .designated(Coord::new(0, 0));
        let value = if root == self.grid.coord() {
            match (self.local_row(i), self.local_col(j)) {
                (Some(il), Some(jl)) => Some(self.local.read(il, jl)),
                _ => unreachable!(),
            }
        } else {
            None
        };
        Ok(self.grid.comm().broadcast(shape.rank_of(root), value)?)
    }

    /// Collective: gathers the whole matrix on every process.
    pub fn to_local(self) -> Result<Mat<T>> {
        let replicated =
            DistMatrix::redistributed_from(self, DistSpec::new(Dist::Star, Dist::Star))?;
        Ok(replicated.into_local())
    }

    /// Collective: copies the rows `rows` and columns `cols` into a new matrix with the same
    /// distributions.
    pub fn select(self, rows: &[usize], cols: &[usize]) -> Result<DistMatrix<T>> {
        for &i in rows {
            fancy_assert!(i < self.height());
        }
        for &j in cols {
            fancy_assert!(j < self.width());
        }
        let spec = DistSpec::new(self.col_dist(), self.row_dist()).with_root(self.root());
        let mut out = DistMatrix::zeros(rows.len(), cols.len(), self.grid, spec)?;
        redist::pull(self, out.as_mut(), |i, j| (rows[i], cols[j]))?;
        Ok(out)
    }

    /// Collective: extracts the diagonal starting at `(max(0, -offset), max(0, offset))` into
    /// a column vector distributed as `[MD, STAR]`.
    ///
    /// For an `[MC, MR]` matrix the vector is aligned with the diagonal, so that the
    /// extraction does not communicate.
    pub fn diagonal(self, offset: isize) -> Result<DistMatrix<T>> {
        let (i0, j0) = if offset >= 0 {
            (0, offset as usize)
        } else {
            (offset.unsigned_abs(), 0)
        };
        let len = if i0 < self.height() && j0 < self.width() {
            (self.height() - i0).min(self.width() - j0)
        } else {
            0
        };

        let shape = self.grid.shape();
        if (self.col_dist(), self.row_dist()) == (Dist::Mc, Dist::Mr) {
            let (h, w, g) = (shape.height(), shape.width(), shape.gcd());
            let row0 = (self.col_align() + i0) % h;
            let col0 = (self.row_align() + j0) % w;
            let path = (col0 + g - row0 % g) % g;
            let align = (0..shape.lcm())
                .find(|&a| a % h == row0 && (a + path) % w == col0)
                .unwrap_or(0);
            let spec = DistSpec::new(Dist::Md, Dist::Star)
                .with_align(align, 0)
                .with_root(path);
            let mut out = DistMatrix::zeros(len, 1, self.grid, spec)?;
            if let Some(map) = out.col_map() {
                for kl in 0..out.local_height() {
                    let k = map.global(kl);
                    match (self.local_row(i0 + k), self.local_col(j0 + k)) {
                        (Some(il), Some(jl)) => out.set_local(kl, 0, self.local.read(il, jl)),
                        _ => unreachable!(),
                    }
                }
            }
            Ok(out)
        } else {
            let spec = DistSpec::new(Dist::Md, Dist::Star);
            let mut out = DistMatrix::zeros(len, 1, self.grid, spec)?;
            redist::pull(self, out.as_mut(), |k, _| (i0 + k, j0 + k))?;
            Ok(out)
        }
    }

    /// Collective: Frobenius norm.
    pub fn norm_frobenius(self) -> Result<T::Real> {
        crate::reduce::frobenius_norm(self)
    }
}

impl<'a, T: ComplexField> DistMatMut<'a, T> {
    impl_accessors!();
    impl_mut_accessors!();

    #[inline]
    pub fn local(&self) -> MatRef<'_, T> {
        self.local.rb()
    }

    #[inline]
    pub fn local_mut(&mut self) -> MatMut<'_, T> {
        self.local.rb_mut()
    }

    #[inline]
    pub fn into_local(self) -> MatMut<'a, T> {
        self.local
    }

    #[track_caller]
    pub fn submatrix(self, i: usize, j: usize, m: usize, n: usize) -> Self {
        check_block(self.layout, i, j, m, n);
        let shape = self.grid.shape();
        let layout = self.layout.submatrix(shape, i, j, m, n);
        let (li, lj) = local_offsets(self.layout, self.grid, i, j);
        let (lm, ln) = layout.local_shape(shape, self.grid.coord());
        Self {
            layout,
            grid: self.grid,
            local: self.local.submatrix(li, lj, lm, ln),
        }
    }

    /// Splits the matrix into four disjoint blocks: top left, top right, bottom left, bottom
    /// right.
    #[track_caller]
    pub fn split_at(self, i: usize, j: usize) -> (Self, Self, Self, Self) {
        let (m, n) = (self.height(), self.width());
        fancy_assert!(i <= m);
        fancy_assert!(j <= n);
        let shape = self.grid.shape();
        let (li, lj) = local_offsets(self.layout, self.grid, i, j);
        let grid = self.grid;
        let layout = self.layout;
        let (tl, tr, bl, br) = self.local.split_at(li, lj);
        (
            Self {
                layout: layout.submatrix(shape, 0, 0, i, j),
                grid,
                local: tl,
            },
            Self {
                layout: layout.submatrix(shape, 0, j, i, n - j),
                grid,
                local: tr,
            },
            Self {
                layout: layout.submatrix(shape, i, 0, m - i, j),
                grid,
                local: bl,
            },
            Self {
                layout: layout.submatrix(shape, i, j, m - i, n - j),
                grid,
                local: br,
            },
        )
    }

    #[track_caller]
    pub fn split_at_row(self, i: usize) -> (Self, Self) {
        let (_, top, _, bot) = self.split_at(i, 0);
        (top, bot)
    }

    #[track_caller]
    pub fn split_at_col(self, j: usize) -> (Self, Self) {
        let (_, _, left, right) = self.split_at(0, j);
        (left, right)
    }

    #[inline]
    pub fn transpose(self) -> Self {
        Self {
            layout: self.layout.transpose(),
            grid: self.grid,
            local: self.local.transpose(),
        }
    }

    /// Collective: copies `src` into `self`, converting between distributions.
    pub fn copy_from(&mut self, src: DistMatRef<'_, T>) -> Result<()> {
        redist::copy(src, self.rb_mut())
    }
}

impl<T: ComplexField> DistMatrix<T> {
    impl_accessors!();
    impl_mut_accessors!();

    /// Returns an empty `0 × 0` matrix with the given distribution.
    pub fn new(grid: &Arc<Grid>, spec: DistSpec) -> Result<Self> {
        Self::zeros(0, 0, grid, spec)
    }

    /// Returns a `height × width` matrix of zeros with the given distribution.
    pub fn zeros(height: usize, width: usize, grid: &Arc<Grid>, spec: DistSpec) -> Result<Self> {
        Self::from_fn(height, width, grid, spec, |_, _| T::zero())
    }

    /// Returns a `height × width` matrix whose owned entries are `f(i, j)`. `f` is only
    /// called for the entries owned by the calling process.
    pub fn from_fn(
        height: usize,
        width: usize,
        grid: &Arc<Grid>,
        spec: DistSpec,
        mut f: impl FnMut(usize, usize) -> T,
    ) -> Result<Self> {
        let spec = spec.validate(grid.shape())?;
        let layout = Layout {
            height,
            width,
            spec,
        };
        let local = match layout.maps(grid.shape(), grid.coord()) {
            Some((cmap, rmap)) => Mat::with_dims(
                |il, jl| f(cmap.global(il), rmap.global(jl)),
                cmap.local_len(height),
                rmap.local_len(width),
            ),
            None => Mat::new(),
        };
        Ok(Self {
            layout,
            grid: grid.clone(),
            local,
        })
    }

    /// Each process picks the entries it owns from `global`, which must hold the same values
    /// on every process.
    pub fn from_local(global: &Mat<T>, grid: &Arc<Grid>, spec: DistSpec) -> Result<Self> {
        Self::from_fn(global.nrows(), global.ncols(), grid, spec, |i, j| {
            global.read(i, j)
        })
    }

    /// Collective: returns a copy of `src` with the distribution `spec`.
    pub fn redistributed_from(src: DistMatRef<'_, T>, spec: DistSpec) -> Result<Self> {
        let mut out = Self::zeros(src.height(), src.width(), src.grid, spec)?;
        redist::copy(src, out.as_mut())?;
        Ok(out)
    }

    /// Builds a matrix from a layout and the matching local buffer.
    pub fn from_parts(layout: Layout, grid: &Arc<Grid>, local: Mat<T>) -> Result<Self> {
        let spec = layout.spec.validate(grid.shape())?;
        let layout = Layout { spec, ..layout };
        let expected = layout.local_shape(grid.shape(), grid.coord());
        let got = (local.nrows(), local.ncols());
        if got != expected {
            return Err(DistError::ShapeMismatch {
                op: "from_parts",
                expected,
                got,
            });
        }
        Ok(Self {
            layout,
            grid: grid.clone(),
            local,
        })
    }

    /// Moves the contents out, leaving an empty matrix with the same distribution behind.
    pub fn take(&mut self) -> Self {
        let empty = Self {
            layout: Layout {
                height: 0,
                width: 0,
                spec: self.layout.spec,
            },
            grid: self.grid.clone(),
            local: Mat::new(),
        };
        core::mem::replace(self, empty)
    }

    #[inline]
    pub fn local(&self) -> MatRef<'_, T> {
        self.local.as_ref()
    }

    #[inline]
    pub fn local_mut(&mut self) -> MatMut<'_, T> {
        self.local.as_mut()
    }

    #[inline]
    pub fn into_local(self) -> Mat<T> {
        self.local
    }

    #[inline]
    pub fn as_ref(&self) -> DistMatRef<'_, T> {
        DistMatRef {
            layout: self.layout,
            grid: &self.grid,
            local: self.local.as_ref(),
        }
    }

    #[inline]
    pub fn as_mut(&mut self) -> DistMatMut<'_, T> {
        DistMatMut {
            layout: self.layout,
            grid: &self.grid,
            local: self.local.as_mut(),
        }
    }

    #[track_caller]
    pub fn submatrix(&self, i: usize, j: usize, m: usize, n: usize) -> DistMatRef<'_, T> {
        self.as_ref().submatrix(i, j, m, n)
    }

    #[track_caller]
    pub fn submatrix_mut(&mut self, i: usize, j: usize, m: usize, n: usize) -> DistMatMut<'_, T> {
        self.as_mut().submatrix(i, j, m, n)
    }

    /// Collective: see [`DistMatRef::get`].
    pub fn get(&self, i: usize, j: usize) -> Result<T> {
        self.as_ref().get(i, j)
    }

    /// Collective: see [`DistMatRef::to_local`].
    pub fn to_local(&self) -> Result<Mat<T>> {
        self.as_ref().to_local()
    }

    /// Changes the dimensions. The contents are reset to zero when the shape changes.
    pub fn resize(&mut self, height: usize, width: usize) {
        if (height, width) == (self.height(), self.width()) {
            return;
        }
        self.layout.height = height;
        self.layout.width = width;
        let (lm, ln) = self
            .layout
            .local_shape(self.grid.shape(), self.grid.coord());
        self.local = Mat::zeros(lm, ln);
    }

    /// Collective: resizes `self` to the shape of `src` and copies it, keeping the
    /// distribution of `self`.
    pub fn assign(&mut self, src: DistMatRef<'_, T>) -> Result<()> {
        crate::grid::ensure_same_grid(&self.grid, src.grid, "assign")?;
        self.resize(src.height(), src.width());
        redist::copy(src, self.as_mut())
    }

    /// Changes the alignments of an empty matrix.
    pub fn set_alignment(&mut self, col_align: usize, row_align: usize) -> Result<()> {
        if self.height() != 0 || self.width() != 0 {
            return Err(DistError::RealignNonEmpty {
                height: self.height(),
                width: self.width(),
            });
        }
        let spec = self
            .layout
            .spec
            .with_align(col_align, row_align)
            .validate(self.grid.shape())?;
        self.layout.spec = spec;
        Ok(())
    }

    /// Collective: changes the alignments, moving the entries accordingly.
    pub fn realign(&mut self, col_align: usize, row_align: usize) -> Result<()> {
        let spec = self.spec().with_align(col_align, row_align);
        let moved = Self::redistributed_from(self.as_ref(), spec)?;
        *self = moved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{comm::Universe, dist::VALID_PAIRS};

    fn value(i: usize, j: usize) -> f64 {
        (i * 100 + j) as f64
    }

    #[test]
    fn construction_and_queries() {
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let spec = DistSpec::new(Dist::Mc, Dist::Mr).with_align(1, 0);
            let a = DistMatrix::from_fn(5, 3, &grid, spec, value).unwrap();

            // rows 1, 3 on grid row 0 (align 1)
            let expected_rows = if grid.row() == 0 { 2 } else { 3 };
            let expected_cols = if grid.col() == 0 { 2 } else { 1 };
            assert_eq!(a.local_height(), expected_rows);
            assert_eq!(a.local_width(), expected_cols);
            for il in 0..a.local_height() {
                for jl in 0..a.local_width() {
                    let (i, j) = (a.global_row(il), a.global_col(jl));
                    assert_eq!(a.local_row(i), Some(il));
                    assert_eq!(a.local_col(j), Some(jl));
                    assert!(a.is_owner(i, j));
                    assert_eq!(a.get_local(il, jl), value(i, j));
                }
            }
            assert_eq!(a.get(4, 2).unwrap(), value(4, 2));

            let full = a.to_local().unwrap();
            assert_eq!(full, Mat::with_dims(value, 5, 3));
        });
    }

    #[test]
    fn views_shift_alignment() {
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 2, 3).unwrap();
            let a = DistMatrix::from_fn(
                7,
                8,
                &grid,
                DistSpec::new(Dist::Mc, Dist::Mr),
                value,
            )
            .unwrap();
            let sub = a.submatrix(3, 4, 4, 3);
            assert_eq!((sub.col_align(), sub.row_align()), (1, 1));
            let expected = Mat::with_dims(|i, j| value(i + 3, j + 4), 4, 3);
            assert_eq!(sub.to_local().unwrap(), expected);

            let t = sub.transpose();
            assert_eq!((t.col_dist(), t.row_dist()), (Dist::Mr, Dist::Mc));
            assert_eq!(t.get(2, 1).unwrap(), value(4, 6));

            let (tl, tr, bl, br) = a.as_ref().split_at(2, 5);
            assert_eq!(tl.get(1, 4).unwrap(), value(1, 4));
            assert_eq!(tr.get(0, 0).unwrap(), value(0, 5));
            assert_eq!(bl.get(4, 0).unwrap(), value(6, 0));
            assert_eq!(br.get(4, 2).unwrap(), value(6, 7));
        });
    }

    #[test]
    fn mutable_views_are_disjoint() {
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let mut a =
                DistMatrix::<f64>::zeros(5, 5, &grid, DistSpec::new(Dist::Mc, Dist::Mr)).unwrap();
            {
                let (mut tl, _, _, mut br) = a.as_mut().split_at(2, 3);
                tl.fill(1.0);
                br.fill(2.0);
                br.set(0, 0, 3.0);
            }
            let full = a.to_local().unwrap();
            for j in 0..5 {
                for i in 0..5 {
                    let expected = if i < 2 && j < 3 {
                        1.0
                    } else if (i, j) == (2, 3) {
                        3.0
                    } else if i >= 2 && j >= 3 {
                        2.0
                    } else {
                        0.0
                    };
                    assert_eq!(full.read(i, j), expected);
                }
            }
        });
    }

    #[test]
    fn select_rows_and_columns() {
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 3, 2).unwrap();
            for (col, row) in VALID_PAIRS {
                let a = DistMatrix::from_fn(6, 5, &grid, DistSpec::new(col, row), value).unwrap();
                let rows = [5, 0, 3, 3];
                let cols = [4, 1];
                let s = a.as_ref().select(&rows, &cols).unwrap();
                assert_eq!((s.col_dist(), s.row_dist()), (col, row));
                let expected = Mat::with_dims(|i, j| value(rows[i], cols[j]), 4, 2);
                assert_eq!(s.to_local().unwrap(), expected);
            }
        });
    }

    #[test]
    fn diagonal_extraction() {
        for (h, w) in [(1, 1), (2, 2), (2, 3), (3, 2)] {
            Universe::run(h * w, |comm| {
                let grid = Grid::new(&comm, h, w).unwrap();
                for spec in [
                    DistSpec::new(Dist::Mc, Dist::Mr),
                    DistSpec::new(Dist::Mc, Dist::Mr).with_align(h - 1, w - 1),
                    DistSpec::new(Dist::Vc, Dist::Star),
                ] {
                    let a = DistMatrix::from_fn(6, 7, &grid, spec, value).unwrap();
                    for offset in [-2isize, 0, 3] {
                        let d = a.as_ref().diagonal(offset).unwrap();
                        assert_eq!((d.col_dist(), d.row_dist()), (Dist::Md, Dist::Star));
                        let (i0, j0) = if offset >= 0 {
                            (0, offset as usize)
                        } else {
                            ((-offset) as usize, 0)
                        };
                        let len = (6 - i0).min(7 - j0);
                        let expected = Mat::with_dims(|k, _| value(i0 + k, j0 + k), len, 1);
                        assert_eq!(d.to_local().unwrap(), expected);
                    }
                }
            });
        }
    }

    #[test]
    fn alignment_changes() {
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let spec = DistSpec::new(Dist::Mc, Dist::Mr);
            let mut a = DistMatrix::from_fn(5, 5, &grid, spec, value).unwrap();
            assert_eq!(
                a.set_alignment(1, 1),
                Err(DistError::RealignNonEmpty {
                    height: 5,
                    width: 5
                })
            );
            a.realign(1, 0).unwrap();
            assert_eq!((a.col_align(), a.row_align()), (1, 0));
            assert_eq!(a.to_local().unwrap(), Mat::with_dims(value, 5, 5));

            let mut taken = a.take();
            assert_eq!((a.height(), a.width()), (0, 0));
            assert!(a.set_alignment(0, 1).is_ok());
            assert_eq!(
                a.set_alignment(2, 0),
                Err(DistError::AlignmentOutOfRange {
                    what: "column",
                    align: 2,
                    stride: 2
                })
            );

            a.assign(taken.as_ref()).unwrap();
            assert_eq!((a.col_align(), a.row_align()), (0, 1));
            assert_eq!(a.to_local().unwrap(), Mat::with_dims(value, 5, 5));

            taken.resize(2, 3);
            assert_eq!(taken.to_local().unwrap(), Mat::zeros(2, 3));
        });
    }

    #[test]
    fn grid_mismatch() {
        Universe::run(1, |comm| {
            let g1 = Grid::new(&comm, 1, 1).unwrap();
            let g2 = Grid::new(&comm, 1, 1).unwrap();
            let spec = DistSpec::new(Dist::Star, Dist::Star);
            let a = DistMatrix::<f64>::zeros(2, 2, &g1, spec).unwrap();
            let mut b = DistMatrix::<f64>::zeros(2, 2, &g2, spec).unwrap();
            assert_eq!(
                b.assign(a.as_ref()),
                Err(DistError::GridMismatch { op: "assign" })
            );
        });
    }
}
