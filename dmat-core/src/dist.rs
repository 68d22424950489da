//! Distribution tags and the pure index maps they induce.
//!
//! Everything in this module is a pure function of the grid geometry ([`GridShape`]), so it
//! can be evaluated for any process without communicating.

use core::fmt;

use crate::{
    comm::Message,
    error::{DistError, Result},
};

/// Scheme mapping one dimension of a matrix onto the process grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dist {
    /// Index `i` lives on grid row `(align + i) mod height`.
    Mc,
    /// Index `i` lives on grid column `(align + i) mod width`.
    Mr,
    /// Index `i` lives on the process with VC rank `(align + i) mod size`.
    Vc,
    /// Index `i` lives on the process with VR rank `(align + i) mod size`.
    Vr,
    /// Every process holds the full extent.
    Star,
    /// Index `i` lives on position `(align + i) mod lcm` of the diagonal path `root`.
    Md,
    /// The full extent lives on the process with grid rank `root`.
    Circ,
}

impl Dist {
    pub const ALL: [Dist; 7] = [
        Dist::Mc,
        Dist::Mr,
        Dist::Vc,
        Dist::Vr,
        Dist::Star,
        Dist::Md,
        Dist::Circ,
    ];
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dist::Mc => "MC",
            Dist::Mr => "MR",
            Dist::Vc => "VC",
            Dist::Vr => "VR",
            Dist::Star => "STAR",
            Dist::Md => "MD",
            Dist::Circ => "CIRC",
        })
    }
}

/// The supported `[col, row]` distribution pairs.
pub const VALID_PAIRS: [(Dist, Dist); 14] = [
    (Dist::Mc, Dist::Mr),
    (Dist::Mc, Dist::Star),
    (Dist::Star, Dist::Mr),
    (Dist::Mr, Dist::Mc),
    (Dist::Mr, Dist::Star),
    (Dist::Star, Dist::Mc),
    (Dist::Vc, Dist::Star),
    (Dist::Star, Dist::Vc),
    (Dist::Vr, Dist::Star),
    (Dist::Star, Dist::Vr),
    (Dist::Md, Dist::Star),
    (Dist::Star, Dist::Md),
    (Dist::Star, Dist::Star),
    (Dist::Circ, Dist::Circ),
];

#[inline]
pub fn is_valid_pair(col: Dist, row: Dist) -> bool {
    VALID_PAIRS.contains(&(col, row))
}

/// Coordinate of a process in the grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    #[inline]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl Message for Coord {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.row, self.col).encode(out);
    }

    fn decode(input: &mut &[u8]) -> Option<Self> {
        let (row, col) = <(usize, usize)>::decode(input)?;
        Some(Coord { row, col })
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Geometry of a `height × width` process grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridShape {
    height: usize,
    width: usize,
    gcd: usize,
}

impl GridShape {
    /// # Panics
    ///
    /// Panics if either dimension is zero.
    #[track_caller]
    pub fn new(height: usize, width: usize) -> Self {
        assert2::assert!(height > 0 && width > 0);
        Self {
            height,
            width,
            gcd: gcd(height, width),
        }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn gcd(&self) -> usize {
        self.gcd
    }

    #[inline]
    pub fn lcm(&self) -> usize {
        self.height / self.gcd * self.width
    }

    /// Grid ranks are row-major.
    #[inline]
    pub fn coord_of(&self, rank: usize) -> Coord {
        Coord::new(rank / self.width, rank % self.width)
    }

    #[inline]
    pub fn rank_of(&self, coord: Coord) -> usize {
        coord.row * self.width + coord.col
    }

    #[inline]
    pub fn vc_rank(&self, coord: Coord) -> usize {
        coord.row + coord.col * self.height
    }

    #[inline]
    pub fn vr_rank(&self, coord: Coord) -> usize {
        coord.col + coord.row * self.width
    }

    #[inline]
    pub fn coord_of_vc(&self, vc: usize) -> Coord {
        Coord::new(vc % self.height, vc / self.height)
    }

    #[inline]
    pub fn coord_of_vr(&self, vr: usize) -> Coord {
        Coord::new(vr / self.width, vr % self.width)
    }

    /// Index of the diagonal path through `coord`.
    #[inline]
    pub fn diag_path(&self, coord: Coord) -> usize {
        (coord.col + self.gcd - coord.row % self.gcd) % self.gcd
    }

    /// Position of `coord` along its diagonal path.
    pub fn diag_position(&self, coord: Coord) -> usize {
        let path = self.diag_path(coord);
        (0..self.lcm())
            .find(|&t| self.coord_on_path(path, t) == coord)
            .unwrap_or(0)
    }

    /// Process at position `t` of diagonal path `path`.
    #[inline]
    pub fn coord_on_path(&self, path: usize, t: usize) -> Coord {
        Coord::new(t % self.height, (t + path) % self.width)
    }

    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.size()).map(move |rank| self.coord_of(rank))
    }

    /// Number of distinct owners along a dimension distributed with `dist`.
    pub fn stride(&self, dist: Dist) -> usize {
        match dist {
            Dist::Mc => self.height,
            Dist::Mr => self.width,
            Dist::Vc | Dist::Vr => self.size(),
            Dist::Md => self.lcm(),
            Dist::Star | Dist::Circ => 1,
        }
    }
}

/// Layout of a distributed matrix over a grid, independent of its size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DistSpec {
    pub col_dist: Dist,
    pub row_dist: Dist,
    pub col_align: usize,
    pub row_align: usize,
    /// Diagonal path for [`Dist::Md`], grid rank for [`Dist::Circ`], ignored otherwise.
    pub root: usize,
}

impl DistSpec {
    #[inline]
    pub const fn new(col_dist: Dist, row_dist: Dist) -> Self {
        Self {
            col_dist,
            row_dist,
            col_align: 0,
            row_align: 0,
            root: 0,
        }
    }

    #[inline]
    pub const fn with_align(self, col_align: usize, row_align: usize) -> Self {
        Self {
            col_align,
            row_align,
            ..self
        }
    }

    #[inline]
    pub const fn with_root(self, root: usize) -> Self {
        Self { root, ..self }
    }

    /// Whether the root is meaningful for this pair.
    #[inline]
    pub fn uses_root(&self) -> bool {
        matches!(self.col_dist, Dist::Md | Dist::Circ)
            || matches!(self.row_dist, Dist::Md | Dist::Circ)
    }

    /// Swaps the roles of rows and columns.
    #[inline]
    pub fn transpose(self) -> Self {
        Self {
            col_dist: self.row_dist,
            row_dist: self.col_dist,
            col_align: self.row_align,
            row_align: self.col_align,
            root: self.root,
        }
    }

    /// Checks the pair, the alignments and the root against `shape`, and returns the spec with
    /// an unused root cleared.
    pub fn validate(self, shape: GridShape) -> Result<Self> {
        if !is_valid_pair(self.col_dist, self.row_dist) {
            return Err(DistError::UnsupportedDistPair {
                col: self.col_dist,
                row: self.row_dist,
            });
        }
        for (what, dist, align) in [
            ("column", self.col_dist, self.col_align),
            ("row", self.row_dist, self.row_align),
        ] {
            let stride = shape.stride(dist);
            if align >= stride {
                return Err(DistError::AlignmentOutOfRange {
                    what,
                    align,
                    stride,
                });
            }
        }

        let rooted = [self.col_dist, self.row_dist]
            .into_iter()
            .find(|dist| matches!(dist, Dist::Md | Dist::Circ));
        match rooted {
            Some(dist) => {
                let count = match dist {
                    Dist::Md => shape.gcd(),
                    _ => shape.size(),
                };
                if self.root >= count {
                    return Err(DistError::RootOutOfRange {
                        dist,
                        root: self.root,
                        count,
                    });
                }
                Ok(self)
            }
            None => Ok(self.with_root(0)),
        }
    }
}

/// Map between the global and local indices of one dimension, for one process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AxisMap {
    /// First owned global index.
    pub shift: usize,
    /// Distance between successive owned global indices.
    pub stride: usize,
}

impl AxisMap {
    /// Number of owned indices in `0..extent`.
    #[inline]
    pub fn local_len(&self, extent: usize) -> usize {
        if extent > self.shift {
            (extent - self.shift - 1) / self.stride + 1
        } else {
            0
        }
    }

    #[inline]
    pub fn global(&self, local: usize) -> usize {
        self.shift + local * self.stride
    }

    /// Local index of `global`, if it is owned.
    #[inline]
    pub fn local(&self, global: usize) -> Option<usize> {
        if global >= self.shift && (global - self.shift) % self.stride == 0 {
            Some((global - self.shift) / self.stride)
        } else {
            None
        }
    }

    /// Number of owned indices strictly below `global`.
    #[inline]
    pub fn count_below(&self, global: usize) -> usize {
        self.local_len(global)
    }
}

/// Computes the index map of one dimension for the process at `coord`, or `None` if the
/// process does not participate in that dimension.
pub fn axis_map(
    shape: GridShape,
    dist: Dist,
    align: usize,
    root: usize,
    coord: Coord,
) -> Option<AxisMap> {
    let modular = |c: usize, stride: usize| AxisMap {
        shift: (c + stride - align) % stride,
        stride,
    };
    match dist {
        Dist::Mc => Some(modular(coord.row, shape.height())),
        Dist::Mr => Some(modular(coord.col, shape.width())),
        Dist::Vc => Some(modular(shape.vc_rank(coord), shape.size())),
        Dist::Vr => Some(modular(shape.vr_rank(coord), shape.size())),
        Dist::Star => Some(AxisMap {
            shift: 0,
            stride: 1,
        }),
        Dist::Md => {
            if shape.diag_path(coord) == root {
                Some(modular(shape.diag_position(coord), shape.lcm()))
            } else {
                None
            }
        }
        Dist::Circ => {
            if shape.rank_of(coord) == root {
                Some(AxisMap {
                    shift: 0,
                    stride: 1,
                })
            } else {
                None
            }
        }
    }
}

/// Constraint placed on the grid coordinates of the processes holding an index or entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// Every process.
    Any,
    /// Every process of a grid row.
    Row(usize),
    /// Every process of a grid column.
    Col(usize),
    /// A single process.
    At(Coord),
}

impl Owner {
    /// Intersection of two constraints coming from the two dimensions of a valid pair.
    #[inline]
    pub fn merge(self, other: Owner) -> Owner {
        match (self, other) {
            (Owner::Any, o) | (o, Owner::Any) => o,
            (Owner::Row(row), Owner::Col(col)) | (Owner::Col(col), Owner::Row(row)) => {
                Owner::At(Coord::new(row, col))
            }
            (o, _) => o,
        }
    }

    /// The process chosen among the holders by a receiver at `receiver`: unconstrained
    /// coordinates are taken from the receiver.
    #[inline]
    pub fn designated(self, receiver: Coord) -> Coord {
        match self {
            Owner::Any => receiver,
            Owner::Row(row) => Coord::new(row, receiver.col),
            Owner::Col(col) => Coord::new(receiver.row, col),
            Owner::At(coord) => coord,
        }
    }

    /// Calls `f` on every process satisfying the constraint.
    #[inline]
    pub fn for_each(self, shape: GridShape, mut f: impl FnMut(Coord)) {
        match self {
            Owner::Any => shape.coords().for_each(f),
            Owner::Row(row) => (0..shape.width()).for_each(|col| f(Coord::new(row, col))),
            Owner::Col(col) => (0..shape.height()).for_each(|row| f(Coord::new(row, col))),
            Owner::At(coord) => f(coord),
        }
    }

    #[inline]
    pub fn contains(self, coord: Coord) -> bool {
        match self {
            Owner::Any => true,
            Owner::Row(row) => coord.row == row,
            Owner::Col(col) => coord.col == col,
            Owner::At(at) => at == coord,
        }
    }
}

/// Owner constraint of global index `i` along a dimension distributed with `dist`.
pub fn owner(shape: GridShape, dist: Dist, align: usize, root: usize, i: usize) -> Owner {
    match dist {
        Dist::Star => Owner::Any,
        Dist::Mc => Owner::Row((align + i) % shape.height()),
        Dist::Mr => Owner::Col((align + i) % shape.width()),
        Dist::Vc => Owner::At(shape.coord_of_vc((align + i) % shape.size())),
        Dist::Vr => Owner::At(shape.coord_of_vr((align + i) % shape.size())),
        Dist::Md => Owner::At(shape.coord_on_path(root, (align + i) % shape.lcm())),
        Dist::Circ => Owner::At(shape.coord_of(root)),
    }
}

/// Size and layout of a distributed matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    pub height: usize,
    pub width: usize,
    pub spec: DistSpec,
}

impl Layout {
    /// Index map of the rows owned by the process at `coord`.
    #[inline]
    pub fn col_map(&self, shape: GridShape, coord: Coord) -> Option<AxisMap> {
        axis_map(
            shape,
            self.spec.col_dist,
            self.spec.col_align,
            self.spec.root,
            coord,
        )
    }

    /// Index map of the columns owned by the process at `coord`.
    #[inline]
    pub fn row_map(&self, shape: GridShape, coord: Coord) -> Option<AxisMap> {
        axis_map(
            shape,
            self.spec.row_dist,
            self.spec.row_align,
            self.spec.root,
            coord,
        )
    }

    /// Both index maps, or `None` if the process owns nothing.
    #[inline]
    pub fn maps(&self, shape: GridShape, coord: Coord) -> Option<(AxisMap, AxisMap)> {
        Some((self.col_map(shape, coord)?, self.row_map(shape, coord)?))
    }

    /// Dimensions of the local buffer of the process at `coord`.
    pub fn local_shape(&self, shape: GridShape, coord: Coord) -> (usize, usize) {
        match self.maps(shape, coord) {
            Some((col, row)) => (col.local_len(self.height), row.local_len(self.width)),
            None => (0, 0),
        }
    }

    /// Constraint on the processes holding entry `(i, j)`.
    #[inline]
    pub fn owner(&self, shape: GridShape, i: usize, j: usize) -> Owner {
        self.row_owner(shape, i).merge(self.col_owner(shape, j))
    }

    /// Constraint on the processes holding row `i`.
    #[inline]
    pub fn row_owner(&self, shape: GridShape, i: usize) -> Owner {
        owner(
            shape,
            self.spec.col_dist,
            self.spec.col_align,
            self.spec.root,
            i,
        )
    }

    /// Constraint on the processes holding column `j`.
    #[inline]
    pub fn col_owner(&self, shape: GridShape, j: usize) -> Owner {
        owner(
            shape,
            self.spec.row_dist,
            self.spec.row_align,
            self.spec.root,
            j,
        )
    }

    #[inline]
    pub fn transpose(self) -> Self {
        Self {
            height: self.width,
            width: self.height,
            spec: self.spec.transpose(),
        }
    }

    /// Layout of the contiguous block starting at `(i, j)` with dimensions `(m, n)`.
    pub fn submatrix(self, shape: GridShape, i: usize, j: usize, m: usize, n: usize) -> Self {
        let col_stride = shape.stride(self.spec.col_dist);
        let row_stride = shape.stride(self.spec.row_dist);
        Self {
            height: m,
            width: n,
            spec: self.spec.with_align(
                (self.spec.col_align + i) % col_stride,
                (self.spec.row_align + j) % row_stride,
            ),
        }
    }
}
