//! Two-dimensional process grid.

use std::sync::Arc;

use crate::{
    comm::Comm,
    dist::{Coord, GridShape},
    error::{DistError, Result},
};

/// Communicator of a grid, seen from the calling process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommScope {
    /// Every process, ordered by grid rank.
    Grid,
    /// The calling process' grid column, ordered by grid row.
    Col,
    /// The calling process' grid row, ordered by grid column.
    Row,
    /// Every process, ordered by VC rank.
    Vc,
    /// Every process, ordered by VR rank.
    Vr,
    /// The calling process' diagonal path, ordered by path position.
    Diag,
    /// The processes sharing the calling process' path position, ordered by path.
    DiagPerp,
}

/// Fixed `height × width` arrangement of the first `height * width` processes of a
/// communicator, in row-major order.
///
/// A grid is immutable after creation, shared through an `Arc`, and compared by identity: two
/// grids with the same shape built from the same communicator are still distinct.
#[derive(Debug)]
pub struct Grid {
    shape: GridShape,
    coord: Coord,
    comm: Comm,
    col_comm: Comm,
    row_comm: Comm,
    vc_comm: Comm,
    vr_comm: Comm,
    diag_comm: Comm,
    diag_perp_comm: Comm,
}

fn sub(comm: &Comm, label: &str, members: &[usize]) -> Result<Comm> {
    comm.subset(label, members)?.ok_or(DistError::NotInGrid {
        rank: comm.rank(),
        size: comm.size(),
    })
}

impl Grid {
    /// Builds a `height × width` grid over the first `height * width` ranks of `comm`.
    ///
    /// This does not communicate, but every process of `comm` must call it, including those
    /// beyond the grid, which receive [`DistError::NotInGrid`]. Each call gets channels of its
    /// own, distinct from those of every other grid built on `comm`.
    pub fn new(comm: &Comm, height: usize, width: usize) -> Result<Arc<Grid>> {
        let epoch = comm.next_epoch();
        if height == 0 || width == 0 {
            return Err(DistError::EmptyGrid { height, width });
        }
        let required = height * width;
        if required > comm.size() {
            return Err(DistError::GridTooLarge {
                height,
                width,
                required,
                available: comm.size(),
            });
        }
        if comm.rank() >= required {
            return Err(DistError::NotInGrid {
                rank: comm.rank(),
                size: required,
            });
        }

        let shape = GridShape::new(height, width);
        let grid_members: Vec<usize> = (0..required).collect();
        let grid_comm = sub(comm, &format!("grid-{epoch}"), &grid_members)?;
        let coord = shape.coord_of(grid_comm.rank());

        let col_members: Vec<usize> = (0..height)
            .map(|row| shape.rank_of(Coord::new(row, coord.col)))
            .collect();
        let row_members: Vec<usize> = (0..width)
            .map(|col| shape.rank_of(Coord::new(coord.row, col)))
            .collect();
        let vc_members: Vec<usize> = (0..required)
            .map(|vc| shape.rank_of(shape.coord_of_vc(vc)))
            .collect();
        let vr_members: Vec<usize> = (0..required)
            .map(|vr| shape.rank_of(shape.coord_of_vr(vr)))
            .collect();

        let path = shape.diag_path(coord);
        let position = shape.diag_position(coord);
        let diag_members: Vec<usize> = (0..shape.lcm())
            .map(|t| shape.rank_of(shape.coord_on_path(path, t)))
            .collect();
        let diag_perp_members: Vec<usize> = (0..shape.gcd())
            .map(|p| shape.rank_of(shape.coord_on_path(p, position)))
            .collect();

        let grid = Grid {
            shape,
            coord,
            col_comm: sub(&grid_comm, "mc", &col_members)?,
            row_comm: sub(&grid_comm, "mr", &row_members)?,
            vc_comm: sub(&grid_comm, "vc", &vc_members)?,
            vr_comm: sub(&grid_comm, "vr", &vr_members)?,
            diag_comm: sub(&grid_comm, "md", &diag_members)?,
            diag_perp_comm: sub(&grid_comm, "md_perp", &diag_perp_members)?,
            comm: grid_comm,
        };

        tracing::debug!(
            height,
            width,
            row = coord.row,
            col = coord.col,
            "created process grid"
        );
        Ok(Arc::new(grid))
    }

    /// Builds the most square grid using every process of `comm`.
    pub fn square(comm: &Comm) -> Result<Arc<Grid>> {
        let size = comm.size();
        let mut height = (size as f64).sqrt() as usize;
        while height > 1 && size % height != 0 {
            height -= 1;
        }
        let height = height.max(1);
        Grid::new(comm, height, size / height)
    }

    #[inline]
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.shape.height()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.shape.width()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    #[inline]
    pub fn gcd(&self) -> usize {
        self.shape.gcd()
    }

    #[inline]
    pub fn lcm(&self) -> usize {
        self.shape.lcm()
    }

    /// Coordinate of the calling process.
    #[inline]
    pub fn coord(&self) -> Coord {
        self.coord
    }

    #[inline]
    pub fn row(&self) -> usize {
        self.coord.row
    }

    #[inline]
    pub fn col(&self) -> usize {
        self.coord.col
    }

    /// Row-major grid rank of the calling process.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank_of(self.coord)
    }

    #[inline]
    pub fn vc_rank(&self) -> usize {
        self.shape.vc_rank(self.coord)
    }

    #[inline]
    pub fn vr_rank(&self) -> usize {
        self.shape.vr_rank(self.coord)
    }

    /// Diagonal path of the calling process.
    #[inline]
    pub fn diag_path(&self) -> usize {
        self.shape.diag_path(self.coord)
    }

    /// Position of the calling process along its diagonal path.
    #[inline]
    pub fn diag_path_rank(&self) -> usize {
        self.diag_comm.rank()
    }

    /// All processes, ordered by grid rank.
    #[inline]
    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    /// Processes of the calling process' grid column, ordered by grid row.
    #[inline]
    pub fn col_comm(&self) -> &Comm {
        &self.col_comm
    }

    /// Processes of the calling process' grid row, ordered by grid column.
    #[inline]
    pub fn row_comm(&self) -> &Comm {
        &self.row_comm
    }

    /// All processes, ordered by VC rank.
    #[inline]
    pub fn vc_comm(&self) -> &Comm {
        &self.vc_comm
    }

    /// All processes, ordered by VR rank.
    #[inline]
    pub fn vr_comm(&self) -> &Comm {
        &self.vr_comm
    }

    /// Processes of the calling process' diagonal path, ordered by path position.
    #[inline]
    pub fn diag_comm(&self) -> &Comm {
        &self.diag_comm
    }

    /// Processes at the calling process' path position, ordered by path.
    #[inline]
    pub fn diag_perp_comm(&self) -> &Comm {
        &self.diag_perp_comm
    }

    /// Communicator associated with `scope`.
    #[inline]
    pub fn scope(&self, scope: CommScope) -> &Comm {
        match scope {
            CommScope::Grid => &self.comm,
            CommScope::Col => &self.col_comm,
            CommScope::Row => &self.row_comm,
            CommScope::Vc => &self.vc_comm,
            CommScope::Vr => &self.vr_comm,
            CommScope::Diag => &self.diag_comm,
            CommScope::DiagPerp => &self.diag_perp_comm,
        }
    }

    /// Grid coordinate of the member with rank `rank` in the communicator of `scope`.
    #[inline]
    pub fn member_coord(&self, scope: CommScope, rank: usize) -> Coord {
        let shape = self.shape;
        match scope {
            CommScope::Grid => shape.coord_of(rank),
            CommScope::Col => Coord::new(rank, self.coord.col),
            CommScope::Row => Coord::new(self.coord.row, rank),
            CommScope::Vc => shape.coord_of_vc(rank),
            CommScope::Vr => shape.coord_of_vr(rank),
            CommScope::Diag => shape.coord_on_path(self.diag_path(), rank),
            CommScope::DiagPerp => shape.coord_on_path(rank, shape.diag_position(self.coord)),
        }
    }
}

/// Returns an error unless both grids are the same object.
#[inline]
pub fn ensure_same_grid(a: &Arc<Grid>, b: &Arc<Grid>, op: &'static str) -> Result<()> {
    if Arc::ptr_eq(a, b) {
        Ok(())
    } else {
        Err(DistError::GridMismatch { op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::Universe;

    #[test]
    fn grid_coordinates_and_comms() {
        let out = Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 2, 3).unwrap();
            let col = grid.col_comm().all_gather(grid.rank()).unwrap();
            let row = grid.row_comm().all_gather(grid.rank()).unwrap();
            let vc = grid.vc_comm().all_gather(grid.rank()).unwrap();
            let diag = grid.diag_comm().all_gather(grid.rank()).unwrap();
            (grid.row(), grid.col(), grid.vc_rank(), col, row, vc, diag)
        });

        // rank 4 sits at (1, 1)
        let (row, col, vc, col_members, row_members, vc_members, diag) = &out[4];
        assert_eq!((*row, *col, *vc), (1, 1, 3));
        assert_eq!(col_members, &vec![1, 4]);
        assert_eq!(row_members, &vec![3, 4, 5]);
        assert_eq!(vc_members, &vec![0, 3, 1, 4, 2, 5]);
        // gcd(2, 3) = 1, so the single diagonal path visits every process
        assert_eq!(diag.len(), 6);
        assert_eq!(diag[0], 0);
        assert_eq!(diag[1], 4);
    }

    #[test]
    fn member_coordinates_match_comms() {
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 3, 2).unwrap();
            for scope in [
                CommScope::Grid,
                CommScope::Col,
                CommScope::Row,
                CommScope::Vc,
                CommScope::Vr,
                CommScope::Diag,
                CommScope::DiagPerp,
            ] {
                let members = grid.scope(scope).all_gather(grid.coord()).unwrap();
                for (rank, coord) in members.into_iter().enumerate() {
                    assert_eq!(grid.member_coord(scope, rank), coord);
                }
            }
        });
    }

    #[test]
    fn grid_errors() {
        let out = Universe::run(4, |comm| {
            (
                Grid::new(&comm, 3, 3).map(|_| ()),
                Grid::new(&comm, 0, 2).map(|_| ()),
                Grid::new(&comm, 1, 3).map(|_| ()),
                Grid::square(&comm).map(|g| (g.height(), g.width())),
            )
        });
        assert_eq!(
            out[0].0,
            Err(DistError::GridTooLarge {
                height: 3,
                width: 3,
                required: 9,
                available: 4
            })
        );
        assert_eq!(
            out[0].1,
            Err(DistError::EmptyGrid {
                height: 0,
                width: 2
            })
        );
        assert_eq!(out[0].2, Ok(()));
        assert_eq!(out[3].2, Err(DistError::NotInGrid { rank: 3, size: 3 }));
        assert_eq!(out[2].3, Ok((2, 2)));
    }

    #[test]
    fn grids_on_one_comm_have_separate_channels() {
        let out = Universe::run(2, |comm| {
            let a = Grid::new(&comm, 1, 2).unwrap();
            let b = Grid::new(&comm, 1, 2).unwrap();
            let distinct = !a.comm().same_group(b.comm()) && !a.row_comm().same_group(b.row_comm());
            if comm.rank() == 0 {
                a.comm().send(1, 1usize).unwrap();
                b.comm().send(1, 2usize).unwrap();
                (distinct, 0, 0)
            } else {
                let from_b: usize = b.comm().recv(0).unwrap();
                let from_a: usize = a.comm().recv(0).unwrap();
                (distinct, from_a, from_b)
            }
        });
        assert!(out[0].0);
        assert_eq!(out[1], (true, 1, 2));
    }

    #[test]
    fn grids_compare_by_identity() {
        Universe::run(1, |comm| {
            let a = Grid::new(&comm, 1, 1).unwrap();
            let b = Grid::new(&comm, 1, 1).unwrap();
            assert!(ensure_same_grid(&a, &a.clone(), "test").is_ok());
            assert_eq!(
                ensure_same_grid(&a, &b, "test"),
                Err(DistError::GridMismatch { op: "test" })
            );
        });
    }
}
