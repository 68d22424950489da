//! Blocked factorization driver.
//!
//! The factorizations walk a moving boundary across the matrix. At each step, a panel of at
//! most `block_size` columns is factored with latency-bound work, and the trailing part is
//! updated with local Level-3 products.

use core::ops::ControlFlow;

use assert2::assert as fancy_assert;
use reborrow::*;

use crate::{distmat::DistMatMut, error::Result, grid::Grid, ComplexField, Parallelism};

/// How a panel is factored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PanelVariant {
    /// The panel is stored as `[MC, STAR]`, and column reductions run over the column
    /// communicator.
    Distributed,
    /// The panel is replicated as `[STAR, STAR]` and factored redundantly by every process.
    Replicated,
}

/// Tuning parameters of the blocked factorizations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockCtrl {
    pub block_size: usize,
    pub variant: PanelVariant,
    pub parallelism: Parallelism,
}

impl Default for BlockCtrl {
    #[inline]
    fn default() -> Self {
        Self {
            block_size: 32,
            variant: PanelVariant::Distributed,
            parallelism: Parallelism::None,
        }
    }
}

impl BlockCtrl {
    /// Default parameters with a block size rounded up to a multiple of the grid width.
    pub fn for_grid(grid: &Grid) -> Self {
        let default = Self::default();
        let width = grid.width();
        Self {
            block_size: (default.block_size + width - 1) / width * width,
            ..default
        }
    }

    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    #[track_caller]
    #[inline]
    pub fn with_block_size(self, block_size: usize) -> Self {
        fancy_assert!(block_size > 0);
        Self { block_size, ..self }
    }

    #[inline]
    pub fn with_variant(self, variant: PanelVariant) -> Self {
        Self { variant, ..self }
    }

    #[inline]
    pub fn with_parallelism(self, parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            ..self
        }
    }
}

/// One step of a sweep: the panel covers `k..k + nb`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub k: usize,
    pub nb: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// From the top left corner.
    Forward,
    /// From the bottom right corner.
    Backward,
}

/// Moving boundary over `0..extent`.
///
/// `done` grows by `min(block_size, extent - done)` at every step, and the sweep is finished
/// exactly when `done == extent`.
#[derive(Clone, Debug)]
pub struct Sweep {
    extent: usize,
    block_size: usize,
    done: usize,
    direction: Direction,
}

impl Sweep {
    #[track_caller]
    pub fn new(extent: usize, block_size: usize, direction: Direction) -> Self {
        fancy_assert!(block_size > 0);
        Self {
            extent,
            block_size,
            done: 0,
            direction,
        }
    }

    #[inline]
    pub fn forward(extent: usize, block_size: usize) -> Self {
        Self::new(extent, block_size, Direction::Forward)
    }

    #[inline]
    pub fn backward(extent: usize, block_size: usize) -> Self {
        Self::new(extent, block_size, Direction::Backward)
    }

    /// Number of indices already covered.
    #[inline]
    pub fn done(&self) -> usize {
        self.done
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.done == self.extent
    }
}

impl Iterator for Sweep {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if self.is_finished() {
            return None;
        }
        let nb = self.block_size.min(self.extent - self.done);
        let k = match self.direction {
            Direction::Forward => self.done,
            Direction::Backward => self.extent - self.done - nb,
        };
        self.done += nb;
        Some(Step { k, nb })
    }
}

/// Calls `step` on each panel of a forward sweep over `0..extent`, with `a` reborrowed. The
/// closure stops the sweep by returning [`ControlFlow::Break`]; every process must decide
/// this identically.
pub fn factor<T: ComplexField>(
    mut a: DistMatMut<'_, T>,
    ctrl: &BlockCtrl,
    extent: usize,
    mut step: impl FnMut(Step, DistMatMut<'_, T>) -> Result<ControlFlow<()>>,
) -> Result<()> {
    for s in Sweep::forward(extent, ctrl.block_size) {
        tracing::trace!(k = s.k, nb = s.nb, "panel step");
        if step(s, a.rb_mut())?.is_break() {
            break;
        }
    }
    Ok(())
}

/// The nine blocks around the panel `k..k + nb`.
#[derive(Debug)]
pub struct Blocks3x3<'a, T> {
    pub a00: DistMatMut<'a, T>,
    pub a01: DistMatMut<'a, T>,
    pub a02: DistMatMut<'a, T>,
    pub a10: DistMatMut<'a, T>,
    pub a11: DistMatMut<'a, T>,
    pub a12: DistMatMut<'a, T>,
    pub a20: DistMatMut<'a, T>,
    pub a21: DistMatMut<'a, T>,
    pub a22: DistMatMut<'a, T>,
}

/// Splits `a` into disjoint blocks, with rows and columns partitioned as
/// `0..k`, `k..k + nb` and `k + nb..`.
#[track_caller]
pub fn repartition<T: ComplexField>(a: DistMatMut<'_, T>, k: usize, nb: usize) -> Blocks3x3<'_, T> {
    fancy_assert!(k + nb <= a.height());
    fancy_assert!(k + nb <= a.width());
    let (a00, top_right, bottom_left, bottom_right) = a.split_at(k, k);
    let (a01, a02) = top_right.split_at_col(nb);
    let (a10, a20) = bottom_left.split_at_row(nb);
    let (a11, a12, a21, a22) = bottom_right.split_at(nb, nb);
    Blocks3x3 {
        a00,
        a01,
        a02,
        a10,
        a11,
        a12,
        a20,
        a21,
        a22,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::Universe,
        dist::{Dist, DistSpec},
        distmat::DistMatrix,
    };

    #[test]
    fn sweeps() {
        let forward: Vec<_> = Sweep::forward(7, 3).collect();
        assert_eq!(
            forward,
            [
                Step { k: 0, nb: 3 },
                Step { k: 3, nb: 3 },
                Step { k: 6, nb: 1 }
            ]
        );
        let backward: Vec<_> = Sweep::backward(7, 3).collect();
        assert_eq!(
            backward,
            [
                Step { k: 4, nb: 3 },
                Step { k: 1, nb: 3 },
                Step { k: 0, nb: 1 }
            ]
        );

        let mut sweep = Sweep::forward(0, 4);
        assert!(sweep.is_finished());
        assert_eq!(sweep.next(), None);

        let mut sweep = Sweep::forward(5, 8);
        assert_eq!(sweep.next(), Some(Step { k: 0, nb: 5 }));
        assert_eq!(sweep.done(), 5);
        assert!(sweep.is_finished());
    }

    #[test]
    fn block_ctrl() {
        Universe::run(6, |comm| {
            let grid = Grid::new(&comm, 1, 6).unwrap();
            let ctrl = BlockCtrl::for_grid(&grid);
            assert_eq!(ctrl.block_size, 36);
            let ctrl = ctrl
                .with_block_size(4)
                .with_variant(PanelVariant::Replicated)
                .with_parallelism(Parallelism::Rayon(2));
            assert_eq!(
                ctrl,
                BlockCtrl {
                    block_size: 4,
                    variant: PanelVariant::Replicated,
                    parallelism: Parallelism::Rayon(2)
                }
            );
        });
    }

    #[test]
    fn factor_visits_panels_and_stops() {
        Universe::run(4, |comm| {
            let grid = Grid::new(&comm, 2, 2).unwrap();
            let mut a =
                DistMatrix::<f64>::zeros(9, 9, &grid, DistSpec::new(Dist::Mc, Dist::Mr)).unwrap();
            let ctrl = BlockCtrl::default().with_block_size(2);

            let mut seen = Vec::new();
            factor(a.as_mut(), &ctrl, 9, |step, mut a| {
                let mut blocks = repartition(a.rb_mut(), step.k, step.nb);
                blocks.a11.fill(step.k as f64 + 1.0);
                seen.push(step);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
            assert_eq!(seen.len(), 5);
            assert_eq!(seen[4], Step { k: 8, nb: 1 });
            for k in 0..9 {
                assert_eq!(a.get(k, k).unwrap(), (k - k % 2) as f64 + 1.0);
            }
            assert_eq!(a.get(0, 1).unwrap(), 1.0);
            assert_eq!(a.get(2, 0).unwrap(), 0.0);

            let mut count = 0;
            factor(a.as_mut(), &ctrl, 9, |step, _| {
                count += 1;
                Ok(if step.k >= 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })
            .unwrap();
            assert_eq!(count, 2);
        });
    }

    #[test]
    fn repartition_shapes() {
        Universe::run(1, |comm| {
            let grid = Grid::new(&comm, 1, 1).unwrap();
            let mut a =
                DistMatrix::<f64>::zeros(6, 8, &grid, DistSpec::new(Dist::Mc, Dist::Mr)).unwrap();
            let b = repartition(a.as_mut(), 2, 3);
            assert_eq!((b.a00.height(), b.a00.width()), (2, 2));
            assert_eq!((b.a02.height(), b.a02.width()), (2, 3));
            assert_eq!((b.a11.height(), b.a11.width()), (3, 3));
            assert_eq!((b.a20.height(), b.a20.width()), (1, 2));
            assert_eq!((b.a22.height(), b.a22.width()), (1, 3));
        });
    }
}
