//! Reductions over distributed matrices.

use std::sync::Arc;

use crate::{
    dist::Coord,
    distmat::{DistMatMut, DistMatRef},
    error::{DistError, Result},
    grid::{ensure_same_grid, CommScope, Grid},
    ComplexField, RealField,
};

/// Collective: sums, in place, the local buffers of `a` over the communicator of `scope`.
///
/// Every member of the communicator must hold a local buffer of the same dimensions, e.g. the
/// row communicator for an `[MC, STAR]` matrix.
pub fn all_reduce_sum<T: ComplexField>(mut a: DistMatMut<'_, T>, scope: CommScope) -> Result<()> {
    let grid = a.grid().clone();
    let local = a.local().to_col_major_vec();
    let summed = grid.scope(scope).all_reduce_sum(local)?;
    a.local_mut().copy_from_col_major(&summed);
    Ok(())
}

/// Collective: `dst = Σ_p src_p`, where every process `p` holding an entry of `src` contributes
/// its local value as a partial sum.
///
/// Contributions to an entry are added in increasing grid rank, so that replicated entries
/// of `dst` are bit-identical.
pub fn sum_scatter<T: ComplexField>(src: DistMatRef<'_, T>, mut dst: DistMatMut<'_, T>) -> Result<()> {
    ensure_same_grid(src.grid(), dst.grid(), "sum_scatter")?;
    let expected = (dst.height(), dst.width());
    let got = (src.height(), src.width());
    if expected != got {
        return Err(DistError::ShapeMismatch {
            op: "sum_scatter",
            expected,
            got,
        });
    }

    let grid: Arc<Grid> = dst.grid().clone();
    let shape = grid.shape();
    let src_layout = src.layout();
    let dst_layout = dst.layout();

    let mut outgoing = vec![Vec::new(); shape.size()];
    if let (Some(cmap), Some(rmap)) = (src.col_map(), src.row_map()) {
        for jl in 0..src.local_width() {
            let j = rmap.global(jl);
            for il in 0..src.local_height() {
                let i = cmap.global(il);
                let value = src.get_local(il, jl);
                dst_layout
                    .owner(shape, i, j)
                    .for_each(shape, |receiver| outgoing[shape.rank_of(receiver)].push(value));
            }
        }
    }
    let incoming = grid.comm().all_to_all(outgoing)?;

    dst.fill(T::zero());
    for (sender, part) in incoming.into_iter().enumerate() {
        let sender = shape.coord_of(sender);
        let mut values = part.into_iter();
        dst.update_local(|i, j, acc| {
            if src_layout.owner(shape, i, j).contains(sender) {
                match values.next() {
                    Some(value) => acc + value,
                    None => unreachable!(),
                }
            } else {
                acc
            }
        });
    }
    Ok(())
}

/// Collective: largest absolute value of the entries, or zero for an empty matrix.
pub fn max_abs<T: ComplexField>(a: DistMatRef<'_, T>) -> Result<T::Real> {
    let zero = <T::Real as ComplexField>::zero();
    let local = a.local();
    let mut best = zero;
    for j in 0..local.ncols() {
        for i in 0..local.nrows() {
            best = best.max(local.read(i, j).abs());
        }
    }
    let best = a
        .grid()
        .comm()
        .all_reduce(vec![best], |x: T::Real, y| x.max(y))?;
    Ok(best.into_iter().next().unwrap_or(zero))
}

/// Collective: Frobenius norm, counting every entry once regardless of replication.
pub fn frobenius_norm<T: ComplexField>(a: DistMatRef<'_, T>) -> Result<T::Real> {
    let zero = <T::Real as ComplexField>::zero();
    let grid = a.grid();
    let shape = grid.shape();
    let me = grid.coord();
    let layout = a.layout();

    let mut sum = zero;
    if let (Some(cmap), Some(rmap)) = (a.col_map(), a.row_map()) {
        for jl in 0..a.local_width() {
            let j = rmap.global(jl);
            for il in 0..a.local_height() {
                let i = cmap.global(il);
                if layout.owner(shape, i, j).designated(Coord::new(0, 0)) == me {
                    sum = sum + a.get_local(il, jl).abs2();
                }
            }
        }
    }
    let sum = grid.comm().all_reduce_sum(vec![sum])?;
    Ok(sum.into_iter().next().unwrap_or(zero).sqrt())
}
