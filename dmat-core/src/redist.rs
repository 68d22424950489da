//! Redistribution between any two supported layouts.
//!
//! [`copy`] picks one [`Recipe`] from the source and destination layouts and runs it. Every
//! process of the grid must call it with matching arguments. When an entry is held by several
//! source processes, the receiver at `q` takes it from
//! [`Owner::designated(q)`](crate::dist::Owner::designated), so that senders and receivers
//! agree on who ships what without negotiating.

use assert2::assert as fancy_assert;
use reborrow::*;

use crate::{
    dist::{axis_map, Dist, GridShape, Layout},
    distmat::{DistMatMut, DistMatRef},
    error::{DistError, Result},
    grid::{ensure_same_grid, CommScope},
    ComplexField,
};

/// Communication pattern used by a redistribution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipe {
    /// Identical layouts: local copy.
    Copy,
    /// Every destination entry is already held locally.
    Filter,
    /// The destination replicates one dimension that the source splits over `scope`.
    AllGather { rows: bool, scope: CommScope },
    /// The source lives on a single process, which broadcasts it.
    Broadcast,
    /// The destination lives on a single process, which gathers it.
    Gather,
    /// General personalized exchange over the whole grid.
    Exchange,
}

/// Whether the indices owned along one dimension by `dst` are owned along the same dimension
/// by `src`, on every process.
fn dim_covers(
    shape: GridShape,
    (src, src_align, src_root): (Dist, usize, usize),
    (dst, dst_align, dst_root): (Dist, usize, usize),
) -> bool {
    match (src, dst) {
        (Dist::Star, _) => true,
        (Dist::Md, Dist::Md) | (Dist::Circ, Dist::Circ) => {
            src_align == dst_align && src_root == dst_root
        }
        (a, b) if a == b => src_align == dst_align,
        (Dist::Mc, Dist::Vc) | (Dist::Mc, Dist::Md) => src_align == dst_align % shape.height(),
        (Dist::Mr, Dist::Vr) => src_align == dst_align % shape.width(),
        (Dist::Mr, Dist::Md) => src_align == (dst_align + dst_root) % shape.width(),
        _ => false,
    }
}

fn gather_scope(dist: Dist) -> Option<CommScope> {
    match dist {
        Dist::Mc => Some(CommScope::Col),
        Dist::Mr => Some(CommScope::Row),
        Dist::Vc => Some(CommScope::Vc),
        Dist::Vr => Some(CommScope::Vr),
        _ => None,
    }
}

/// Chooses the communication pattern for redistributing `src` into `dst`.
pub fn select_recipe(shape: GridShape, src: Layout, dst: Layout) -> Recipe {
    let (s, d) = (src.spec, dst.spec);
    if s == d {
        return Recipe::Copy;
    }

    let col_covered = dim_covers(
        shape,
        (s.col_dist, s.col_align, s.root),
        (d.col_dist, d.col_align, d.root),
    );
    let row_covered = dim_covers(
        shape,
        (s.row_dist, s.row_align, s.root),
        (d.row_dist, d.row_align, d.root),
    );
    if col_covered && row_covered {
        return Recipe::Filter;
    }
    if s.col_dist == Dist::Circ {
        return Recipe::Broadcast;
    }
    if d.col_dist == Dist::Circ {
        return Recipe::Gather;
    }

    let same_rows = s.row_dist == d.row_dist && s.row_align == d.row_align;
    let same_cols = s.col_dist == d.col_dist && s.col_align == d.col_align;
    if same_rows && d.col_dist == Dist::Star {
        if let Some(scope) = gather_scope(s.col_dist) {
            return Recipe::AllGather { rows: true, scope };
        }
    }
    if same_cols && d.row_dist == Dist::Star {
        if let Some(scope) = gather_scope(s.row_dist) {
            return Recipe::AllGather { rows: false, scope };
        }
    }
    Recipe::Exchange
}

/// Collective: copies `src` into `dst`, which must have the same dimensions and live on the
/// same grid.
pub fn copy<T: ComplexField>(src: DistMatRef<'_, T>, dst: DistMatMut<'_, T>) -> Result<()> {
    ensure_same_grid(src.grid(), dst.grid(), "copy")?;
    let expected = (dst.height(), dst.width());
    let got = (src.height(), src.width());
    if expected != got {
        return Err(DistError::ShapeMismatch {
            op: "copy",
            expected,
            got,
        });
    }

    let recipe = select_recipe(src.grid().shape(), src.layout(), dst.layout());
    tracing::trace!(
        ?recipe,
        src_col = %src.col_dist(),
        src_row = %src.row_dist(),
        dst_col = %dst.col_dist(),
        dst_row = %dst.row_dist(),
        height = got.0,
        width = got.1,
        "redistribute"
    );

    match recipe {
        Recipe::Copy => {
            let mut dst = dst;
            dst.local_mut().copy_from(src.local());
            Ok(())
        }
        Recipe::Filter => {
            filter(src, dst);
            Ok(())
        }
        Recipe::AllGather { rows: true, scope } => all_gather_rows(src, dst, scope),
        Recipe::AllGather { rows: false, scope } => {
            all_gather_rows(src.transpose(), dst.transpose(), scope)
        }
        Recipe::Broadcast => broadcast(src, dst),
        Recipe::Gather => gather(src, dst),
        Recipe::Exchange => exchange(src, dst),
    }
}

fn filter<T: ComplexField>(src: DistMatRef<'_, T>, mut dst: DistMatMut<'_, T>) {
    let (Some(cmap), Some(rmap)) = (dst.col_map(), dst.row_map()) else {
        return;
    };
    for jl in 0..dst.local_width() {
        let src_jl = src.local_col(rmap.global(jl));
        for il in 0..dst.local_height() {
            match (src.local_row(cmap.global(il)), src_jl) {
                (Some(src_il), Some(src_jl)) => dst.set_local(il, jl, src.get_local(src_il, src_jl)),
                _ => unreachable!(),
            }
        }
    }
}

/// Gathers the rows split over `scope` so that every member of `scope` holds all of them.
fn all_gather_rows<T: ComplexField>(
    src: DistMatRef<'_, T>,
    mut dst: DistMatMut<'_, T>,
    scope: CommScope,
) -> Result<()> {
    let grid = dst.grid().clone();
    let shape = grid.shape();
    let spec = src.spec();
    let height = src.height();
    let ncols = dst.local_width();

    let parts = grid
        .scope(scope)
        .all_gather(src.local().to_col_major_vec())?;
    let mut local = dst.local_mut();
    for (rank, part) in parts.into_iter().enumerate() {
        let coord = grid.member_coord(scope, rank);
        let Some(map) = axis_map(shape, spec.col_dist, spec.col_align, spec.root, coord) else {
            unreachable!()
        };
        let nrows = map.local_len(height);
        for jl in 0..ncols {
            for il in 0..nrows {
                local.write(map.global(il), jl, part[il + jl * nrows]);
            }
        }
    }
    Ok(())
}

fn broadcast<T: ComplexField>(src: DistMatRef<'_, T>, mut dst: DistMatMut<'_, T>) -> Result<()> {
    let grid = dst.grid().clone();
    let root = src.root();
    let full = if grid.rank() == root {
        Some(src.local().to_col_major_vec())
    } else {
        None
    };
    let full = grid.comm().broadcast(root, full)?;
    let height = src.height();
    dst.update_local(|i, j, _| full[i + j * height]);
    Ok(())
}

fn gather<T: ComplexField>(src: DistMatRef<'_, T>, mut dst: DistMatMut<'_, T>) -> Result<()> {
    let grid = dst.grid().clone();
    let shape = grid.shape();
    let root = dst.root();
    let receiver = shape.coord_of(root);
    let layout = src.layout();
    let me = grid.coord();

    let mut outgoing = Vec::new();
    if let (Some(cmap), Some(rmap)) = (src.col_map(), src.row_map()) {
        for jl in 0..src.local_width() {
            let j = rmap.global(jl);
            for il in 0..src.local_height() {
                let i = cmap.global(il);
                if layout.owner(shape, i, j).designated(receiver) == me {
                    outgoing.push(src.get_local(il, jl));
                }
            }
        }
    }

    let Some(parts) = grid.comm().gather(root, outgoing)? else {
        return Ok(());
    };
    let mut local = dst.local_mut();
    for (rank, part) in parts.into_iter().enumerate() {
        let sender = shape.coord_of(rank);
        let Some((cmap, rmap)) = layout.maps(shape, sender) else {
            continue;
        };
        let mut values = part.into_iter();
        for jl in 0..rmap.local_len(layout.width) {
            let j = rmap.global(jl);
            for il in 0..cmap.local_len(layout.height) {
                let i = cmap.global(il);
                if layout.owner(shape, i, j).designated(receiver) == sender {
                    match values.next() {
                        Some(value) => local.write(i, j, value),
                        None => unreachable!(),
                    }
                }
            }
        }
    }
    Ok(())
}

fn exchange<T: ComplexField>(src: DistMatRef<'_, T>, mut dst: DistMatMut<'_, T>) -> Result<()> {
    let grid = dst.grid().clone();
    let shape = grid.shape();
    let me = grid.coord();
    let src_layout = src.layout();
    let dst_layout = dst.layout();

    // both sides walk their entries in global column-major order
    let mut outgoing = vec![Vec::new(); shape.size()];
    if let (Some(cmap), Some(rmap)) = (src.col_map(), src.row_map()) {
        for jl in 0..src.local_width() {
            let j = rmap.global(jl);
            for il in 0..src.local_height() {
                let i = cmap.global(il);
                let holders = src_layout.owner(shape, i, j);
                let value = src.get_local(il, jl);
                dst_layout.owner(shape, i, j).for_each(shape, |receiver| {
                    if holders.designated(receiver) == me {
                        outgoing[shape.rank_of(receiver)].push(value);
                    }
                });
            }
        }
    }

    let incoming = grid.comm().all_to_all(outgoing)?;
    let mut incoming: Vec<_> = incoming.into_iter().map(Vec::into_iter).collect();
    dst.update_local(|i, j, _| {
        let sender = shape.rank_of(src_layout.owner(shape, i, j).designated(me));
        match incoming[sender].next() {
            Some(value) => value,
            None => unreachable!(),
        }
    });
    Ok(())
}

/// Collective: sets `dst(i, j) = src(source(i, j))` for every entry of `dst`.
///
/// Each process requests the entries it needs from their designated holders, which reply in
/// request order.
pub(crate) fn pull<T: ComplexField>(
    src: DistMatRef<'_, T>,
    mut dst: DistMatMut<'_, T>,
    source: impl Fn(usize, usize) -> (usize, usize),
) -> Result<()> {
    ensure_same_grid(src.grid(), dst.grid(), "pull")?;
    let grid = dst.grid().clone();
    let shape = grid.shape();
    let me = grid.coord();
    let src_layout = src.layout();

    let mut requests = vec![Vec::new(); shape.size()];
    let mut senders = Vec::new();
    if let (Some(cmap), Some(rmap)) = (dst.col_map(), dst.row_map()) {
        for jl in 0..dst.local_width() {
            let j = rmap.global(jl);
            for il in 0..dst.local_height() {
                let (si, sj) = source(cmap.global(il), j);
                let sender = shape.rank_of(src_layout.owner(shape, si, sj).designated(me));
                requests[sender].push((si, sj));
                senders.push(sender);
            }
        }
    }

    let requests = grid.comm().all_to_all(requests)?;
    let replies: Vec<Vec<T>> = requests
        .into_iter()
        .map(|wanted| {
            wanted
                .into_iter()
                .map(|(i, j)| match (src.local_row(i), src.local_col(j)) {
                    (Some(il), Some(jl)) => src.get_local(il, jl),
                    _ => unreachable!(),
                })
                .collect()
        })
        .collect();
    let replies = grid.comm().all_to_all(replies)?;

    let mut replies: Vec<_> = replies.into_iter().map(Vec::into_iter).collect();
    let mut senders = senders.into_iter();
    dst.update_local(|_, _, _| match senders.next().and_then(|s| replies[s].next()) {
        Some(value) => value,
        None => unreachable!(),
    });
    Ok(())
}

/// Collective: reorders the rows of `a` so that row `i` of the result is row `indices[i]` of
/// the input. Every row may come from any process, so this is a single grouped exchange.
#[track_caller]
pub fn permute_rows<T: ComplexField>(mut a: DistMatMut<'_, T>, indices: &[usize]) -> Result<()> {
    fancy_assert!(indices.len() == a.height());
    for &i in indices {
        fancy_assert!(i < a.height());
    }
    let grid = a.grid().clone();
    let snapshot = a.local().to_owned();
    let src = DistMatRef::from_parts(a.layout(), &grid, snapshot.as_ref());
    pull(src, a.rb_mut(), |i, j| (indices[i], j))
}
