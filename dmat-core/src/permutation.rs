//! Row permutations.

use assert2::assert as fancy_assert;
use std::sync::Arc;

use crate::{
    dist::DistSpec,
    distmat::{DistMatMut, DistMatrix},
    error::Result,
    grid::Grid,
    redist, ComplexField,
};

/// Permutation of `0..n` stored as the sequence of transpositions that built it, in the order
/// they were applied.
///
/// # Example
///
/// ```
/// use dmat_core::Permutation;
///
/// let mut perm = Permutation::identity(4);
/// perm.push_swap(0, 2);
/// perm.push_swap(1, 2);
///
/// let mut rows = ['a', 'b', 'c', 'd'];
/// perm.apply_to_slice(&mut rows);
/// assert_eq!(rows, ['c', 'a', 'b', 'd']);
/// assert_eq!(perm.indices(), [2, 0, 1, 3]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    n: usize,
    swaps: Vec<(usize, usize)>,
}

impl Permutation {
    #[inline]
    pub fn identity(n: usize) -> Self {
        Self {
            n,
            swaps: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Appends the exchange of positions `a` and `b`.
    #[track_caller]
    #[inline]
    pub fn push_swap(&mut self, a: usize, b: usize) {
        fancy_assert!(a < self.n);
        fancy_assert!(b < self.n);
        self.swaps.push((a, b));
    }

    #[inline]
    pub fn swaps(&self) -> &[(usize, usize)] {
        &self.swaps
    }

    /// Number of recorded swaps that exchange two distinct positions.
    #[inline]
    pub fn n_transpositions(&self) -> usize {
        self.swaps.iter().filter(|(a, b)| a != b).count()
    }

    /// Permutation that applies `self`, then `other`.
    #[track_caller]
    pub fn then(mut self, other: &Permutation) -> Self {
        fancy_assert!(self.n == other.n);
        self.swaps.extend_from_slice(&other.swaps);
        self
    }

    #[inline]
    pub fn inverse(&self) -> Self {
        Self {
            n: self.n,
            swaps: self.swaps.iter().rev().copied().collect(),
        }
    }

    /// Applies the swaps to `values`, in order.
    #[track_caller]
    pub fn apply_to_slice<T>(&self, values: &mut [T]) {
        fancy_assert!(values.len() == self.n);
        for &(a, b) in &self.swaps {
            values.swap(a, b);
        }
    }

    /// Index form: row `i` of `P A` is row `indices[i]` of `A`.
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.n).collect();
        self.apply_to_slice(&mut indices);
        indices
    }

    /// Index form of the inverse permutation.
    pub fn inverse_indices(&self) -> Vec<usize> {
        let mut inverse = vec![0; self.n];
        for (i, j) in self.indices().into_iter().enumerate() {
            inverse[j] = i;
        }
        inverse
    }

    /// Collective: replaces `a` by `P a`.
    #[track_caller]
    pub fn apply_rows<T: ComplexField>(&self, a: DistMatMut<'_, T>) -> Result<()> {
        fancy_assert!(a.height() == self.n);
        redist::permute_rows(a, &self.indices())
    }

    /// Collective: replaces `a` by `Pᵀ a`.
    #[track_caller]
    pub fn apply_rows_inverse<T: ComplexField>(&self, a: DistMatMut<'_, T>) -> Result<()> {
        fancy_assert!(a.height() == self.n);
        redist::permute_rows(a, &self.inverse_indices())
    }

    /// Explicit permutation matrix, with `P(i, indices[i]) = 1`.
    pub fn to_dist_matrix<T: ComplexField>(
        &self,
        grid: &Arc<Grid>,
        spec: DistSpec,
    ) -> Result<DistMatrix<T>> {
        let indices = self.indices();
        DistMatrix::from_fn(self.n, self.n, grid, spec, |i, j| {
            if indices[i] == j {
                T::one()
            } else {
                T::zero()
            }
        })
    }
}
