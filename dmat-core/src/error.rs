//! Error types for the distributed layer.

use crate::dist::Dist;
use thiserror::Error;

/// Result type alias using [`DistError`].
pub type Result<T> = core::result::Result<T, DistError>;

/// Errors raised by the communication fabric.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A peer process panicked and the fabric was torn down.
    #[error("communication aborted: a peer process panicked")]
    Aborted,

    /// The payload of a matching call had a different type than the one requested.
    #[error("message type mismatch: expected `{expected}`")]
    TypeMismatch {
        /// Name of the type the receiver asked for
        expected: &'static str,
    },

    /// The message passing runtime was initialized before.
    #[error("the message passing runtime is already initialized")]
    AlreadyInitialized,

    /// A rank outside of the communicator was addressed.
    #[error("rank {rank} is out of range for a communicator of size {size}")]
    InvalidRank {
        /// The offending rank
        rank: usize,
        /// Size of the communicator
        size: usize,
    },
}

/// Errors raised by grids, distributed matrices and redistribution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistError {
    /// A grid dimension is zero.
    #[error("grid dimensions must be nonzero, got {height}x{width}")]
    EmptyGrid {
        /// Requested grid height
        height: usize,
        /// Requested grid width
        width: usize,
    },

    /// The grid needs more processes than the communicator provides.
    #[error("a {height}x{width} grid needs {required} processes but only {available} are available")]
    GridTooLarge {
        /// Requested grid height
        height: usize,
        /// Requested grid width
        width: usize,
        /// `height * width`
        required: usize,
        /// Size of the communicator
        available: usize,
    },

    /// The calling process is not part of the grid it tried to build.
    #[error("rank {rank} is not part of a grid of {size} processes")]
    NotInGrid {
        /// Rank of the calling process in the parent communicator
        rank: usize,
        /// Number of processes in the grid
        size: usize,
    },

    /// Two operands live on different grids.
    #[error("operands of `{op}` are distributed over different grids")]
    GridMismatch {
        /// Name of the operation
        op: &'static str,
    },

    /// The pair of distributions is not one of the supported ones.
    #[error("unsupported distribution pair [{col}, {row}]")]
    UnsupportedDistPair {
        /// Column distribution
        col: Dist,
        /// Row distribution
        row: Dist,
    },

    /// An alignment is not smaller than the stride of its distribution.
    #[error("{what} alignment {align} is out of range for stride {stride}")]
    AlignmentOutOfRange {
        /// Which dimension
        what: &'static str,
        /// Offending alignment
        align: usize,
        /// Stride of the distribution
        stride: usize,
    },

    /// The root is out of range for the distribution.
    #[error("root {root} is out of range for {dist}, which has {count} candidates")]
    RootOutOfRange {
        /// The distribution the root applies to
        dist: Dist,
        /// Offending root
        root: usize,
        /// Number of valid roots
        count: usize,
    },

    /// The operands of an operation have incompatible shapes.
    #[error("shape mismatch in `{op}`: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Name of the operation
        op: &'static str,
        /// Expected `(height, width)`
        expected: (usize, usize),
        /// Actual `(height, width)`
        got: (usize, usize),
    },

    /// Alignment can only be changed in place on an empty matrix.
    #[error("cannot change the alignment of a nonempty {height}x{width} matrix in place")]
    RealignNonEmpty {
        /// Matrix height
        height: usize,
        /// Matrix width
        width: usize,
    },

    /// A communication primitive failed.
    #[error(transparent)]
    Comm(#[from] CommError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_values() {
        let err = DistError::GridTooLarge {
            height: 3,
            width: 3,
            required: 9,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "a 3x3 grid needs 9 processes but only 4 are available"
        );

        let err = DistError::UnsupportedDistPair {
            col: Dist::Mc,
            row: Dist::Vc,
        };
        assert_eq!(err.to_string(), "unsupported distribution pair [MC, VC]");

        let err: DistError = CommError::Aborted.into();
        assert_eq!(err, DistError::Comm(CommError::Aborted));
    }
}
