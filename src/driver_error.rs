//! DriverError: unified error type for hdg-sieve public APIs
//!
//! Engine-level failures (communication, preallocation, layout, local linear
//! algebra) surface as `DriverError`. Solver non-convergence is *not* an error;
//! it is reported through [`ConvergedReason`](crate::solver::reason::ConvergedReason).

use crate::mesh::{ElementId, FaceId};
use thiserror::Error;

/// Unified error type for hdg-sieve operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    /// A point-to-point exchange with `neighbor` failed.
    #[error("communication with rank {neighbor} failed: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// A received message did not have the expected length.
    #[error("buffer from rank {neighbor} has {got} bytes, expected {expected}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// Ownership ranges are malformed (not starting at zero, decreasing, ...).
    #[error("invalid DOF layout: {0}")]
    InvalidLayout(String),
    /// A global index lies outside `[0, len)`.
    #[error("global index {index} out of range (total {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// A rank was asked for an entry it does not own.
    #[error("global index {index} is not owned by rank {rank}")]
    NotOwned { index: usize, rank: usize },
    /// A numbered face visible to this rank has no global offset.
    #[error("face {0} has no global DOF offset")]
    MissingFaceOffset(FaceId),
    #[error("face {0} is not part of the mesh partition")]
    UnknownFace(FaceId),
    #[error("element {0} is not part of the mesh partition")]
    UnknownElement(ElementId),
    /// The mesh provider handed out an inconsistent partition.
    #[error("invalid mesh partition: {0}")]
    InvalidMesh(String),
    /// An insertion needed a nonzero slot the preallocation did not provide.
    #[error("new nonzero at ({row}, {col}) caused a malloc: preallocation undercounted")]
    NewNonzeroAllocation { row: usize, col: usize },
    /// A read was attempted before `assembly_end`.
    #[error("{0} used before assembly was finalized")]
    NotAssembled(&'static str),
    /// An insertion was attempted after `assembly_end`.
    #[error("{0} is already assembled and read-only")]
    AlreadyAssembled(&'static str),
    /// Add and insert modes were mixed within one assembly pass.
    #[error("cannot mix add and insert modes within one assembly pass")]
    MixedInsertModes,
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// A scatter plan is malformed.
    #[error("invalid scatter: {0}")]
    InvalidScatter(String),
    /// The per-element operator produced a singular local system.
    #[error("local HDG system of element {0} is singular")]
    SingularLocalBlock(ElementId),
    /// The coarsest multigrid level could not be factorized.
    #[error("coarse grid solve failed for a {n}x{n} operator")]
    CoarseSolveFailed { n: usize },
    #[error("sparse format error: {0}")]
    SparseFormat(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl From<nalgebra_sparse::SparseFormatError> for DriverError {
    fn from(err: nalgebra_sparse::SparseFormatError) -> Self {
        DriverError::SparseFormat(err.to_string())
    }
}
