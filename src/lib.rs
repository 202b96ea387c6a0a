//! # hdg-sieve
//!
//! hdg-sieve drives hybridized discontinuous Galerkin (HDG) diffusion solves
//! across cooperating ranks. Only trace unknowns on faces enter the global
//! system; interior unknowns are eliminated per element and recovered after
//! the solve.
//!
//! ## Pipeline
//! One solve cycle per (polynomial order, refinement level):
//! - [`algs::dof_counter`]: owned trace DOFs, global offsets and exact
//!   preallocation counts
//! - [`algs::assembly`]: condensed element blocks into a [`DistMatrix`] and
//!   right-hand side [`DistVector`]
//! - [`solver::ksp`]: preconditioned CG with smoothed-aggregation AMG
//! - [`algs::scatter`]: solved traces into each rank's local buffer
//! - [`algs::reconstruct`]: interior unknowns from the traces
//!
//! [`cycle::CycleOrchestrator`] loops over the configured orders and levels
//! and records one [`cycle::CycleOutcome`] per pair.
//!
//! ## Communication
//! Every distributed operation runs over a [`Communicator`]: `NoComm` for a
//! single rank, `RayonComm` for ranks simulated by threads of one process and
//! `MpiComm` with the `mpi-support` feature.
//!
//! ## Determinism
//! Numbering, assembly order and reductions are fixed by global ids and rank
//! order, so repeated runs on the same partition produce identical results.

pub mod algs;
pub mod config;
pub mod cycle;
pub mod data;
pub mod debug_invariants;
pub mod driver_error;
pub mod hdg;
pub mod mesh;
pub mod output;
pub mod solver;

pub use algs::communicator::Communicator;
pub use data::{DistMatrix, DistVector};
pub use debug_invariants::DebugInvariants;
pub use driver_error::DriverError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::assembly::{AssembledSystem, assemble_globals};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm};
    pub use crate::algs::dof_counter::{DofCount, count_dofs};
    pub use crate::algs::reconstruct::{ReconstructedField, reconstruct};
    pub use crate::algs::scatter::{
        ScatterContext, ScatterPlan, TraceBufferLayout, build_trace_scatter,
    };
    pub use crate::config::{ConfigWarning, RunConfig};
    pub use crate::cycle::{CycleOrchestrator, CycleOutcome, CycleReport, SolveCycle};
    pub use crate::data::{DistMatrix, DistVector, DofLayout, InsertMode};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::driver_error::DriverError;
    pub use crate::hdg::{ElementOperator, FaceBasis, HdgDiffusion1d, LocalBlock, LocalElimination};
    pub use crate::mesh::interval::IntervalMesh;
    pub use crate::mesh::{
        BoundaryKind, Element, ElementId, Face, FaceId, MeshPartition, MeshProvider,
    };
    pub use crate::output::{MemorySink, OutputFiles, OutputSink};
    pub use crate::solver::{ConvergedReason, Ksp, KspConfig, PcType, SolveOutcome};
}
