//! Distributed algorithms of a solve cycle: communication, DOF numbering,
//! assembly, scatter and local recovery.

pub mod assembly;
pub mod communicator;
pub mod dof_counter;
pub mod exchange;
pub mod reconstruct;
pub mod scatter;
pub mod wire;

pub use assembly::{AssembledSystem, assemble_globals};
pub use dof_counter::{DofCount, count_dofs};
pub use reconstruct::{ReconstructedField, reconstruct};
pub use scatter::{ScatterContext, ScatterPlan, TraceBufferLayout, build_trace_scatter};
