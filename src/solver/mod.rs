//! Krylov solve of the assembled trace system.

pub mod amg;
pub mod cg;
pub mod config;
pub mod ksp;
pub mod pc;
pub mod reason;

pub use config::{AmgConfig, KspConfig, KspType, PcType};
pub use ksp::{Ksp, SolveOutcome};
pub use reason::ConvergedReason;
