//! Convergence-reason taxonomy of the Krylov driver.
//!
//! Numeric codes are PETSc's `KSPConvergedReason` values, which is what the
//! driver writes to `Convergence_Result.txt`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergedReason {
    /// Preconditioned residual below `rtol * ||b||`
    ConvergedRtol,
    /// Preconditioned residual below `atol`
    ConvergedAtol,
    /// Fixed iteration count completed (`preonly`)
    ConvergedIts,
    /// `max_it` reached
    DivergedIts,
    /// Residual grew beyond `dtol * ||b||`
    DivergedDtol,
    /// Search direction with zero curvature
    DivergedBreakdown,
    /// Preconditioner is not positive definite
    DivergedIndefinitePc,
    DivergedNanOrInf,
    /// Operator is not positive definite
    DivergedIndefiniteMat,
}

impl ConvergedReason {
    pub fn code(self) -> i32 {
        match self {
            ConvergedReason::ConvergedRtol => 2,
            ConvergedReason::ConvergedAtol => 3,
            ConvergedReason::ConvergedIts => 4,
            ConvergedReason::DivergedIts => -3,
            ConvergedReason::DivergedDtol => -4,
            ConvergedReason::DivergedBreakdown => -5,
            ConvergedReason::DivergedIndefinitePc => -8,
            ConvergedReason::DivergedNanOrInf => -9,
            ConvergedReason::DivergedIndefiniteMat => -10,
        }
    }

    pub fn is_converged(self) -> bool {
        self.code() > 0
    }

    pub fn petsc_name(self) -> &'static str {
        match self {
            ConvergedReason::ConvergedRtol => "CONVERGED_RTOL",
            ConvergedReason::ConvergedAtol => "CONVERGED_ATOL",
            ConvergedReason::ConvergedIts => "CONVERGED_ITS",
            ConvergedReason::DivergedIts => "DIVERGED_ITS",
            ConvergedReason::DivergedDtol => "DIVERGED_DTOL",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::DivergedIndefinitePc => "DIVERGED_INDEFINITE_PC",
            ConvergedReason::DivergedNanOrInf => "DIVERGED_NANORINF",
            ConvergedReason::DivergedIndefiniteMat => "DIVERGED_INDEFINITE_MAT",
        }
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.petsc_name(), self.code())
    }
}
