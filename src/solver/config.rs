//! Krylov solver and preconditioner configuration.
//!
//! Option names and defaults follow PETSc (`-ksp_rtol`, `-pc_type gamg`, ...),
//! so a run can be reproduced against a PETSc build with the same flags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Krylov method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KspType {
    /// Conjugate Gradient (SPD systems)
    #[default]
    CG,
    /// Preconditioner application only
    PreOnly,
}

impl KspType {
    /// PETSc string identifier for this KSP type.
    pub fn petsc_name(&self) -> &'static str {
        match self {
            KspType::CG => "cg",
            KspType::PreOnly => "preonly",
        }
    }
}

/// Preconditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcType {
    /// No preconditioner
    None,
    /// Diagonal scaling
    Jacobi,
    /// Algebraic multigrid on each rank's diagonal block
    #[default]
    Gamg,
}

impl PcType {
    /// PETSc string identifier for this PC type.
    pub fn petsc_name(&self) -> &'static str {
        match self {
            PcType::None => "none",
            PcType::Jacobi => "jacobi",
            PcType::Gamg => "gamg",
        }
    }
}

/// Multigrid flavour used by `PcType::Gamg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GamgType {
    /// Smoothed aggregation
    #[default]
    Agg,
}

impl GamgType {
    pub fn petsc_name(&self) -> &'static str {
        match self {
            GamgType::Agg => "agg",
        }
    }
}

/// Unrecognized name for a solver enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownName(pub String);

impl fmt::Display for UnknownName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown solver option value '{}'", self.0)
    }
}

impl std::error::Error for UnknownName {}

impl FromStr for KspType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cg" => Ok(KspType::CG),
            "preonly" => Ok(KspType::PreOnly),
            other => Err(UnknownName(other.to_string())),
        }
    }
}

impl FromStr for PcType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PcType::None),
            "jacobi" => Ok(PcType::Jacobi),
            "gamg" => Ok(PcType::Gamg),
            other => Err(UnknownName(other.to_string())),
        }
    }
}

/// Settings of the algebraic multigrid hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmgConfig {
    pub gamg_type: GamgType,
    /// Prolongator smoothing steps (`-pc_gamg_agg_nsmooths`)
    pub agg_nsmooths: usize,
    /// Stop coarsening once a level has at most this many rows
    pub coarse_eq_limit: usize,
    pub max_levels: usize,
    /// Strength-of-connection threshold; 0 keeps every nonzero
    pub threshold: f64,
    /// Damping of the Jacobi smoother relative to `1 / rho(D^-1 A)`
    pub smoother_damping: f64,
    pub smoother_sweeps: usize,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            gamg_type: GamgType::Agg,
            agg_nsmooths: 1,
            coarse_eq_limit: 50,
            max_levels: 10,
            threshold: 0.0,
            smoother_damping: 2.0 / 3.0,
            smoother_sweeps: 2,
        }
    }
}

/// Configuration for the Krylov linear solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KspConfig {
    pub solver_type: KspType,
    pub precond_type: PcType,
    /// Relative tolerance on the preconditioned residual norm
    pub relative_tol: f64,
    /// Absolute tolerance on the preconditioned residual norm
    pub absolute_tol: f64,
    /// Divergence tolerance (residual growth factor)
    pub divergence_tol: f64,
    pub max_iterations: usize,
    pub amg: AmgConfig,
}

impl Default for KspConfig {
    fn default() -> Self {
        Self {
            solver_type: KspType::CG,
            precond_type: PcType::Gamg,
            relative_tol: 1e-8,
            absolute_tol: 1e-50,
            divergence_tol: 1e5,
            max_iterations: 10_000,
            amg: AmgConfig::default(),
        }
    }
}

impl KspConfig {
    /// CG with smoothed-aggregation AMG, one smoothing pass.
    pub fn cg_gamg() -> Self {
        Self::default()
    }

    /// CG with Jacobi preconditioning.
    pub fn cg_jacobi() -> Self {
        Self {
            precond_type: PcType::Jacobi,
            ..Default::default()
        }
    }

    /// Set relative tolerance.
    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.relative_tol = rtol;
        self
    }

    /// Equivalent PETSc command-line options.
    pub fn to_petsc_options(&self) -> Vec<(String, String)> {
        let mut opts = vec![
            ("-ksp_type".into(), self.solver_type.petsc_name().into()),
            ("-pc_type".into(), self.precond_type.petsc_name().into()),
            ("-ksp_rtol".into(), self.relative_tol.to_string()),
            ("-ksp_atol".into(), self.absolute_tol.to_string()),
            ("-ksp_divtol".into(), self.divergence_tol.to_string()),
            ("-ksp_max_it".into(), self.max_iterations.to_string()),
        ];
        if self.precond_type == PcType::Gamg {
            opts.push(("-pc_gamg_type".into(), self.amg.gamg_type.petsc_name().into()));
            opts.push((
                "-pc_gamg_agg_nsmooths".into(),
                self.amg.agg_nsmooths.to_string(),
            ));
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_driver() {
        let cfg = KspConfig::default();
        assert_eq!(cfg.solver_type, KspType::CG);
        assert_eq!(cfg.precond_type, PcType::Gamg);
        assert_eq!(cfg.relative_tol, 1e-8);
        assert_eq!(cfg.amg.agg_nsmooths, 1);
    }

    #[test]
    fn names_round_trip() {
        for pc in [PcType::None, PcType::Jacobi, PcType::Gamg] {
            assert_eq!(pc.petsc_name().parse::<PcType>().unwrap(), pc);
        }
        assert!("ilu".parse::<PcType>().is_err());
    }

    #[test]
    fn petsc_options_include_gamg_settings() {
        let opts = KspConfig::default().to_petsc_options();
        assert!(opts.contains(&("-pc_type".to_string(), "gamg".to_string())));
        assert!(opts.contains(&("-pc_gamg_agg_nsmooths".to_string(), "1".to_string())));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = KspConfig::cg_jacobi().with_rtol(1e-6);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: KspConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.precond_type, PcType::Jacobi);
        assert_eq!(back.relative_tol, 1e-6);
    }
}
