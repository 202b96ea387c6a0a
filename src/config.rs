//! Run configuration parsed from PETSc-style command-line options.
//!
//! Options are single-dash names followed by a value (`-p_0 1 -h_n 6`).
//! Problems never abort a run: each one becomes a [`ConfigWarning`] and the
//! affected setting keeps its default.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hdg::FaceBasis;
use crate::solver::config::{KspConfig, KspType, PcType};

/// Something in the argument list that was ignored.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigWarning {
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("option '{0}' expects a value")]
    MissingValue(String),
    #[error("invalid value '{value}' for option '{option}'")]
    InvalidValue { option: String, value: String },
    #[error("the face basis type should either be <lagrange> or <legendre> (default), got '{0}'")]
    UnknownFaceBasis(String),
    #[error("empty range [{lo}, {hi}) for {what}; nothing will be solved")]
    EmptyRange {
        what: &'static str,
        lo: usize,
        hi: usize,
    },
}

/// Everything the driver needs for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// First polynomial order (inclusive)
    pub p_0: usize,
    /// Last polynomial order (exclusive)
    pub p_n: usize,
    /// First refinement level (inclusive)
    pub h_0: usize,
    /// Last refinement level (exclusive)
    pub h_n: usize,
    /// Graded refinement towards the lower end of the domain
    pub adaptive: bool,
    pub face_basis: FaceBasis,
    /// Elements of the level-0 mesh
    pub base_elements: usize,
    pub ksp: KspConfig,
    pub output_dir: PathBuf,
    /// In-process ranks when running without MPI
    pub ranks: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            p_0: 1,
            p_n: 2,
            h_0: 2,
            h_n: 4,
            adaptive: false,
            face_basis: FaceBasis::Legendre,
            base_elements: 2,
            ksp: KspConfig::default(),
            output_dir: PathBuf::from("."),
            ranks: 1,
        }
    }
}

fn parse_value<T: FromStr>(
    option: &str,
    value: Option<&String>,
    warnings: &mut Vec<ConfigWarning>,
) -> Option<T> {
    let Some(value) = value else {
        warnings.push(ConfigWarning::MissingValue(option.to_string()));
        return None;
    };
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(ConfigWarning::InvalidValue {
                option: option.to_string(),
                value: value.clone(),
            });
            None
        }
    }
}

impl RunConfig {
    /// Parse options, without the program name.
    pub fn from_args<I, S>(args: I) -> (Self, Vec<ConfigWarning>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut cfg = Self::default();
        let mut warnings = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let option = args[i].as_str();
            // a missing value never swallows the next option
            let value = args.get(i + 1).filter(|v| !is_option(v));
            i += if value.is_some() { 2 } else { 1 };
            let w = &mut warnings;
            match option {
                "-p_0" => set(&mut cfg.p_0, parse_value(option, value, w)),
                "-p_n" => set(&mut cfg.p_n, parse_value(option, value, w)),
                "-h_0" => set(&mut cfg.h_0, parse_value(option, value, w)),
                "-h_n" => set(&mut cfg.h_n, parse_value(option, value, w)),
                "-amr" => match parse_value::<u32>(option, value, w) {
                    Some(0) => cfg.adaptive = false,
                    Some(1) => cfg.adaptive = true,
                    Some(other) => w.push(ConfigWarning::InvalidValue {
                        option: option.to_string(),
                        value: other.to_string(),
                    }),
                    None => {}
                },
                "-face_basis" => match value {
                    Some(v) => match v.parse::<FaceBasis>() {
                        Ok(basis) => cfg.face_basis = basis,
                        Err(name) => w.push(ConfigWarning::UnknownFaceBasis(name)),
                    },
                    None => w.push(ConfigWarning::MissingValue(option.to_string())),
                },
                "-base_elements" => {
                    if let Some(n) = parse_value::<usize>(option, value, w).filter(|&n| n > 0) {
                        cfg.base_elements = n;
                    }
                }
                "-ksp_type" => set(&mut cfg.ksp.solver_type, parse_value::<KspType>(option, value, w)),
                "-ksp_rtol" => set(&mut cfg.ksp.relative_tol, parse_value(option, value, w)),
                "-ksp_atol" => set(&mut cfg.ksp.absolute_tol, parse_value(option, value, w)),
                "-ksp_divtol" => set(&mut cfg.ksp.divergence_tol, parse_value(option, value, w)),
                "-ksp_max_it" => set(&mut cfg.ksp.max_iterations, parse_value(option, value, w)),
                "-pc_type" => set(&mut cfg.ksp.precond_type, parse_value::<PcType>(option, value, w)),
                "-pc_gamg_agg_nsmooths" => {
                    set(&mut cfg.ksp.amg.agg_nsmooths, parse_value(option, value, w))
                }
                "-output_dir" => match value {
                    Some(v) => cfg.output_dir = PathBuf::from(v),
                    None => w.push(ConfigWarning::MissingValue(option.to_string())),
                },
                "-ranks" => {
                    if let Some(n) = parse_value::<usize>(option, value, w).filter(|&n| n > 0) {
                        cfg.ranks = n;
                    }
                }
                other => w.push(ConfigWarning::UnknownOption(other.to_string())),
            }
        }
        if cfg.p_n <= cfg.p_0 {
            warnings.push(ConfigWarning::EmptyRange {
                what: "polynomial orders",
                lo: cfg.p_0,
                hi: cfg.p_n,
            });
        }
        if cfg.h_n <= cfg.h_0 {
            warnings.push(ConfigWarning::EmptyRange {
                what: "refinement levels",
                lo: cfg.h_0,
                hi: cfg.h_n,
            });
        }
        (cfg, warnings)
    }

    /// Polynomial orders of the outer loop.
    pub fn orders(&self) -> std::ops::Range<usize> {
        self.p_0..self.p_n
    }

    /// Refinement levels of the inner loop.
    pub fn levels(&self) -> std::ops::Range<usize> {
        self.h_0..self.h_n
    }
}

/// `-name` but not a negative number.
fn is_option(token: &str) -> bool {
    token.starts_with('-') && token.parse::<f64>().is_err()
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Help text printed by the coordinator at start-up and after a warning.
pub fn usage() -> &'static str {
    "usage: hdg-driver [options]\n\
     \x20 -p_0 <n>                   first polynomial order (default 1)\n\
     \x20 -p_n <n>                   end of polynomial orders, exclusive (default 2)\n\
     \x20 -h_0 <n>                   first refinement level (default 2)\n\
     \x20 -h_n <n>                   end of refinement levels, exclusive (default 4)\n\
     \x20 -amr 0|1                   graded refinement (default 0)\n\
     \x20 -face_basis legendre|lagrange\n\
     \x20 -base_elements <n>         elements of the coarsest mesh (default 2)\n\
     \x20 -ksp_type cg|preonly\n\
     \x20 -ksp_rtol <x> -ksp_atol <x> -ksp_divtol <x> -ksp_max_it <n>\n\
     \x20 -pc_type gamg|jacobi|none  -pc_gamg_agg_nsmooths <n>\n\
     \x20 -output_dir <path>         where result files are written (default .)\n\
     \x20 -ranks <n>                 in-process ranks without MPI (default 1)\n\
     example: hdg-driver -h_0 2 -h_n 12 -p_0 1 -p_n 2 -amr 1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_arguments() {
        let (cfg, warnings) = RunConfig::from_args(Vec::<String>::new());
        assert!(warnings.is_empty());
        assert_eq!(cfg.orders(), 1..2);
        assert_eq!(cfg.levels(), 2..4);
        assert!(!cfg.adaptive);
        assert_eq!(cfg.face_basis, FaceBasis::Legendre);
    }

    #[test]
    fn unknown_face_basis_keeps_default() {
        let (cfg, warnings) = RunConfig::from_args(["-face_basis", "nodal"]);
        assert_eq!(cfg.face_basis, FaceBasis::Legendre);
        assert_eq!(warnings, vec![ConfigWarning::UnknownFaceBasis("nodal".into())]);
    }

    #[test]
    fn lone_unknown_flag_does_not_eat_next_option() {
        let (cfg, warnings) = RunConfig::from_args(["-log_view", "-h_n", "7"]);
        assert_eq!(cfg.h_n, 7);
        assert_eq!(warnings, vec![ConfigWarning::UnknownOption("-log_view".into())]);
    }
}
