//! Per-element operator boundary of the HDG discretization.
//!
//! An [`ElementOperator`] turns one element into a condensed trace block, the
//! matching right-hand side and the map that recovers the interior unknowns
//! from the traces afterwards. Trace DOFs of an element are ordered by its
//! local face order, `dofs_per_face` per face.

pub mod basis;
pub mod diffusion1d;

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::driver_error::DriverError;
use crate::mesh::{Element, Face, MeshPartition};

pub use diffusion1d::HdgDiffusion1d;

/// Basis used for trace unknowns on faces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceBasis {
    /// Modal Legendre polynomials
    #[default]
    Legendre,
    /// Nodal Lagrange polynomials
    Lagrange,
}

impl FaceBasis {
    pub fn name(self) -> &'static str {
        match self {
            FaceBasis::Legendre => "legendre",
            FaceBasis::Lagrange => "lagrange",
        }
    }
}

impl fmt::Display for FaceBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FaceBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legendre" => Ok(FaceBasis::Legendre),
            "lagrange" => Ok(FaceBasis::Lagrange),
            other => Err(other.to_string()),
        }
    }
}

/// Back-substitution data: `interior = solve_map * traces + offset`.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalElimination {
    pub solve_map: DMatrix<f64>,
    pub offset: DVector<f64>,
    /// Prescribed value of each trace DOF, `None` where the trace is solved for.
    pub fixed_traces: Vec<Option<f64>>,
}

/// Output of [`ElementOperator::compute_local_block`].
#[derive(Clone, Debug, PartialEq)]
pub struct LocalBlock {
    /// Condensed trace-trace coupling over all trace DOFs of the element
    pub coupling: DMatrix<f64>,
    /// Condensed right-hand side before prescribed traces are eliminated
    pub rhs: DVector<f64>,
    pub elimination: LocalElimination,
}

impl LocalBlock {
    pub fn n_trace(&self) -> usize {
        self.rhs.len()
    }
}

pub trait ElementOperator {
    /// Condensed block of `element` for polynomial order `order`.
    fn compute_local_block(
        &self,
        element: &Element,
        partition: &MeshPartition,
        order: usize,
    ) -> Result<LocalBlock, DriverError>;

    /// Reference trace coefficients of `face`.
    fn exact_trace(&self, face: &Face, order: usize) -> Vec<f64>;

    /// Squared L2 error of the scalar unknown over `element`.
    fn interior_error(
        &self,
        element: &Element,
        order: usize,
        interior: &[f64],
    ) -> Result<f64, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_basis_names() {
        assert_eq!("lagrange".parse::<FaceBasis>(), Ok(FaceBasis::Lagrange));
        assert_eq!("chebyshev".parse::<FaceBasis>(), Err("chebyshev".to_string()));
        assert_eq!(FaceBasis::default().to_string(), "legendre");
    }
}
