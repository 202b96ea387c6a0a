//! Preconditioners applied to each rank's owned block of a residual.
//!
//! All preconditioners here are rank-local (block Jacobi across ranks), so
//! `apply` never communicates.

use crate::driver_error::DriverError;

pub trait Preconditioner: Send + Sync {
    /// `z = B r` on the owned entries.
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), DriverError>;

    fn name(&self) -> &'static str;
}

fn check_len(context: &'static str, expected: usize, r: &[f64], z: &[f64]) -> Result<(), DriverError> {
    for got in [r.len(), z.len()] {
        if got != expected {
            return Err(DriverError::DimensionMismatch {
                context,
                expected,
                got,
            });
        }
    }
    Ok(())
}

#[derive(Clone, Debug, Default)]
pub struct IdentityPc;

impl Preconditioner for IdentityPc {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), DriverError> {
        check_len("IdentityPc::apply", r.len(), r, z)?;
        z.copy_from_slice(r);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Diagonal scaling. Zero diagonal entries are treated as one.
#[derive(Clone, Debug)]
pub struct JacobiPc {
    inv_diag: Vec<f64>,
}

impl JacobiPc {
    pub fn new(diagonal: &[f64]) -> Self {
        let inv_diag = diagonal
            .iter()
            .map(|&d| if d == 0.0 { 1.0 } else { 1.0 / d })
            .collect();
        Self { inv_diag }
    }
}

impl Preconditioner for JacobiPc {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), DriverError> {
        check_len("JacobiPc::apply", self.inv_diag.len(), r, z)?;
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * di;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jacobi"
    }
}
