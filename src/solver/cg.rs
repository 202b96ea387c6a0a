//! Distributed preconditioned conjugate gradient.
//!
//! The iteration follows PETSc's `KSPCG` with the preconditioned residual
//! norm: convergence when `||B r|| <= max(rtol * ||B b||, atol)`, divergence
//! when `||B r|| >= dtol * ||B b||`. Every inner product and the operator
//! application are collective, so all ranks run the same number of iterations
//! and reach the same [`ConvergedReason`].

use log::trace;

use super::pc::Preconditioner;
use super::reason::ConvergedReason;
use crate::algs::communicator::Communicator;
use crate::data::dist_matrix::DistMatrix;
use crate::data::dist_vector::DistVector;
use crate::driver_error::DriverError;

/// Distributed `y = A x`.
pub trait LinearOperator<C: Communicator> {
    fn apply(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), DriverError>;
}

impl<C: Communicator> LinearOperator<C> for DistMatrix<C> {
    fn apply(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), DriverError> {
        self.mult(comm, x, y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgTolerances {
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_it: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgOutput {
    pub reason: ConvergedReason,
    /// Number of updates made to the solution.
    pub iterations: usize,
    /// Final preconditioned residual norm.
    pub residual_norm: f64,
}

fn pc_apply(pc: &dyn Preconditioner, r: &DistVector, z: &mut DistVector) -> Result<(), DriverError> {
    pc.apply(r.local(), z.local_mut())
}

enum Check {
    Continue,
    Stop(ConvergedReason),
}

fn check(tol: &CgTolerances, rnorm: f64, rnorm0: f64, its: usize) -> Check {
    if !rnorm.is_finite() {
        Check::Stop(ConvergedReason::DivergedNanOrInf)
    } else if rnorm <= tol.atol {
        Check::Stop(ConvergedReason::ConvergedAtol)
    } else if rnorm <= tol.rtol * rnorm0 {
        Check::Stop(ConvergedReason::ConvergedRtol)
    } else if rnorm >= tol.dtol * rnorm0 && its > 0 {
        Check::Stop(ConvergedReason::DivergedDtol)
    } else if its >= tol.max_it {
        Check::Stop(ConvergedReason::DivergedIts)
    } else {
        Check::Continue
    }
}

/// Solve `A x = b` from a zero initial guess. Collective.
pub fn pcg<C, A>(
    comm: &C,
    a: &A,
    pc: &dyn Preconditioner,
    b: &DistVector,
    x: &mut DistVector,
    tol: &CgTolerances,
) -> Result<CgOutput, DriverError>
where
    C: Communicator,
    A: LinearOperator<C> + ?Sized,
{
    x.fill(0.0);
    let mut r = b.clone();
    let mut z = b.duplicate();
    let mut p = b.duplicate();
    let mut w = b.duplicate();

    pc_apply(pc, &r, &mut z)?;
    let rnorm0 = z.norm2(comm);
    let mut rnorm = rnorm0;
    let mut output = CgOutput {
        reason: ConvergedReason::DivergedIts,
        iterations: 0,
        residual_norm: rnorm,
    };
    if let Check::Stop(reason) = check(tol, rnorm, rnorm0, 0) {
        output.reason = reason;
        return Ok(output);
    }

    let mut beta = z.dot(comm, &r)?;
    if beta < 0.0 {
        output.reason = ConvergedReason::DivergedIndefinitePc;
        return Ok(output);
    }
    let mut beta_old = beta;

    for i in 0..tol.max_it {
        if i == 0 {
            p.copy_from(&z)?;
        } else {
            p.aypx(beta / beta_old, &z)?;
        }
        a.apply(comm, &p, &mut w)?;
        let pw = p.dot(comm, &w)?;
        if !pw.is_finite() {
            output.reason = ConvergedReason::DivergedNanOrInf;
            return Ok(output);
        }
        if pw <= 0.0 {
            output.reason = if pw == 0.0 {
                ConvergedReason::DivergedBreakdown
            } else {
                ConvergedReason::DivergedIndefiniteMat
            };
            return Ok(output);
        }
        let alpha = beta / pw;
        x.axpy(alpha, &p)?;
        r.axpy(-alpha, &w)?;

        pc_apply(pc, &r, &mut z)?;
        rnorm = z.norm2(comm);
        output.iterations = i + 1;
        output.residual_norm = rnorm;
        trace!("cg it {:>5}: preconditioned residual {rnorm:e}", i + 1);
        if let Check::Stop(reason) = check(tol, rnorm, rnorm0, i + 1) {
            output.reason = reason;
            return Ok(output);
        }

        beta_old = beta;
        beta = z.dot(comm, &r)?;
        if beta < 0.0 {
            output.reason = ConvergedReason::DivergedIndefinitePc;
            return Ok(output);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::dof_layout::DofLayout;
    use crate::solver::pc::{IdentityPc, JacobiPc};
    use nalgebra::DMatrix;

    fn tridiag(n: usize, d: f64) -> DistMatrix<NoComm> {
        let layout = DofLayout::serial(n);
        let cap: Vec<usize> = (0..n).map(|i| if i == 0 || i + 1 == n { 2 } else { 3 }).collect();
        let mut a = DistMatrix::preallocated(layout, &cap, &vec![0; n]).unwrap();
        for i in 0..n {
            a.add_value(i, i, d).unwrap();
            if i + 1 < n {
                let off = DMatrix::from_row_slice(2, 2, &[0.0, -1.0, -1.0, 0.0]);
                a.add_block(&[Some(i), Some(i + 1)], &[Some(i), Some(i + 1)], &off)
                    .unwrap();
            }
        }
        a.assemble(&NoComm).unwrap();
        a
    }

    fn tol() -> CgTolerances {
        CgTolerances {
            rtol: 1e-10,
            atol: 1e-50,
            dtol: 1e5,
            max_it: 1000,
        }
    }

    #[test]
    fn solves_a_tridiagonal_system() {
        let a = tridiag(20, 2.0);
        let layout = a.layout().clone();
        let b = DistVector::from_local(layout.clone(), vec![1.0; 20]).unwrap();
        let mut x = DistVector::zeros(layout.clone());
        let out = pcg(&NoComm, &a, &JacobiPc::new(&a.diagonal().unwrap()), &b, &mut x, &tol()).unwrap();
        // the residual can hit exactly zero, which the atol test catches first
        assert!(out.reason.is_converged(), "{:?}", out.reason);
        // at most n steps in exact arithmetic
        assert!(out.iterations <= 25);
        let mut ax = DistVector::zeros(layout);
        a.mult(&NoComm, &x, &mut ax).unwrap();
        for v in ax.local() {
            assert!((v - 1.0).abs() < 1e-8);
        }
    }

    #[test]
    fn zero_rhs_converges_immediately() {
        let a = tridiag(3, 2.0);
        let b = DistVector::zeros(a.layout().clone());
        let mut x = b.duplicate();
        let out = pcg(&NoComm, &a, &IdentityPc, &b, &mut x, &tol()).unwrap();
        assert_eq!(out.reason, ConvergedReason::ConvergedAtol);
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let a = tridiag(50, 2.0);
        let b = DistVector::from_local(a.layout().clone(), vec![1.0; 50]).unwrap();
        let mut x = b.duplicate();
        let capped = CgTolerances { max_it: 3, ..tol() };
        let out = pcg(&NoComm, &a, &IdentityPc, &b, &mut x, &capped).unwrap();
        assert_eq!(out.reason, ConvergedReason::DivergedIts);
        assert_eq!(out.iterations, 3);
    }

    #[test]
    fn indefinite_operator_is_detected() {
        let a = tridiag(4, -2.0);
        let b = DistVector::from_local(a.layout().clone(), vec![1.0; 4]).unwrap();
        let mut x = b.duplicate();
        let out = pcg(&NoComm, &a, &IdentityPc, &b, &mut x, &tol()).unwrap();
        assert_eq!(out.reason, ConvergedReason::DivergedIndefiniteMat);
    }
}
