//! Linear solver driver: preconditioner setup, Krylov solve and diagnostics.

use log::{debug, warn};

use super::amg::AmgPreconditioner;
use super::cg::{CgTolerances, pcg};
use super::config::{KspConfig, KspType, PcType};
use super::pc::{IdentityPc, JacobiPc, Preconditioner};
use super::reason::ConvergedReason;
use crate::algs::communicator::Communicator;
use crate::data::dist_matrix::DistMatrix;
use crate::data::dist_vector::DistVector;
use crate::driver_error::DriverError;

/// Result of one solve.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub solution: DistVector,
    pub reason: ConvergedReason,
    pub iterations: usize,
    /// Final preconditioned residual norm
    pub residual_norm: f64,
    pub rhs_norm: f64,
    pub solution_norm: f64,
    /// `||exact - x||_2` when a reference vector was given
    pub accuracy: Option<f64>,
}

/// Krylov solver context bound to one assembled operator.
pub struct Ksp<'a, C: Communicator> {
    config: KspConfig,
    operator: &'a DistMatrix<C>,
    pc: Box<dyn Preconditioner>,
}

fn build_pc<C: Communicator>(
    config: &KspConfig,
    a: &DistMatrix<C>,
) -> Result<Box<dyn Preconditioner>, DriverError> {
    Ok(match config.precond_type {
        PcType::None => Box::new(IdentityPc),
        PcType::Jacobi => Box::new(JacobiPc::new(&a.diagonal()?)),
        PcType::Gamg => Box::new(AmgPreconditioner::build(a.local_diagonal_block()?, &config.amg)?),
    })
}

impl<'a, C: Communicator> Ksp<'a, C> {
    /// Set up the preconditioner for `operator`. Rank-local.
    pub fn setup(config: KspConfig, operator: &'a DistMatrix<C>) -> Result<Self, DriverError> {
        if config.solver_type == KspType::CG && !operator.is_spd() {
            warn!("CG requested for an operator not flagged SPD");
        }
        let pc = build_pc(&config, operator)?;
        debug!(
            "ksp setup: {} / {} on {} owned rows",
            config.solver_type.petsc_name(),
            pc.name(),
            operator.layout().owned_count()
        );
        Ok(Self {
            config,
            operator,
            pc,
        })
    }

    /// Solve `A x = b`. Collective; a non-converged reason is a normal outcome.
    pub fn solve(
        &self,
        comm: &C,
        b: &DistVector,
        exact: Option<&DistVector>,
    ) -> Result<SolveOutcome, DriverError> {
        let mut x = b.duplicate();
        let (reason, iterations, residual_norm) = match self.config.solver_type {
            KspType::CG => {
                let tol = CgTolerances {
                    rtol: self.config.relative_tol,
                    atol: self.config.absolute_tol,
                    dtol: self.config.divergence_tol,
                    max_it: self.config.max_iterations,
                };
                let out = pcg(comm, self.operator, self.pc.as_ref(), b, &mut x, &tol)?;
                (out.reason, out.iterations, out.residual_norm)
            }
            KspType::PreOnly => {
                self.pc.apply(b.local(), x.local_mut())?;
                (ConvergedReason::ConvergedIts, 1, f64::NAN)
            }
        };

        let rhs_norm = b.norm2(comm);
        let solution_norm = x.norm2(comm);
        let accuracy = match exact {
            Some(exact) => {
                let mut diff = exact.clone();
                diff.axpy(-1.0, &x)?;
                Some(diff.norm2(comm))
            }
            None => None,
        };
        if !reason.is_converged() {
            warn!("linear solve stopped with {reason} after {iterations} iterations");
        }
        Ok(SolveOutcome {
            solution: x,
            reason,
            iterations,
            residual_norm,
            rhs_norm,
            solution_norm,
            accuracy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::dof_layout::DofLayout;

    fn laplacian(n: usize) -> DistMatrix<NoComm> {
        let cap: Vec<usize> = (0..n).map(|i| if i == 0 || i + 1 == n { 2 } else { 3 }).collect();
        let mut a = DistMatrix::preallocated(DofLayout::serial(n), &cap, &vec![0; n]).unwrap();
        for i in 0..n {
            a.add_value(i, i, 2.0).unwrap();
            if i + 1 < n {
                a.add_value(i, i + 1, -1.0).unwrap();
                a.add_value(i + 1, i, -1.0).unwrap();
            }
        }
        a.set_spd(true);
        a.assemble(&NoComm).unwrap();
        a
    }

    #[test]
    fn gamg_cg_recovers_a_known_solution() {
        let n = 300;
        let a = laplacian(n);
        let layout = a.layout().clone();
        let exact_values: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64).sin()).collect();
        let exact = DistVector::from_local(layout.clone(), exact_values).unwrap();
        let mut b = DistVector::zeros(layout);
        a.mult(&NoComm, &exact, &mut b).unwrap();

        let ksp = Ksp::setup(KspConfig::cg_gamg(), &a).unwrap();
        let out = ksp.solve(&NoComm, &b, Some(&exact)).unwrap();
        assert!(out.reason.is_converged(), "{}", out.reason);
        assert!(out.iterations < 100);
        assert!(out.accuracy.unwrap() < 1e-4 * out.solution_norm);
    }

    #[test]
    fn jacobi_and_none_agree() {
        let a = laplacian(30);
        let b = DistVector::from_local(a.layout().clone(), vec![1.0; 30]).unwrap();
        let x1 = Ksp::setup(KspConfig::cg_jacobi(), &a)
            .unwrap()
            .solve(&NoComm, &b, None)
            .unwrap();
        let none = KspConfig {
            precond_type: PcType::None,
            ..KspConfig::default()
        };
        let x2 = Ksp::setup(none, &a).unwrap().solve(&NoComm, &b, None).unwrap();
        for (u, v) in x1.solution.local().iter().zip(x2.solution.local()) {
            assert!((u - v).abs() < 1e-6 * u.abs().max(1.0));
        }
        assert!(x1.accuracy.is_none());
    }
}
