//! Outer driver loop over polynomial orders and refinement levels.
//!
//! Every (order, level) pair is one [`SolveCycle`]: refine, number, assemble,
//! solve, scatter, reconstruct, report. All distributed objects of a cycle
//! are dropped when it ends. A failing cycle is logged and recorded as
//! [`CycleOutcome::Failed`]; the loop moves on.

use std::time::{Duration, Instant};

use log::{debug, error, info};
use serde::Serialize;

use crate::algs::assembly::assemble_globals;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::dof_counter::{DofCount, count_dofs};
use crate::algs::reconstruct::{ReconstructedField, reconstruct};
use crate::algs::scatter::{ScatterContext, build_trace_scatter};
use crate::config::RunConfig;
use crate::driver_error::DriverError;
use crate::hdg::ElementOperator;
use crate::mesh::{MeshPartition, MeshProvider};
use crate::output::OutputSink;
use crate::solver::config::KspConfig;
use crate::solver::ksp::Ksp;
use crate::solver::reason::ConvergedReason;

/// Wall-clock durations of the timed phases of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub assembly: Duration,
    /// Krylov solve plus the scatter into the local buffer
    pub solve: Duration,
    pub local_solve: Duration,
}

/// Diagnostics of one solved cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub order: usize,
    pub level: usize,
    pub global_elements: usize,
    pub global_dofs: usize,
    pub owned_dofs: usize,
    pub reason: ConvergedReason,
    pub iterations: usize,
    pub residual_norm: f64,
    pub rhs_norm: f64,
    pub solution_norm: f64,
    /// `||exact - x||_2` over the trace unknowns
    pub accuracy: Option<f64>,
    /// L2 error of the reconstructed scalar field
    pub l2_error: f64,
    pub timings: PhaseTimings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Solved(CycleReport),
    Failed {
        order: usize,
        level: usize,
        error: DriverError,
    },
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Solved(r) => Some(r),
            CycleOutcome::Failed { .. } => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, CycleOutcome::Solved(_))
    }
}

/// Coordinator-only wrapper around the output sink. Write failures are
/// logged, never propagated: the files are a side channel.
struct Progress<'s> {
    sink: Option<&'s mut dyn OutputSink>,
}

impl Progress<'_> {
    fn mark(&mut self, message: &str) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = sink.progress(message) {
                error!("could not write progress line: {e}");
            }
        }
    }

    fn note(&mut self, message: &str) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = sink.note(message) {
                error!("could not write progress line: {e}");
            }
        }
    }

    fn report(&mut self, report: &CycleReport) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(e) = sink.convergence(report) {
                error!("could not write convergence line: {e}");
            }
        }
    }
}

/// State of one (order, level) pair once the mesh is refined and numbered.
pub struct SolveCycle<'c, C: Communicator> {
    comm: &'c C,
    order: usize,
    level: usize,
    partition: MeshPartition,
    count: DofCount,
}

impl<'c, C: Communicator> SolveCycle<'c, C> {
    /// Refine to `level` and number the trace DOFs. Collective.
    pub fn setup<P: MeshProvider + ?Sized>(
        comm: &'c C,
        provider: &mut P,
        order: usize,
        level: usize,
    ) -> Result<Self, DriverError> {
        let partition = provider.refine(level)?;
        partition.validate()?;
        let count = count_dofs(&partition, order, comm)?;
        Ok(Self {
            comm,
            order,
            level,
            partition,
            count,
        })
    }

    pub fn partition(&self) -> &MeshPartition {
        &self.partition
    }

    pub fn dof_count(&self) -> &DofCount {
        &self.count
    }

    /// Assemble, solve, scatter and reconstruct. Collective.
    pub fn run<O>(
        self,
        operator: &O,
        ksp_config: &KspConfig,
        sink: Option<&mut dyn OutputSink>,
    ) -> Result<(CycleReport, ReconstructedField), DriverError>
    where
        O: ElementOperator + ?Sized,
    {
        let comm = self.comm;
        let mut progress = Progress { sink };

        progress.mark("Entering assembly");
        let t_assembly = Instant::now();
        let system = assemble_globals(comm, &self.partition, &self.count, operator, self.order)?;
        let assembly = t_assembly.elapsed();
        progress.mark("Has finished assembly");

        progress.mark("Entering solver");
        let t_solve = Instant::now();
        let ksp = Ksp::setup(ksp_config.clone(), &system.matrix)?;
        let outcome = ksp.solve(comm, &system.rhs, Some(&system.exact))?;
        progress.note(&format!("Converged reason is: {}", outcome.reason.code()));
        progress.note(&format!("Number of iterations is: {}", outcome.iterations));
        progress.mark("Finished solver");

        let (plan, buffer_layout) = build_trace_scatter(&self.partition, &self.count)?;
        let scatter = ScatterContext::create(
            comm,
            system.matrix.layout(),
            &plan,
            tags::TRACE_SCATTER,
        )?;
        let buffer = scatter.scatter(comm, &outcome.solution)?;
        let solve = t_solve.elapsed();

        progress.mark("Entering local solver");
        let t_local = Instant::now();
        let field = reconstruct(
            &self.partition,
            self.order,
            &buffer_layout,
            &buffer,
            &system.eliminations,
        )?;
        let local_solve = t_local.elapsed();
        progress.mark("Finished local solver");

        let l2_error = field.l2_error(comm, &self.partition, operator)?;
        let timings = PhaseTimings {
            assembly,
            solve,
            local_solve,
        };
        if comm.is_coordinator() {
            info!(
                "{} {} {}",
                timings.assembly.as_secs_f64(),
                timings.solve.as_secs_f64(),
                timings.local_solve.as_secs_f64()
            );
        }
        let report = CycleReport {
            order: self.order,
            level: self.level,
            global_elements: self.partition.global_elements,
            global_dofs: self.count.global_count(),
            owned_dofs: self.count.owned_count(),
            reason: outcome.reason,
            iterations: outcome.iterations,
            residual_norm: outcome.residual_norm,
            rhs_norm: outcome.rhs_norm,
            solution_norm: outcome.solution_norm,
            accuracy: outcome.accuracy,
            l2_error,
            timings,
        };
        progress.report(&report);
        Ok((report, field))
    }
}

/// Loops over `[p_0, p_n) x [h_0, h_n)` for one rank.
pub struct CycleOrchestrator<'a, C, O, F> {
    comm: &'a C,
    config: &'a RunConfig,
    operator: O,
    mesh_factory: F,
}

impl<'a, C, O, F, P> CycleOrchestrator<'a, C, O, F>
where
    C: Communicator,
    O: ElementOperator,
    F: FnMut(usize) -> P,
    P: MeshProvider,
{
    /// `mesh_factory(order)` builds the fresh mesh provider of each order.
    pub fn new(comm: &'a C, config: &'a RunConfig, operator: O, mesh_factory: F) -> Self {
        Self {
            comm,
            config,
            operator,
            mesh_factory,
        }
    }

    /// Run every cycle. Collective; `sink` is only written on the coordinator.
    pub fn run(&mut self, sink: &mut dyn OutputSink) -> Vec<CycleOutcome> {
        let comm = self.comm;
        let mut outcomes = Vec::new();
        for order in self.config.orders() {
            let mut provider = (self.mesh_factory)(order);
            for level in self.config.levels() {
                let sink: Option<&mut dyn OutputSink> = if comm.is_coordinator() {
                    Some(&mut *sink)
                } else {
                    None
                };
                let outcome = match self.run_cycle(&mut provider, order, level, sink) {
                    Ok(report) => {
                        debug!("rank {}: cycle p={order} h={level} done", comm.rank());
                        CycleOutcome::Solved(report)
                    }
                    Err(error) => {
                        error!(
                            "rank {}: cycle p={order} h={level} failed: {error}",
                            comm.rank()
                        );
                        CycleOutcome::Failed {
                            order,
                            level,
                            error,
                        }
                    }
                };
                outcomes.push(outcome);
                // next cycle starts together on every rank
                comm.barrier();
            }
        }
        outcomes
    }

    fn run_cycle(
        &self,
        provider: &mut P,
        order: usize,
        level: usize,
        sink: Option<&mut dyn OutputSink>,
    ) -> Result<CycleReport, DriverError> {
        let comm = self.comm;
        let mut sink = sink;
        if let Some(s) = sink.as_deref_mut() {
            let line = format!(
                "Rank {:5} is in cycle {level:5} of order {order} and is entering counter",
                comm.rank()
            );
            if let Err(e) = s.progress(&line) {
                error!("could not write progress line: {e}");
            }
        }
        let cycle = SolveCycle::setup(comm, provider, order, level)?;
        if let Some(s) = sink.as_deref_mut() {
            let line = format!(
                "Rank {:5} is in cycle {level:5} of order {order} and has exited counter",
                comm.rank()
            );
            if let Err(e) = s.progress(&line) {
                error!("could not write progress line: {e}");
            }
        }
        if comm.is_coordinator() {
            info!(
                "order {order}, level {level}: {} elements, {} trace DOFs",
                cycle.partition().global_elements,
                cycle.dof_count().global_count()
            );
        }
        let (report, _field) = cycle.run(&self.operator, &self.config.ksp, sink)?;
        if comm.is_coordinator() {
            info!(
                "order {order}, level {level}: {} in {} iterations, L2 error {:.3e}",
                report.reason, report.iterations, report.l2_error
            );
        }
        Ok(report)
    }
}
