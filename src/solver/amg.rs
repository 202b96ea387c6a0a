//! Smoothed-aggregation algebraic multigrid on a rank's diagonal block.
//!
//! Setup per level: greedy aggregation over the strength graph, a tentative
//! prolongator carrying the constant vector, `agg_nsmooths` damped-Jacobi
//! smoothing steps `P = (I - w D^-1 A) P0` with `w = 4 / (3 rho)`, and the
//! Galerkin product `Ac = P^T A P`. Coarsening stops at `coarse_eq_limit`
//! rows, at `max_levels`, or when aggregation no longer reduces the size.
//! The coarsest operator is factored densely.
//!
//! Application is one symmetric V-cycle with weighted-Jacobi smoothing, which
//! keeps the preconditioner SPD for CG.

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::CsrMatrix;

use super::config::AmgConfig;
use super::pc::Preconditioner;
use crate::data::dist_matrix::csr_mult;
use crate::driver_error::DriverError;

const POWER_ITERATIONS: usize = 10;
/// Upper-bound safety factor on the power-iteration eigenvalue estimate.
const RHO_SAFETY: f64 = 1.1;

struct Level {
    a: CsrMatrix<f64>,
    inv_diag: Vec<f64>,
    /// Smoother weight, `damping * 2 / rho`
    omega: f64,
    p: CsrMatrix<f64>,
    r: CsrMatrix<f64>,
}

enum CoarseSolver {
    Empty,
    Cholesky(Cholesky<f64, Dyn>),
    Lu(LU<f64, Dyn, Dyn>),
}

impl CoarseSolver {
    fn factor(a: &CsrMatrix<f64>) -> Result<Self, DriverError> {
        let n = a.nrows();
        if n == 0 {
            return Ok(CoarseSolver::Empty);
        }
        let dense = DMatrix::from(a);
        if let Some(chol) = Cholesky::new(dense.clone()) {
            return Ok(CoarseSolver::Cholesky(chol));
        }
        let lu = dense.lu();
        if lu.is_invertible() {
            Ok(CoarseSolver::Lu(lu))
        } else {
            Err(DriverError::CoarseSolveFailed { n })
        }
    }

    fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<(), DriverError> {
        let rhs = DVector::from_column_slice(b);
        let sol = match self {
            CoarseSolver::Empty => return Ok(()),
            CoarseSolver::Cholesky(chol) => chol.solve(&rhs),
            CoarseSolver::Lu(lu) => lu
                .solve(&rhs)
                .ok_or(DriverError::CoarseSolveFailed { n: b.len() })?,
        };
        x.copy_from_slice(sol.as_slice());
        Ok(())
    }
}

pub struct AmgPreconditioner {
    levels: Vec<Level>,
    coarse: CoarseSolver,
    coarse_size: usize,
    sweeps: usize,
}

fn inverse_diagonal(a: &CsrMatrix<f64>) -> Vec<f64> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            let d = row
                .col_indices()
                .binary_search(&i)
                .map(|k| row.values()[k])
                .unwrap_or(0.0);
            if d == 0.0 { 1.0 } else { 1.0 / d }
        })
        .collect()
}

/// Estimate of the largest eigenvalue of `D^-1 A` by power iteration.
fn estimate_rho(a: &CsrMatrix<f64>, inv_diag: &[f64]) -> f64 {
    let n = a.nrows();
    if n == 0 {
        return 1.0;
    }
    // deterministic start vector with some variation so it is not an eigenvector
    let mut x: Vec<f64> = (0..n).map(|i| 1.0 + (i % 7) as f64 / 7.0).collect();
    let mut y = vec![0.0; n];
    let mut rho = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            break;
        }
        x.iter_mut().for_each(|v| *v /= norm);
        csr_mult(a, &x, &mut y, false);
        y.iter_mut().zip(inv_diag).for_each(|(v, d)| *v *= d);
        rho = y.iter().map(|v| v * v).sum::<f64>().sqrt();
        std::mem::swap(&mut x, &mut y);
    }
    if rho > 0.0 && rho.is_finite() {
        rho * RHO_SAFETY
    } else {
        1.0
    }
}

/// Greedy aggregation. Returns the aggregate of each row and the count.
fn aggregate(a: &CsrMatrix<f64>, threshold: f64) -> (Vec<usize>, usize) {
    let n = a.nrows();
    let diag: Vec<f64> = inverse_diagonal(a).iter().map(|d| 1.0 / d).collect();
    let strong = |i: usize| -> Vec<usize> {
        let row = a.row(i);
        row.col_indices()
            .iter()
            .zip(row.values())
            .filter(|&(&j, &v)| {
                j != i && v != 0.0 && v.abs() > threshold * (diag[i] * diag[j]).abs().sqrt()
            })
            .map(|(&j, _)| j)
            .collect()
    };

    const NONE: usize = usize::MAX;
    let mut agg = vec![NONE; n];
    let mut count = 0;

    // 1) seed aggregates from nodes whose whole neighbourhood is free
    for i in 0..n {
        if agg[i] != NONE {
            continue;
        }
        let neighbours = strong(i);
        if neighbours.iter().all(|&j| agg[j] == NONE) {
            agg[i] = count;
            for j in neighbours {
                agg[j] = count;
            }
            count += 1;
        }
    }
    // 2) attach leftovers to a neighbouring aggregate
    let mut leftover = Vec::new();
    for i in 0..n {
        if agg[i] != NONE {
            continue;
        }
        match strong(i).into_iter().find(|&j| agg[j] != NONE) {
            Some(j) => agg[i] = agg[j],
            None => leftover.push(i),
        }
    }
    // 3) isolated nodes become singletons
    for i in leftover {
        if agg[i] == NONE {
            agg[i] = count;
            count += 1;
        }
    }
    (agg, count)
}

/// Tentative prolongator: column `k` is the normalized indicator of aggregate `k`.
fn tentative_prolongator(agg: &[usize], n_agg: usize) -> Result<CsrMatrix<f64>, DriverError> {
    let mut sizes = vec![0usize; n_agg];
    for &k in agg {
        sizes[k] += 1;
    }
    let offsets: Vec<usize> = (0..=agg.len()).collect();
    let values = agg.iter().map(|&k| 1.0 / (sizes[k] as f64).sqrt()).collect();
    Ok(CsrMatrix::try_from_csr_data(
        agg.len(),
        n_agg,
        offsets,
        agg.to_vec(),
        values,
    )?)
}

/// Rows of `m` scaled by `scale[i]`.
fn scale_rows(m: &CsrMatrix<f64>, scale: &[f64]) -> CsrMatrix<f64> {
    let mut out = m.clone();
    for (i, mut row) in out.row_iter_mut().enumerate() {
        row.values_mut().iter_mut().for_each(|v| *v *= scale[i]);
    }
    out
}

impl AmgPreconditioner {
    /// Build the hierarchy for the SPD matrix `a`.
    pub fn build(a: &CsrMatrix<f64>, cfg: &AmgConfig) -> Result<Self, DriverError> {
        let mut levels = Vec::new();
        let mut current = a.clone();
        while current.nrows() > cfg.coarse_eq_limit && levels.len() + 1 < cfg.max_levels {
            let n = current.nrows();
            let inv_diag = inverse_diagonal(&current);
            let rho = estimate_rho(&current, &inv_diag);
            let (agg, n_agg) = aggregate(&current, cfg.threshold);
            if n_agg == 0 || n_agg >= n {
                debug!("amg: coarsening stalled at {n} rows");
                break;
            }

            let mut p = tentative_prolongator(&agg, n_agg)?;
            let w = 4.0 / (3.0 * rho);
            let step: Vec<f64> = inv_diag.iter().map(|d| w * d).collect();
            for _ in 0..cfg.agg_nsmooths {
                let ap = &current * &p;
                p = &p - &scale_rows(&ap, &step);
            }
            let r = p.transpose();
            let coarse = &(&r * &current) * &p;
            debug!(
                "amg: level {} has {} rows, {} nonzeros; next {} rows",
                levels.len(),
                n,
                current.nnz(),
                coarse.nrows()
            );
            levels.push(Level {
                a: current,
                inv_diag,
                omega: cfg.smoother_damping * 2.0 / rho,
                p,
                r,
            });
            current = coarse;
        }
        let coarse_size = current.nrows();
        let coarse = CoarseSolver::factor(&current)?;
        Ok(Self {
            levels,
            coarse,
            coarse_size,
            sweeps: cfg.smoother_sweeps.max(1),
        })
    }

    /// Number of levels including the coarsest.
    pub fn n_levels(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn coarse_size(&self) -> usize {
        self.coarse_size
    }

    fn smooth(level: &Level, b: &[f64], x: &mut [f64], sweeps: usize, scratch: &mut [f64]) {
        for _ in 0..sweeps {
            csr_mult(&level.a, x, scratch, false);
            for i in 0..x.len() {
                x[i] += level.omega * level.inv_diag[i] * (b[i] - scratch[i]);
            }
        }
    }

    fn vcycle(&self, depth: usize, b: &[f64], x: &mut [f64]) -> Result<(), DriverError> {
        let Some(level) = self.levels.get(depth) else {
            return self.coarse.solve(b, x);
        };
        let n = b.len();
        let mut scratch = vec![0.0; n];
        x.iter_mut().for_each(|v| *v = 0.0);
        Self::smooth(level, b, x, self.sweeps, &mut scratch);

        csr_mult(&level.a, x, &mut scratch, false);
        let residual: Vec<f64> = b.iter().zip(&scratch).map(|(b, ax)| b - ax).collect();
        let mut bc = vec![0.0; level.r.nrows()];
        csr_mult(&level.r, &residual, &mut bc, false);
        let mut xc = vec![0.0; bc.len()];
        self.vcycle(depth + 1, &bc, &mut xc)?;
        csr_mult(&level.p, &xc, x, true);

        Self::smooth(level, b, x, self.sweeps, &mut scratch);
        Ok(())
    }
}

impl Preconditioner for AmgPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), DriverError> {
        let n = self.levels.first().map_or(self.coarse_size, |l| l.a.nrows());
        for got in [r.len(), z.len()] {
            if got != n {
                return Err(DriverError::DimensionMismatch {
                    context: "AmgPreconditioner::apply",
                    expected: n,
                    got,
                });
            }
        }
        self.vcycle(0, r, z)
    }

    fn name(&self) -> &'static str {
        "gamg"
    }
}
