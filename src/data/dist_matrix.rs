//! Row-distributed sparse matrix with exact preallocation.
//!
//! Each rank owns the rows of its [`DofLayout`] range. While building, a row is
//! a sorted map of global columns whose capacity is fixed up front by
//! per-row local/nonlocal counts; exceeding it is an error rather than a
//! silent reallocation. Contributions to rows owned elsewhere are stashed and
//! summed by the owner during assembly.
//!
//! After [`DistMatrix::assembly_end`] the owned rows are split into a diagonal
//! block (columns owned here, local numbering) and an off-diagonal block over
//! the sorted ghost columns, both CSR. The product `y = A x` overlaps the ghost
//! scatter with the diagonal block product.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::{PendingExchange, begin_exchange, exchange_counts, send_counts};
use crate::algs::scatter::{ScatterContext, ScatterPlan};
use crate::algs::wire::WireEntry;
use crate::data::dist_vector::DistVector;
use crate::data::dof_layout::DofLayout;
use crate::debug_invariants::DebugInvariants;
use crate::driver_error::DriverError;

#[derive(Clone, Debug, Default)]
struct RowBuilder {
    entries: BTreeMap<usize, f64>,
    n_local: usize,
    n_nonlocal: usize,
    cap_local: usize,
    cap_nonlocal: usize,
}

impl RowBuilder {
    fn add(&mut self, row: usize, col: usize, value: f64, layout: &DofLayout) -> Result<(), DriverError> {
        if let Some(slot) = self.entries.get_mut(&col) {
            *slot += value;
            return Ok(());
        }
        if layout.is_owned(col) {
            if self.n_local == self.cap_local {
                return Err(DriverError::NewNonzeroAllocation { row, col });
            }
            self.n_local += 1;
        } else {
            if self.n_nonlocal == self.cap_nonlocal {
                return Err(DriverError::NewNonzeroAllocation { row, col });
            }
            self.n_nonlocal += 1;
        }
        self.entries.insert(col, value);
        Ok(())
    }
}

struct Assembled<C: Communicator> {
    diag: CsrMatrix<f64>,
    offdiag: CsrMatrix<f64>,
    /// Global index of each off-diagonal column.
    ghost_cols: Vec<usize>,
    ghost_scatter: ScatterContext<C>,
}

enum MatState<C: Communicator> {
    Building {
        rows: Vec<RowBuilder>,
        stash: BTreeMap<usize, Vec<WireEntry>>,
    },
    Assembled(Assembled<C>),
}

pub struct DistMatrix<C: Communicator> {
    layout: DofLayout,
    state: MatState<C>,
    spd: bool,
}

/// Stashed entries in flight between `assembly_begin` and `assembly_end`.
pub struct MatrixAssembly<C: Communicator> {
    pending: PendingExchange<C, WireEntry>,
}

impl<C: Communicator> DistMatrix<C> {
    /// Square matrix over `layout` with exact per-row capacities: `n_local[i]`
    /// columns owned by this rank and `n_nonlocal[i]` owned elsewhere for owned
    /// row `i`.
    pub fn preallocated(
        layout: DofLayout,
        n_local: &[usize],
        n_nonlocal: &[usize],
    ) -> Result<Self, DriverError> {
        let n = layout.owned_count();
        for got in [n_local.len(), n_nonlocal.len()] {
            if got != n {
                return Err(DriverError::DimensionMismatch {
                    context: "DistMatrix::preallocated",
                    expected: n,
                    got,
                });
            }
        }
        let rows = n_local
            .iter()
            .zip(n_nonlocal)
            .map(|(&cap_local, &cap_nonlocal)| RowBuilder {
                cap_local,
                cap_nonlocal,
                ..RowBuilder::default()
            })
            .collect();
        Ok(Self {
            layout,
            state: MatState::Building {
                rows,
                stash: BTreeMap::new(),
            },
            spd: false,
        })
    }

    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    /// Declare the assembled operator symmetric positive definite.
    pub fn set_spd(&mut self, spd: bool) {
        self.spd = spd;
    }

    pub fn is_spd(&self) -> bool {
        self.spd
    }

    pub fn is_assembled(&self) -> bool {
        matches!(self.state, MatState::Assembled(_))
    }

    /// Add a dense block; `block[(i, j)]` goes to `(rows[i], cols[j])`.
    /// Entries whose row or column index is `None` are dropped.
    pub fn add_block(
        &mut self,
        rows: &[Option<usize>],
        cols: &[Option<usize>],
        block: &DMatrix<f64>,
    ) -> Result<(), DriverError> {
        if block.nrows() != rows.len() || block.ncols() != cols.len() {
            return Err(DriverError::DimensionMismatch {
                context: "DistMatrix::add_block",
                expected: rows.len() * cols.len(),
                got: block.len(),
            });
        }
        for (j, col) in cols.iter().enumerate() {
            let Some(col) = *col else { continue };
            for (i, row) in rows.iter().enumerate() {
                let Some(row) = *row else { continue };
                self.add_value(row, col, block[(i, j)])?;
            }
        }
        Ok(())
    }

    /// Add one entry (summed with previous contributions).
    pub fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<(), DriverError> {
        let total = self.layout.total();
        if col >= total {
            return Err(DriverError::IndexOutOfRange { index: col, len: total });
        }
        let MatState::Building { rows, stash } = &mut self.state else {
            return Err(DriverError::AlreadyAssembled("DistMatrix"));
        };
        match self.layout.to_local(row) {
            Some(local) => rows[local].add(row, col, value, &self.layout),
            None => {
                let owner = self.layout.owner_of(row)?;
                stash
                    .entry(owner)
                    .or_default()
                    .push(WireEntry::new(row, col, value));
                Ok(())
            }
        }
    }

    /// Ship stashed entries to their owners. Collective.
    pub fn assembly_begin(&mut self, comm: &C) -> Result<MatrixAssembly<C>, DriverError> {
        let MatState::Building { stash, .. } = &mut self.state else {
            return Err(DriverError::AlreadyAssembled("DistMatrix"));
        };
        let stash = std::mem::take(stash);
        let incoming = exchange_counts(comm, &send_counts(comm, &stash))?;
        let pending = begin_exchange(comm, tags::MAT_STASH, &stash, &incoming);
        Ok(MatrixAssembly { pending })
    }

    /// Sum received entries, freeze the pattern into CSR blocks and build the
    /// ghost scatter. Collective.
    pub fn assembly_end(
        &mut self,
        comm: &C,
        assembly: MatrixAssembly<C>,
    ) -> Result<(), DriverError> {
        let received = assembly.pending.finish()?;
        let MatState::Building { rows, .. } = &mut self.state else {
            return Err(DriverError::AlreadyAssembled("DistMatrix"));
        };
        for entries in received.values() {
            for e in entries {
                let local = self.layout.to_local(e.row()).ok_or(DriverError::NotOwned {
                    index: e.row(),
                    rank: self.layout.rank(),
                })?;
                rows[local].add(e.row(), e.col(), e.value(), &self.layout)?;
            }
        }

        let rows = std::mem::take(rows);
        let n = self.layout.owned_count();
        let lo = self.layout.rows_owned_lo();
        let mut ghost_cols: Vec<usize> = rows
            .iter()
            .flat_map(|r| r.entries.keys().copied())
            .filter(|&c| !self.layout.is_owned(c))
            .collect();
        ghost_cols.sort_unstable();
        ghost_cols.dedup();

        let (mut d_off, mut d_idx, mut d_val) = (vec![0usize], Vec::new(), Vec::new());
        let (mut o_off, mut o_idx, mut o_val) = (vec![0usize], Vec::new(), Vec::new());
        for row in &rows {
            for (&col, &value) in &row.entries {
                if self.layout.is_owned(col) {
                    d_idx.push(col - lo);
                    d_val.push(value);
                } else {
                    // ghost_cols is sorted and complete, so this always succeeds
                    let g = ghost_cols.partition_point(|&c| c < col);
                    o_idx.push(g);
                    o_val.push(value);
                }
            }
            d_off.push(d_idx.len());
            o_off.push(o_idx.len());
        }
        let diag = CsrMatrix::try_from_csr_data(n, n, d_off, d_idx, d_val)?;
        let offdiag = CsrMatrix::try_from_csr_data(n, ghost_cols.len(), o_off, o_idx, o_val)?;

        let plan = ScatterPlan::gather(ghost_cols.clone());
        let ghost_scatter = ScatterContext::create(comm, &self.layout, &plan, tags::GHOST_SCATTER)?;

        debug!(
            "rank {}: assembled {} rows, {} diagonal-block and {} off-diagonal nonzeros, {} ghost columns",
            comm.rank(),
            n,
            diag.nnz(),
            offdiag.nnz(),
            ghost_cols.len()
        );

        self.state = MatState::Assembled(Assembled {
            diag,
            offdiag,
            ghost_cols,
            ghost_scatter,
        });
        self.debug_assert_invariants();
        Ok(())
    }

    /// Begin and end in one call.
    pub fn assemble(&mut self, comm: &C) -> Result<(), DriverError> {
        let pending = self.assembly_begin(comm)?;
        self.assembly_end(comm, pending)
    }

    fn assembled(&self, what: &'static str) -> Result<&Assembled<C>, DriverError> {
        match &self.state {
            MatState::Assembled(a) => Ok(a),
            MatState::Building { .. } => Err(DriverError::NotAssembled(what)),
        }
    }

    /// Entry at an owned row; zero outside the pattern.
    pub fn get(&self, row: usize, col: usize) -> Result<f64, DriverError> {
        let a = self.assembled("DistMatrix::get")?;
        let local = self.layout.to_local(row).ok_or(DriverError::NotOwned {
            index: row,
            rank: self.layout.rank(),
        })?;
        let (block, c) = match self.layout.to_local(col) {
            Some(c) => (&a.diag, c),
            None => match a.ghost_cols.binary_search(&col) {
                Ok(g) => (&a.offdiag, g),
                Err(_) => return Ok(0.0),
            },
        };
        let row = block.row(local);
        Ok(row
            .col_indices()
            .binary_search(&c)
            .map(|k| row.values()[k])
            .unwrap_or(0.0))
    }

    /// Owned rows as (global column, value) lists, columns ascending.
    pub fn owned_rows(&self) -> Result<Vec<Vec<(usize, f64)>>, DriverError> {
        let a = self.assembled("DistMatrix::owned_rows")?;
        let lo = self.layout.rows_owned_lo();
        Ok((0..self.layout.owned_count())
            .map(|i| {
                let d = a.diag.row(i);
                let o = a.offdiag.row(i);
                let mut row: Vec<(usize, f64)> = d
                    .col_indices()
                    .iter()
                    .map(|&c| c + lo)
                    .zip(d.values().iter().copied())
                    .chain(
                        o.col_indices()
                            .iter()
                            .map(|&g| a.ghost_cols[g])
                            .zip(o.values().iter().copied()),
                    )
                    .collect();
                row.sort_by_key(|&(c, _)| c);
                row
            })
            .collect())
    }

    /// Block of rows and columns owned by this rank, in local numbering.
    pub fn local_diagonal_block(&self) -> Result<&CsrMatrix<f64>, DriverError> {
        Ok(&self.assembled("DistMatrix::local_diagonal_block")?.diag)
    }

    /// Owned diagonal entries.
    pub fn diagonal(&self) -> Result<Vec<f64>, DriverError> {
        let diag = self.local_diagonal_block()?;
        Ok(diag
            .row_iter()
            .enumerate()
            .map(|(i, row)| {
                row.col_indices()
                    .binary_search(&i)
                    .map(|k| row.values()[k])
                    .unwrap_or(0.0)
            })
            .collect())
    }

    /// Number of off-process columns referenced by owned rows.
    pub fn ghost_count(&self) -> Result<usize, DriverError> {
        Ok(self.assembled("DistMatrix::ghost_count")?.ghost_cols.len())
    }

    /// `y = A x`. Collective.
    pub fn mult(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), DriverError> {
        let a = self.assembled("DistMatrix::mult")?;
        let n = self.layout.owned_count();
        if x.local().len() != n || y.local().len() != n {
            return Err(DriverError::DimensionMismatch {
                context: "DistMatrix::mult",
                expected: n,
                got: x.local().len().min(y.local().len()),
            });
        }
        let mut ghosts = vec![0.0; a.ghost_cols.len()];
        let in_flight = a.ghost_scatter.begin(comm, x.local(), &mut ghosts)?;
        csr_mult(&a.diag, x.local(), y.local_mut(), false);
        a.ghost_scatter.end(in_flight, &mut ghosts)?;
        csr_mult(&a.offdiag, &ghosts, y.local_mut(), true);
        Ok(())
    }
}

/// `y = A x`, or `y += A x` when `accumulate`.
pub(crate) fn csr_mult(a: &CsrMatrix<f64>, x: &[f64], y: &mut [f64], accumulate: bool) {
    for (yi, row) in y.iter_mut().zip(a.row_iter()) {
        let sum: f64 = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&c, &v)| v * x[c])
            .sum();
        if accumulate {
            *yi += sum;
        } else {
            *yi = sum;
        }
    }
}

impl<C: Communicator> DebugInvariants for DistMatrix<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DistMatrix");
    }

    fn validate_invariants(&self) -> Result<(), DriverError> {
        self.layout.validate_invariants()?;
        let n = self.layout.owned_count();
        match &self.state {
            MatState::Building { rows, .. } => {
                if rows.len() != n {
                    return Err(DriverError::DimensionMismatch {
                        context: "DistMatrix rows",
                        expected: n,
                        got: rows.len(),
                    });
                }
                for (i, r) in rows.iter().enumerate() {
                    if r.n_local > r.cap_local || r.n_nonlocal > r.cap_nonlocal {
                        let col = r.entries.keys().last().copied().unwrap_or(0);
                        return Err(DriverError::NewNonzeroAllocation {
                            row: self.layout.rows_owned_lo() + i,
                            col,
                        });
                    }
                }
            }
            MatState::Assembled(a) => {
                if a.diag.nrows() != n || a.offdiag.nrows() != n {
                    return Err(DriverError::DimensionMismatch {
                        context: "DistMatrix blocks",
                        expected: n,
                        got: a.diag.nrows().min(a.offdiag.nrows()),
                    });
                }
                if a.ghost_cols.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(DriverError::InvalidLayout(
                        "ghost columns not strictly increasing".into(),
                    ));
                }
                if let Some(&c) = a.ghost_cols.iter().find(|&&c| self.layout.is_owned(c)) {
                    return Err(DriverError::InvalidLayout(format!(
                        "owned column {c} listed as ghost"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    fn laplacian_1d(n: usize) -> DistMatrix<NoComm> {
        let layout = DofLayout::serial(n);
        let n_local: Vec<usize> = (0..n).map(|i| if i == 0 || i + 1 == n { 2 } else { 3 }).collect();
        let mut a = DistMatrix::preallocated(layout, &n_local, &vec![0; n]).unwrap();
        for e in 0..n - 1 {
            let block = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
            a.add_block(&[Some(e), Some(e + 1)], &[Some(e), Some(e + 1)], &block)
                .unwrap();
        }
        a.assemble(&NoComm).unwrap();
        a
    }

    #[test]
    fn serial_assembly_sums_duplicates() {
        let a = laplacian_1d(4);
        assert_eq!(a.get(0, 0).unwrap(), 1.0);
        assert_eq!(a.get(1, 1).unwrap(), 2.0);
        assert_eq!(a.get(1, 2).unwrap(), -1.0);
        assert_eq!(a.get(0, 3).unwrap(), 0.0);
        assert_eq!(a.diagonal().unwrap(), vec![1.0, 2.0, 2.0, 1.0]);
        // reads are repeatable
        assert_eq!(a.owned_rows().unwrap(), a.owned_rows().unwrap());
    }

    #[test]
    fn undercounted_row_is_an_error() {
        let mut a: DistMatrix<NoComm> =
            DistMatrix::preallocated(DofLayout::serial(2), &[1, 1], &[0, 0]).unwrap();
        a.add_value(0, 0, 1.0).unwrap();
        assert_eq!(
            a.add_value(0, 1, 1.0),
            Err(DriverError::NewNonzeroAllocation { row: 0, col: 1 })
        );
    }

    #[test]
    fn reads_before_assembly_fail() {
        let a: DistMatrix<NoComm> =
            DistMatrix::preallocated(DofLayout::serial(1), &[1], &[0]).unwrap();
        assert_eq!(a.get(0, 0), Err(DriverError::NotAssembled("DistMatrix::get")));
    }

    #[test]
    fn serial_mult() {
        let a = laplacian_1d(3);
        let layout = a.layout().clone();
        let x = DistVector::from_local(layout.clone(), vec![1.0, 2.0, 4.0]).unwrap();
        let mut y = DistVector::zeros(layout);
        a.mult(&NoComm, &x, &mut y).unwrap();
        assert_eq!(y.local(), &[-1.0, -1.0, 2.0]);
    }

    #[test]
    fn two_rank_assembly_and_mult() {
        // Global 1D Laplacian on 4 DOFs, rank 0 owns 0..2, rank 1 owns 2..4.
        // Every rank adds the element (1, 2), which straddles the ranks.
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let layout = DofLayout::from_owned_count(&comm, 2).unwrap();
                    let (n_local, n_nonlocal) = if comm.rank() == 0 {
                        (vec![2, 2], vec![0, 1])
                    } else {
                        (vec![2, 2], vec![1, 0])
                    };
                    let mut a = DistMatrix::preallocated(layout.clone(), &n_local, &n_nonlocal)
                        .unwrap();
                    let block = DMatrix::from_row_slice(2, 2, &[0.5, -0.5, -0.5, 0.5]);
                    let own_element = if comm.rank() == 0 { 0 } else { 2 };
                    a.add_block(
                        &[Some(own_element), Some(own_element + 1)],
                        &[Some(own_element), Some(own_element + 1)],
                        &(block.clone() * 2.0),
                    )
                    .unwrap();
                    a.add_block(&[Some(1), Some(2)], &[Some(1), Some(2)], &block).unwrap();
                    a.set_spd(true);
                    a.assemble(&comm).unwrap();

                    let lo = layout.rows_owned_lo();
                    let x = DistVector::from_local(
                        layout.clone(),
                        vec![(lo * lo) as f64, ((lo + 1) * (lo + 1)) as f64],
                    )
                    .unwrap();
                    let mut y = DistVector::zeros(layout);
                    a.mult(&comm, &x, &mut y).unwrap();
                    (a.owned_rows().unwrap(), y.local().to_vec(), a.ghost_count().unwrap())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0].0[1], vec![(0, -1.0), (1, 2.0), (2, -1.0)]);
        assert_eq!(results[1].0[0], vec![(1, -1.0), (2, 2.0), (3, -1.0)]);
        // x = [0, 1, 4, 9]
        assert_eq!(results[0].1, vec![-1.0, -2.0]);
        assert_eq!(results[1].1, vec![-2.0, 5.0]);
        assert_eq!(results[0].2, 1);
        assert_eq!(results[1].2, 1);
    }
}
