//! Global assembly of the condensed trace system.
//!
//! Each rank visits its owned elements, asks the [`ElementOperator`] for the
//! condensed block and adds it through the global numbering. Rows of faces
//! owned by a neighbour are stashed by the matrix and vector and summed by the
//! owner in [`finalize`]. Prescribed traces are eliminated here: their
//! columns move to the right-hand side and their rows are dropped.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::DVector;

use crate::algs::communicator::Communicator;
use crate::algs::dof_counter::DofCount;
use crate::data::dist_matrix::DistMatrix;
use crate::data::dist_vector::{DistVector, InsertMode};
use crate::driver_error::DriverError;
use crate::hdg::{ElementOperator, LocalBlock, LocalElimination};
use crate::mesh::{ElementId, MeshPartition};

/// Everything one solve cycle needs after assembly.
pub struct AssembledSystem<C: Communicator> {
    pub matrix: DistMatrix<C>,
    pub rhs: DistVector,
    /// Reference trace values for the accuracy diagnostic
    pub exact: DistVector,
    pub eliminations: BTreeMap<ElementId, LocalElimination>,
}

/// Condensed right-hand side with prescribed traces moved over:
/// `rhs[a] - sum_b K[a][b] g[b]` for free `a`, zero for prescribed `a`.
pub fn eliminate_fixed_traces(block: &LocalBlock) -> DVector<f64> {
    let fixed = &block.elimination.fixed_traces;
    let mut rhs = block.rhs.clone();
    for a in 0..rhs.len() {
        if fixed[a].is_some() {
            rhs[a] = 0.0;
            continue;
        }
        for (b, g) in fixed.iter().enumerate() {
            if let Some(g) = g {
                rhs[a] -= block.coupling[(a, b)] * g;
            }
        }
    }
    rhs
}

/// Add one element's block to the global matrix and right-hand side.
/// `indices[a]` is the global DOF of local trace `a`, `None` when prescribed.
pub fn insert_element_contributions<C: Communicator>(
    matrix: &mut DistMatrix<C>,
    rhs: &mut DistVector,
    indices: &[Option<usize>],
    block: &LocalBlock,
) -> Result<(), DriverError> {
    if indices.len() != block.n_trace() || block.elimination.fixed_traces.len() != indices.len() {
        return Err(DriverError::DimensionMismatch {
            context: "insert_element_contributions",
            expected: indices.len(),
            got: block.n_trace(),
        });
    }
    matrix.add_block(indices, indices, &block.coupling)?;
    let local_rhs = eliminate_fixed_traces(block);
    rhs.set_values(indices, local_rhs.as_slice(), InsertMode::Add)
}

/// Finalize matrix, right-hand side and reference vector. Collective; must be
/// called by ranks that inserted nothing.
pub fn finalize<C: Communicator>(
    comm: &C,
    matrix: &mut DistMatrix<C>,
    rhs: &mut DistVector,
    exact: &mut DistVector,
) -> Result<(), DriverError> {
    let mat_pending = matrix.assembly_begin(comm)?;
    let rhs_pending = rhs.assembly_begin(comm)?;
    let exact_pending = exact.assembly_begin(comm)?;
    matrix.assembly_end(comm, mat_pending)?;
    rhs.assembly_end(rhs_pending)?;
    exact.assembly_end(exact_pending)
}

/// Assemble the global trace system of `partition` at order `order`. Collective.
pub fn assemble_globals<C, O>(
    comm: &C,
    partition: &MeshPartition,
    count: &DofCount,
    operator: &O,
    order: usize,
) -> Result<AssembledSystem<C>, DriverError>
where
    C: Communicator,
    O: ElementOperator + ?Sized,
{
    let layout = count.layout().clone();
    let mut matrix = DistMatrix::preallocated(
        layout.clone(),
        count.n_local_dofs_connected_to_dof(),
        count.n_nonlocal_dofs_connected_to_dof(),
    )?;
    let mut rhs = DistVector::zeros(layout.clone());
    let mut exact = DistVector::zeros(layout);
    let mut eliminations = BTreeMap::new();

    for element in partition.owned_elements() {
        let block = operator.compute_local_block(element, partition, order)?;
        let indices = count.element_dof_indices(element, partition)?;
        insert_element_contributions(&mut matrix, &mut rhs, &indices, &block)?;
        eliminations.insert(element.id, block.elimination);
    }

    let me = comm.rank();
    for face in partition.faces.values().filter(|f| f.owner == me) {
        let Some(range) = count.face_range(face.id) else {
            continue;
        };
        let indices: Vec<Option<usize>> = range.map(Some).collect();
        exact.set_values(&indices, &operator.exact_trace(face, order), InsertMode::Insert)?;
    }

    matrix.set_spd(true);
    finalize(comm, &mut matrix, &mut rhs, &mut exact)?;
    debug!(
        "rank {me}: assembled {} elements into rows [{}, {})",
        eliminations.len(),
        count.layout().rows_owned_lo(),
        count.layout().rows_owned_hi()
    );

    Ok(AssembledSystem {
        matrix,
        rhs,
        exact,
        eliminations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn prescribed_columns_move_to_the_rhs() {
        let block = LocalBlock {
            coupling: DMatrix::from_row_slice(2, 2, &[2.0, -2.0, -2.0, 2.0]),
            rhs: DVector::from_vec(vec![1.0, 1.0]),
            elimination: LocalElimination {
                solve_map: DMatrix::zeros(2, 2),
                offset: DVector::zeros(2),
                fixed_traces: vec![Some(3.0), None],
            },
        };
        let rhs = eliminate_fixed_traces(&block);
        assert_eq!(rhs.as_slice(), &[0.0, 1.0 + 6.0]);
    }
}
