//! Static-condensation back-substitution of interior unknowns.
//!
//! Purely local: for every owned element the traces come from the scattered
//! local solution buffer (or the element's prescribed values) and the interior
//! coefficients are `S lambda + c`.

use std::collections::BTreeMap;

use nalgebra::DVector;

use crate::algs::communicator::Communicator;
use crate::algs::scatter::TraceBufferLayout;
use crate::driver_error::DriverError;
use crate::hdg::{ElementOperator, LocalElimination};
use crate::mesh::{ElementId, FaceId, MeshPartition};

/// Interior coefficients of every owned element for one configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconstructedField {
    order: usize,
    interiors: BTreeMap<ElementId, DVector<f64>>,
}

impl ReconstructedField {
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn get(&self, id: ElementId) -> Option<&DVector<f64>> {
        self.interiors.get(&id)
    }

    pub fn len(&self) -> usize {
        self.interiors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interiors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ElementId, &DVector<f64>)> {
        self.interiors.iter()
    }

    /// Global L2 error of the scalar unknown against the operator's reference
    /// solution. Collective.
    pub fn l2_error<C, O>(
        &self,
        comm: &C,
        partition: &MeshPartition,
        operator: &O,
    ) -> Result<f64, DriverError>
    where
        C: Communicator,
        O: ElementOperator + ?Sized,
    {
        let mut local = 0.0;
        for (&id, interior) in &self.interiors {
            let element = partition.element(id)?;
            local += operator.interior_error(element, self.order, interior.as_slice())?;
        }
        Ok(comm.allreduce_sum(local).sqrt())
    }
}

/// Trace vector of one element: buffer values for solved faces, prescribed
/// values otherwise.
fn element_traces(
    face_ids: &[FaceId],
    elimination: &LocalElimination,
    layout: &TraceBufferLayout,
    buffer: &[f64],
) -> Result<DVector<f64>, DriverError> {
    let per_face = layout.dofs_per_face();
    let mut lambda = DVector::zeros(elimination.fixed_traces.len());
    for (k, &face) in face_ids.iter().enumerate() {
        for d in 0..per_face {
            let a = k * per_face + d;
            lambda[a] = match elimination.fixed_traces.get(a).copied().flatten() {
                Some(g) => g,
                None => layout
                    .face_values(face, buffer)
                    .and_then(|v| v.get(d).copied())
                    .ok_or(DriverError::MissingFaceOffset(face))?,
            };
        }
    }
    Ok(lambda)
}

/// Recover interior unknowns of every owned element.
pub fn reconstruct(
    partition: &MeshPartition,
    order: usize,
    layout: &TraceBufferLayout,
    buffer: &[f64],
    eliminations: &BTreeMap<ElementId, LocalElimination>,
) -> Result<ReconstructedField, DriverError> {
    if buffer.len() != layout.len() {
        return Err(DriverError::DimensionMismatch {
            context: "reconstruct buffer",
            expected: layout.len(),
            got: buffer.len(),
        });
    }
    let mut interiors = BTreeMap::new();
    for element in partition.owned_elements() {
        let elimination = eliminations
            .get(&element.id)
            .ok_or(DriverError::UnknownElement(element.id))?;
        if elimination.fixed_traces.len() != element.faces.len() * layout.dofs_per_face() {
            return Err(DriverError::DimensionMismatch {
                context: "reconstruct traces",
                expected: element.faces.len() * layout.dofs_per_face(),
                got: elimination.fixed_traces.len(),
            });
        }
        let lambda = element_traces(&element.faces, elimination, layout, buffer)?;
        let interior = &elimination.solve_map * lambda + &elimination.offset;
        interiors.insert(element.id, interior);
    }
    Ok(ReconstructedField { order, interiors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::dof_counter::count_dofs;
    use crate::algs::scatter::build_trace_scatter;
    use crate::hdg::HdgDiffusion1d;
    use crate::mesh::MeshProvider;
    use crate::mesh::interval::IntervalMesh;

    #[test]
    fn exact_traces_give_a_small_interior_error_and_rerun_is_identical() {
        let partition = IntervalMesh::new(0.0, 1.0, 2, 0, 1).refine(3).unwrap();
        let count = count_dofs(&partition, 2, &NoComm).unwrap();
        let op = HdgDiffusion1d::default();
        let mut eliminations = BTreeMap::new();
        for element in partition.owned_elements() {
            let block = op.compute_local_block(element, &partition, 2).unwrap();
            eliminations.insert(element.id, block.elimination);
        }
        let (plan, layout) = build_trace_scatter(&partition, &count).unwrap();
        assert!(plan.is_identity());
        let mut global = vec![0.0; count.global_count()];
        for (face, &offset) in count.face_offsets() {
            let f = partition.face(*face).unwrap();
            global[offset] = op.exact_trace(f, 2)[0];
        }
        let mut buffer = vec![0.0; layout.len()];
        plan.apply_local(&global, &mut buffer).unwrap();
        let first = reconstruct(&partition, 2, &layout, &buffer, &eliminations).unwrap();
        let second = reconstruct(&partition, 2, &layout, &buffer, &eliminations).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        let err = first.l2_error(&NoComm, &partition, &op).unwrap();
        assert!(err < 5e-3, "{err}");
    }
}
