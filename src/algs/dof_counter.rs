//! Global trace-DOF numbering and sparsity preallocation counts.
//!
//! Owned faces are numbered first by rank (ascending) and then by [`FaceId`]
//! within each rank. Faces owned by a neighbour receive their offsets from the
//! owner in one point-to-point round. Every owned DOF also gets the number of
//! DOFs it couples to on this rank and on other ranks, which is exactly the row
//! pattern the global matrix will have.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use itertools::Itertools;
use log::debug;

use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::begin_exchange;
use crate::algs::wire::WireFaceOffset;
use crate::data::dof_layout::DofLayout;
use crate::debug_invariants::DebugInvariants;
use crate::driver_error::DriverError;
use crate::mesh::{Element, FaceId, MeshPartition};

/// Result of counting trace DOFs for one (partition, order) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct DofCount {
    layout: DofLayout,
    dofs_per_face: usize,
    face_offsets: BTreeMap<FaceId, usize>,
    n_local_dofs_connected_to_dof: Vec<usize>,
    n_nonlocal_dofs_connected_to_dof: Vec<usize>,
}

impl DofCount {
    pub fn layout(&self) -> &DofLayout {
        &self.layout
    }

    pub fn dofs_per_face(&self) -> usize {
        self.dofs_per_face
    }

    /// Number of DOFs owned by this rank.
    pub fn owned_count(&self) -> usize {
        self.layout.owned_count()
    }

    /// Number of DOFs over all ranks.
    pub fn global_count(&self) -> usize {
        self.layout.total()
    }

    /// Per owned DOF: coupled DOFs owned by this rank (itself included).
    pub fn n_local_dofs_connected_to_dof(&self) -> &[usize] {
        &self.n_local_dofs_connected_to_dof
    }

    /// Per owned DOF: coupled DOFs owned by other ranks.
    pub fn n_nonlocal_dofs_connected_to_dof(&self) -> &[usize] {
        &self.n_nonlocal_dofs_connected_to_dof
    }

    /// Global DOF range of a numbered face, `None` for unnumbered or unknown faces.
    pub fn face_range(&self, face: FaceId) -> Option<Range<usize>> {
        self.face_offsets
            .get(&face)
            .map(|&start| start..start + self.dofs_per_face)
    }

    /// Numbered faces visible to this rank with their global offsets.
    pub fn face_offsets(&self) -> &BTreeMap<FaceId, usize> {
        &self.face_offsets
    }

    /// Global index of every trace DOF of `element`, in local face order.
    /// Faces without DOFs (Dirichlet) map to `None`.
    pub fn element_dof_indices(
        &self,
        element: &Element,
        partition: &MeshPartition,
    ) -> Result<Vec<Option<usize>>, DriverError> {
        let mut indices = Vec::with_capacity(element.faces.len() * self.dofs_per_face);
        for &face_id in &element.faces {
            let face = partition.face(face_id)?;
            if face.is_numbered() {
                let range = self
                    .face_range(face_id)
                    .ok_or(DriverError::MissingFaceOffset(face_id))?;
                indices.extend(range.map(Some));
            } else {
                indices.extend(std::iter::repeat_n(None, self.dofs_per_face));
            }
        }
        Ok(indices)
    }
}

/// Count and number the trace DOFs of `partition` at polynomial order `order`.
///
/// Collective: one `allgather` for the ownership ranges plus one neighbour
/// exchange of face offsets. Deterministic for a fixed partition and order.
pub fn count_dofs<C>(
    partition: &MeshPartition,
    order: usize,
    comm: &C,
) -> Result<DofCount, DriverError>
where
    C: Communicator,
{
    let me = comm.rank();
    let dofs_per_face = partition.dofs_per_face(order);

    // 1) number owned faces locally, in FaceId order
    let owned_faces: Vec<FaceId> = partition
        .faces
        .values()
        .filter(|f| f.owner == me && f.is_numbered())
        .map(|f| f.id)
        .collect();

    // 2) agree on rank offsets
    let layout = DofLayout::from_owned_count(comm, owned_faces.len() * dofs_per_face)?;
    let base = layout.rows_owned_lo();
    let mut face_offsets: BTreeMap<FaceId, usize> = owned_faces
        .iter()
        .enumerate()
        .map(|(k, &f)| (f, base + k * dofs_per_face))
        .collect();

    // 3) owners ship offsets of shared faces; everyone else expects exactly the
    //    faces they see as owned by that neighbour
    let mut outgoing: BTreeMap<usize, Vec<WireFaceOffset>> = BTreeMap::new();
    let mut incoming = vec![0usize; comm.size().max(1)];
    for face in partition.faces.values().filter(|f| f.is_numbered()) {
        if !face.sharers.contains(&me) {
            continue;
        }
        if face.owner == me {
            let offset = face_offsets[&face.id];
            for &peer in face.sharers.iter().filter(|&&p| p != me) {
                outgoing
                    .entry(peer)
                    .or_default()
                    .push(WireFaceOffset::new(face.id.0, offset));
            }
        } else if let Some(slot) = incoming.get_mut(face.owner) {
            *slot += 1;
        }
    }
    let received = begin_exchange(comm, tags::DOF_OFFSETS, &outgoing, &incoming).finish()?;
    for (peer, records) in received {
        for rec in records {
            let id = FaceId(rec.face());
            let face = partition.face(id)?;
            if face.owner != peer {
                return Err(DriverError::CommError {
                    neighbor: peer,
                    reason: format!("rank {peer} sent an offset for {id}, owned by {}", face.owner),
                });
            }
            face_offsets.insert(id, rec.offset());
        }
    }

    // 4) connectivity: every DOF of an owned face couples to all DOFs on faces of
    //    the elements adjacent to that face
    let mut n_local = Vec::with_capacity(layout.owned_count());
    let mut n_nonlocal = Vec::with_capacity(layout.owned_count());
    for &face_id in &owned_faces {
        let face = partition.face(face_id)?;
        let mut coupled: BTreeSet<FaceId> = BTreeSet::new();
        for &element_id in &face.elements {
            coupled.extend(partition.element(element_id)?.faces.iter().copied());
        }
        let (mut local, mut nonlocal) = (0usize, 0usize);
        for other in coupled.iter().map(|&g| partition.face(g)) {
            let other = other?;
            if !other.is_numbered() {
                continue;
            }
            if other.owner == me {
                local += dofs_per_face;
            } else {
                nonlocal += dofs_per_face;
            }
        }
        n_local.extend(std::iter::repeat_n(local, dofs_per_face));
        n_nonlocal.extend(std::iter::repeat_n(nonlocal, dofs_per_face));
    }

    debug!(
        "rank {me}: {} owned trace DOFs in [{}, {}), {} global, {} faces with offsets ({})",
        layout.owned_count(),
        layout.rows_owned_lo(),
        layout.rows_owned_hi(),
        layout.total(),
        face_offsets.len(),
        face_offsets.keys().map(|f| f.to_string()).join(" "),
    );

    let count = DofCount {
        layout,
        dofs_per_face,
        face_offsets,
        n_local_dofs_connected_to_dof: n_local,
        n_nonlocal_dofs_connected_to_dof: n_nonlocal,
    };
    count.layout.debug_assert_invariants();
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};
    use crate::mesh::MeshProvider;
    use crate::mesh::interval::IntervalMesh;

    #[test]
    fn serial_interval_counts() {
        let partition = IntervalMesh::new(0.0, 1.0, 2, 0, 1).refine(2).unwrap();
        let count = count_dofs(&partition, 1, &NoComm).unwrap();
        // 8 elements, 9 vertices, two Dirichlet ends
        assert_eq!(count.owned_count(), 7);
        assert_eq!(count.global_count(), 7);
        // first interior vertex couples to itself and its right neighbour only
        assert_eq!(count.n_local_dofs_connected_to_dof()[0], 2);
        assert_eq!(count.n_local_dofs_connected_to_dof()[3], 3);
        assert!(count.n_nonlocal_dofs_connected_to_dof().iter().all(|&n| n == 0));
    }

    #[test]
    fn dirichlet_faces_have_no_indices() {
        let partition = IntervalMesh::new(0.0, 1.0, 1, 0, 1).refine(1).unwrap();
        let count = count_dofs(&partition, 2, &NoComm).unwrap();
        let first = partition.owned_elements().next().unwrap();
        assert_eq!(
            count.element_dof_indices(first, &partition).unwrap(),
            vec![None, Some(0)]
        );
    }

    #[test]
    fn two_ranks_see_the_same_shared_offset() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let partition = IntervalMesh::new(0.0, 1.0, 2, comm.rank(), 2)
                        .refine(1)
                        .unwrap();
                    count_dofs(&partition, 1, &comm).unwrap()
                })
            })
            .collect();
        let counts: Vec<DofCount> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // faces 1, 2 on rank 0; face 3 on rank 1
        assert_eq!(counts[0].layout().ranges(), &[0, 2, 3]);
        assert_eq!(counts[0].face_range(FaceId(2)), Some(1..2));
        assert_eq!(counts[1].face_range(FaceId(2)), Some(1..2));
        // face 3 couples to faces 2 (rank 0) and 3 (local); face 4 is Dirichlet
        assert_eq!(counts[1].n_local_dofs_connected_to_dof(), &[1]);
        assert_eq!(counts[1].n_nonlocal_dofs_connected_to_dof(), &[1]);
        // face 2 couples to 1, 2 locally and 3 remotely
        assert_eq!(counts[0].n_local_dofs_connected_to_dof(), &[2, 2]);
        assert_eq!(counts[0].n_nonlocal_dofs_connected_to_dof(), &[0, 1]);
    }
}
