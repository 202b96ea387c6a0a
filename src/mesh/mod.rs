//! Mesh-provider boundary: partition types handed to the core and the
//! [`MeshProvider`] trait implemented by mesh generators.
//!
//! A [`MeshPartition`] is everything one rank sees of the mesh: its owned
//! elements, a halo of neighbour elements touching owned faces, and the faces
//! of both. The core never mutates a partition.

pub mod interval;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver_error::DriverError;

/// Global element id, unique across ranks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

/// Global face id, unique across ranks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaceId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Physical coordinates; unused components are zero.
pub type Point = [f64; 3];

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Trace value prescribed; the face carries no global DOFs.
    Dirichlet,
    /// Flux prescribed; the face is numbered like an interior face.
    Neumann,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    /// Rank that numbers this face's DOFs.
    pub owner: usize,
    /// Sorted ranks owning an element adjacent to this face.
    pub sharers: Vec<usize>,
    /// Adjacent elements (one on the boundary, two in the interior).
    pub elements: Vec<ElementId>,
    pub boundary: Option<BoundaryKind>,
    pub centroid: Point,
}

impl Face {
    /// Whether the face carries global trace DOFs.
    pub fn is_numbered(&self) -> bool {
        self.boundary != Some(BoundaryKind::Dirichlet)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub owner: usize,
    /// Faces in the element's local face order.
    pub faces: Vec<FaceId>,
    pub vertices: Vec<Point>,
}

/// The part of the mesh visible to one rank.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshPartition {
    pub rank: usize,
    /// Topological dimension of the cells.
    pub dim: usize,
    /// Owned and halo elements.
    pub elements: BTreeMap<ElementId, Element>,
    /// Faces of owned and halo elements.
    pub faces: BTreeMap<FaceId, Face>,
    /// Number of owned elements summed over all ranks.
    pub global_elements: usize,
}

impl MeshPartition {
    /// Owned elements in ascending id order.
    pub fn owned_elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.elements.values().filter(move |e| e.owner == self.rank)
    }

    pub fn owned_element_count(&self) -> usize {
        self.owned_elements().count()
    }

    pub fn element(&self, id: ElementId) -> Result<&Element, DriverError> {
        self.elements.get(&id).ok_or(DriverError::UnknownElement(id))
    }

    pub fn face(&self, id: FaceId) -> Result<&Face, DriverError> {
        self.faces.get(&id).ok_or(DriverError::UnknownFace(id))
    }

    /// Trace DOFs per face for polynomial order `order` on a tensor face basis.
    pub fn dofs_per_face(&self, order: usize) -> usize {
        (order + 1).pow(self.dim.saturating_sub(1) as u32)
    }

    /// Check the local consistency the DOF counter relies on.
    pub fn validate(&self) -> Result<(), DriverError> {
        for element in self.elements.values() {
            for face in &element.faces {
                let f = self.face(*face)?;
                if !f.elements.contains(&element.id) {
                    return Err(DriverError::InvalidMesh(format!(
                        "face {} does not list adjacent element {}",
                        f.id, element.id
                    )));
                }
            }
        }
        for face in self.faces.values() {
            if !face.sharers.contains(&face.owner) {
                return Err(DriverError::InvalidMesh(format!(
                    "owner {} of face {} is not among its sharers {:?}",
                    face.owner, face.id, face.sharers
                )));
            }
        }
        Ok(())
    }
}

/// Mesh generation and refinement collaborator.
pub trait MeshProvider {
    /// Produce this rank's partition of the mesh at refinement `level`.
    fn refine(&mut self, level: usize) -> Result<MeshPartition, DriverError>;
}
