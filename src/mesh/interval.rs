//! Partitioned 1D interval mesh used by the driver binary and the tests.
//!
//! Faces of a 1D mesh are its vertices. Vertex `i` is `FaceId(i)`, element `e`
//! spans vertices `e` and `e + 1` (local face 0 is the left vertex). Elements are
//! dealt to ranks in contiguous blocks; a face is owned by the lowest rank
//! touching it and both end points carry Dirichlet data.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use super::{BoundaryKind, Element, ElementId, Face, FaceId, MeshPartition, MeshProvider};
use crate::driver_error::DriverError;

#[derive(Clone, Debug)]
pub struct IntervalMesh {
    lower: f64,
    upper: f64,
    base_elements: usize,
    adaptive: bool,
    rank: usize,
    size: usize,
}

impl IntervalMesh {
    pub fn new(lower: f64, upper: f64, base_elements: usize, rank: usize, size: usize) -> Self {
        Self {
            lower,
            upper,
            base_elements: base_elements.max(1),
            adaptive: false,
            rank,
            size: size.max(1),
        }
    }

    /// Grade the mesh towards the lower end: elements in the first quarter of
    /// the domain receive one extra bisection.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Vertex coordinates at refinement `level`.
    pub fn vertices(&self, level: usize) -> Vec<f64> {
        let n = self.base_elements << level;
        let len = self.upper - self.lower;
        let uniform: Vec<f64> = (0..=n)
            .map(|i| self.lower + len * i as f64 / n as f64)
            .collect();
        if !self.adaptive {
            return uniform;
        }
        let threshold = self.lower + 0.25 * len;
        let mut graded = Vec::with_capacity(uniform.len() * 2);
        for w in uniform.windows(2) {
            graded.push(w[0]);
            let mid = 0.5 * (w[0] + w[1]);
            if mid < threshold {
                graded.push(mid);
            }
        }
        graded.push(self.upper);
        graded
    }

    fn owner_of_element(&self, e: usize, n_elements: usize) -> usize {
        e * self.size / n_elements
    }
}

impl MeshProvider for IntervalMesh {
    fn refine(&mut self, level: usize) -> Result<MeshPartition, DriverError> {
        if !(self.upper > self.lower) {
            return Err(DriverError::InvalidMesh(format!(
                "empty interval [{}, {}]",
                self.lower, self.upper
            )));
        }
        let xs = self.vertices(level);
        let n_elements = xs.len() - 1;

        let owned: Vec<usize> = (0..n_elements)
            .filter(|&e| self.owner_of_element(e, n_elements) == self.rank)
            .collect();
        let mut visible: BTreeSet<usize> = owned.iter().copied().collect();
        if let (Some(&first), Some(&last)) = (owned.first(), owned.last()) {
            if first > 0 {
                visible.insert(first - 1);
            }
            if last + 1 < n_elements {
                visible.insert(last + 1);
            }
        }

        let make_face = |i: usize| -> Face {
            let adjacent: Vec<usize> = [i.checked_sub(1), (i < n_elements).then_some(i)]
                .into_iter()
                .flatten()
                .collect();
            let sharers: Vec<usize> = adjacent
                .iter()
                .map(|&e| self.owner_of_element(e, n_elements))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            Face {
                id: FaceId(i as u64),
                owner: sharers[0],
                sharers,
                elements: adjacent.iter().map(|&e| ElementId(e as u64)).collect(),
                boundary: (i == 0 || i == n_elements).then_some(BoundaryKind::Dirichlet),
                centroid: [xs[i], 0.0, 0.0],
            }
        };

        let mut elements = BTreeMap::new();
        let mut faces = BTreeMap::new();
        for &e in &visible {
            let element = Element {
                id: ElementId(e as u64),
                owner: self.owner_of_element(e, n_elements),
                faces: vec![FaceId(e as u64), FaceId(e as u64 + 1)],
                vertices: vec![[xs[e], 0.0, 0.0], [xs[e + 1], 0.0, 0.0]],
            };
            for i in [e, e + 1] {
                faces.entry(FaceId(i as u64)).or_insert_with(|| make_face(i));
            }
            elements.insert(element.id, element);
        }

        debug!(
            "rank {} refined to level {}: {} of {} elements owned, {} visible faces",
            self.rank,
            level,
            owned.len(),
            n_elements,
            faces.len()
        );

        Ok(MeshPartition {
            rank: self.rank,
            dim: 1,
            elements,
            faces,
            global_elements: n_elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_levels_double_the_element_count() {
        let mut mesh = IntervalMesh::new(0.0, 1.0, 2, 0, 1);
        assert_eq!(mesh.refine(0).unwrap().global_elements, 2);
        assert_eq!(mesh.refine(3).unwrap().global_elements, 16);
    }

    #[test]
    fn adaptive_grading_bisects_the_first_quarter() {
        let mesh = IntervalMesh::new(0.0, 1.0, 1, 0, 1).with_adaptive(true);
        // 8 uniform cells, the two below x = 0.25 are split.
        let xs = mesh.vertices(3);
        assert_eq!(xs.len() - 1, 10);
        assert!((xs[1] - 0.0625).abs() < 1e-15);
        assert_eq!(*xs.last().unwrap(), 1.0);
    }

    #[test]
    fn two_rank_partition_shares_the_middle_face() {
        let p0 = IntervalMesh::new(0.0, 1.0, 2, 0, 2).refine(1).unwrap();
        let p1 = IntervalMesh::new(0.0, 1.0, 2, 1, 2).refine(1).unwrap();
        assert_eq!(p0.owned_element_count(), 2);
        assert_eq!(p1.owned_element_count(), 2);
        let shared = FaceId(2);
        assert_eq!(p0.face(shared).unwrap().owner, 0);
        assert_eq!(p1.face(shared).unwrap().sharers, vec![0, 1]);
        // halo element of rank 1 is element 1
        assert_eq!(p1.element(ElementId(1)).unwrap().owner, 0);
        p0.validate().unwrap();
        p1.validate().unwrap();
    }

    #[test]
    fn surplus_ranks_get_empty_partitions() {
        let p = IntervalMesh::new(0.0, 1.0, 1, 2, 3).refine(1).unwrap();
        assert_eq!(p.owned_element_count(), 0);
        assert!(p.faces.is_empty());
        assert_eq!(p.global_elements, 2);
    }
}
