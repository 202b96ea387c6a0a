//! Distributed linear-algebra containers: ownership layout, vectors and
//! sparse matrices.

pub mod dist_matrix;
pub mod dist_vector;
pub mod dof_layout;

pub use dist_matrix::DistMatrix;
pub use dist_vector::{DistVector, InsertMode};
pub use dof_layout::DofLayout;
