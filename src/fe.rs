//! Reference finite element space used by the mechanics operator.
//!
//! A trilinear hexahedral vector H1 space on structured box meshes, with tensor Gauss
//! quadrature and boundary attributes. True DOFs are interleaved by node, i.e. DOF
//! `3 * node + component`. Nodal coordinate fields use the same layout, so coordinates
//! and velocities can be combined directly.

mod geometry;
mod hex8;
mod mesh;
mod space;

pub use geometry::*;
pub use hex8::*;
pub use mesh::*;
pub use space::*;
