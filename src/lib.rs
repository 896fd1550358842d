//! Implicit, velocity-based finite element driver for crystal plasticity.
//!
//! The equilibrium equations are solved for the nodal velocity of a hexahedral mesh with
//! Newton-Raphson in every time step. Constitutive updates run on quadrature points through
//! a [`material::MaterialModel`], the Jacobian is provided by one of several
//! [`operator::AssemblyStrategy`] implementations and all global reductions go through a
//! [`comm::Communicator`].

pub mod bc;
pub mod comm;
pub mod config;
pub mod driver;
pub mod error;
pub mod fe;
pub mod homogenize;
pub mod material;
pub mod operator;
pub mod output;
pub mod projection;
pub mod quadrature_field;

pub use crysfem_optimize as optimize;
pub use crysfem_sparse as sparse;

pub extern crate nalgebra;
