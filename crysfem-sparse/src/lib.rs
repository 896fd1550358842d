//! Krylov solvers and preconditioners operating on abstract linear operators.
//!
//! All solvers only interact with the system through [`LinearOperator`] and
//! [`InnerProduct`], so matrix-free operators and distributed inner products can be
//! plugged in without the solvers knowing about either.

pub mod cg;
pub mod gmres;
pub mod minres;
pub mod preconditioner;

mod krylov;
mod operator;

pub use krylov::*;
pub use operator::*;

pub use nalgebra_sparse;
