use core::fmt;
use nalgebra::{DVectorView, DVectorViewMut, RealField, Scalar};
use std::error::Error;

use crate::LinearOperator;

/// Tolerances shared by all Krylov solvers.
///
/// A solve has converged once the (possibly preconditioned) residual norm satisfies
/// `||r|| <= max(rel_tol * ||r_0||, abs_tol)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KrylovSettings<T> {
    pub max_iter: Option<usize>,
    pub rel_tol: T,
    pub abs_tol: T,
}

impl Default for KrylovSettings<f64> {
    fn default() -> Self {
        Self {
            max_iter: Some(2500),
            rel_tol: 1e-10,
            abs_tol: 1e-30,
        }
    }
}

impl<T: RealField + Copy> KrylovSettings<T> {
    pub fn goal(&self, initial_norm: T) -> T {
        (self.rel_tol * initial_norm).max(self.abs_tol)
    }

    pub(crate) fn max_iter_reached(&self, iterations: usize) -> bool {
        self.max_iter
            .map(|max_iter| iterations >= max_iter)
            .unwrap_or(false)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct KrylovOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector.
    pub num_iterations: usize,
    /// Norm of the residual that the convergence check was applied to.
    pub residual_norm: T,
}

impl<T> KrylovOutput<T> {
    pub(crate) fn new(residual_norm: T) -> Self {
        Self {
            num_iterations: 0,
            residual_norm,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    Breakdown,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::Breakdown => write!(f, "Krylov iteration broke down"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: KrylovOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    pub(crate) fn new(output: KrylovOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }

    /// Whether the solve only failed to meet its tolerance.
    ///
    /// The solution vector then holds the last iterate, which is usually still a useful
    /// (inexact) correction.
    pub fn is_max_iterations_reached(&self) -> bool {
        matches!(self.kind, SolveErrorKind::MaxIterationsReached { .. })
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Krylov solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

/// y = Ax
pub(crate) fn apply_operator<'a, T, A>(
    y: impl Into<DVectorViewMut<'a, T>>,
    a: &'a A,
    x: impl Into<DVectorView<'a, T>>,
) -> Result<(), Box<dyn Error>>
where
    T: Scalar,
    A: LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}
