//! Error types for simulation runs.
use std::fmt;
use thiserror::Error;

/// Result type alias using [`SimulationError`].
pub type Result<T> = std::result::Result<T, SimulationError>;

/// The stage of a time step at which a fatal failure occurred.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureStage {
    MaterialSetup,
    NewtonConvergence,
    LinearSolve,
    Configuration,
    Output,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MaterialSetup => "material setup",
            Self::NewtonConvergence => "Newton convergence",
            Self::LinearSolve => "linear solve",
            Self::Configuration => "configuration",
            Self::Output => "output",
        };
        write!(f, "{}", name)
    }
}

/// Errors that can occur while setting up or running a simulation.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// The constitutive update failed on at least one rank. Every rank reports this error.
    #[error("material setup failed on at least one rank")]
    CollectiveMaterialFailure,

    /// Newton iteration did not converge for the given step.
    #[error("Newton solver did not converge in step {step} (dt = {dt:e}): {reason}")]
    NewtonDivergence { step: usize, dt: f64, reason: String },

    /// Malformed input or unknown named-field lookup. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A Krylov solve failed for reasons other than reaching its iteration limit.
    #[error("linear solver failure: {0}")]
    LinearSolverFailure(String),

    /// I/O errors of the output streams.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the output streams failed on the root rank. Reported by the other ranks.
    #[error("output failed on the root rank")]
    CollectiveOutputFailure,
}

impl SimulationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The stage reported in diagnostics for a fatal failure.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::CollectiveMaterialFailure => FailureStage::MaterialSetup,
            Self::NewtonDivergence { .. } => FailureStage::NewtonConvergence,
            Self::Configuration(_) => FailureStage::Configuration,
            Self::LinearSolverFailure(_) => FailureStage::LinearSolve,
            Self::Io(_) | Self::CollectiveOutputFailure => FailureStage::Output,
        }
    }

    /// Whether a smaller time step may cure the failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CollectiveMaterialFailure | Self::NewtonDivergence { .. } | Self::LinearSolverFailure(_)
        )
    }
}
