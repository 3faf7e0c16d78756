//! Error types for problem construction.
//!
//! Only construction-time failures are errors. Solver non-convergence is
//! reported through [`SolveStatus`](crate::SolveStatus) together with the
//! last iterate, never through this enum.

use thiserror::Error;

/// Errors raised while discretizing, building or validating an OCP.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcpError {
    /// The linear solve of the discretization met a singular state matrix.
    #[error("Singular system: {0}")]
    SingularSystem(String),

    /// A stage array disagrees with the stage's declared size.
    #[error("Dimension mismatch at stage {stage}: {detail}")]
    DimensionMismatch {
        /// Stage index within the horizon
        stage: usize,
        /// What did not match
        detail: String,
    },

    /// A lower bound exceeds its upper bound, or a bound is not finite.
    #[error("Infeasible bounds at stage {stage}, row {row}: [{lower}, {upper}]")]
    InfeasibleBounds {
        /// Stage index within the horizon
        stage: usize,
        /// Constraint row within the stage (box rows first, then general rows)
        row: usize,
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },

    /// Continuous-time system or sampling period is unusable.
    #[error("Invalid system: {0}")]
    InvalidSystem(String),

    /// Solver configuration failed validation.
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),
}

impl OcpError {
    pub(crate) fn mismatch(stage: usize, detail: impl Into<String>) -> Self {
        OcpError::DimensionMismatch {
            stage,
            detail: detail.into(),
        }
    }
}

/// Result type for OCP construction.
pub type OcpResult<T> = Result<T, OcpError>;
