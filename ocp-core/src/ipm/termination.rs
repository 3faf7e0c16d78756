//! Termination criteria for the OCP interior point method.
//!
//! Checks, in order:
//! - Optimality: duality measure and every residual norm below `tol`
//! - Numerical breakdown: NaN or infinite residuals
//! - Iteration cap
//!
//! A step shorter than `min_step` is detected by the driver right after the
//! step, since it depends on the step rather than on the iterate.

use crate::problem::{SolveStatus, SolverConfig};

/// Convergence measures of one iterate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    /// Duality measure
    pub mu: f64,
    /// Stationarity residual (infinity norm)
    pub res_stat: f64,
    /// Dynamics residual (infinity norm)
    pub res_dyn: f64,
    /// Inequality residual (infinity norm)
    pub res_ineq: f64,
}

impl Progress {
    pub fn is_finite(&self) -> bool {
        self.mu.is_finite()
            && self.res_stat.is_finite()
            && self.res_dyn.is_finite()
            && self.res_ineq.is_finite()
    }

    /// True when the iterate satisfies every tolerance.
    pub fn converged(&self, tol: f64) -> bool {
        self.mu <= tol && self.res_stat <= tol && self.res_dyn <= tol && self.res_ineq <= tol
    }
}

/// Check termination conditions after `iters` completed iterations.
///
/// Returns `Some(status)` if the solver should stop, `None` otherwise.
pub fn check_termination(
    config: &SolverConfig,
    iters: usize,
    progress: &Progress,
) -> Option<SolveStatus> {
    if progress.converged(config.tol) {
        return Some(SolveStatus::Success);
    }

    if !progress.is_finite() {
        log::warn!("IPM: non-finite iterate after {} iterations", iters);
        return Some(SolveStatus::BelowMinStep);
    }

    if iters >= config.max_iter {
        return Some(SolveStatus::MaxIterReached);
    }

    None
}
