//! Stage-structured problem data and solver I/O types.
//!
//! The optimal-control QP over a horizon of `N` steps is
//!
//! ```text
//! minimize    Σ_k  ½ v_kᵀ H_k v_k + g_kᵀ v_k
//! subject to  x_{k+1} = A_k x_k + B_k u_k + b_k       k = 0..N-1
//!             lb_k ≤ v_k[idxb_k] ≤ ub_k               k = 0..N
//!             lg_k ≤ D_k u_k + C_k x_k ≤ ug_k         k = 0..N
//! ```
//!
//! with the stage vector ordered controls first,
//!
//! ```text
//! v_k = [u_k; x_k],   H_k = [R  S]   g_k = [r]
//!                           [Sᵀ Q]         [q]
//! ```
//!
//! so `idxb` entries below `nu` address controls and the rest address states.
//!
//! # Dimensions
//!
//! - stage 0 carries no free state (`nx_0 = 0`): the known initial state is
//!   folded into `b_0` and `r_0` by the builder.
//! - stage N carries no control (`nu_N = 0`) and no outgoing dynamics, so
//!   its `A`, `B` and `b` have zero rows.
//! - the rows of `A_k`, `B_k`, `b_k` equal `nx_{k+1}`.

use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;

use crate::error::{OcpError, OcpResult};
use crate::linalg::dense::{self, Mat, Vector};

/// Per-stage sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageDims {
    /// Free state dimension
    pub nx: usize,
    /// Control dimension
    pub nu: usize,
    /// Number of two-sided box constraints
    pub nb: usize,
    /// Number of two-sided general constraints
    pub ng: usize,
}

impl StageDims {
    /// Length of the stage vector `[u; x]`.
    pub fn nv(&self) -> usize {
        self.nu + self.nx
    }

    /// Number of two-sided inequality rows (box rows first).
    pub fn nc(&self) -> usize {
        self.nb + self.ng
    }
}

/// Data of one stage of the horizon.
///
/// The stage never owns a decision variable: it only describes the local
/// cost, the local constraints and the dynamics leading to the next stage.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)] // Matrix names follow the usual OCP notation
pub struct StageQp {
    /// State transition to the next stage (nx_{k+1} × nx)
    pub A: Mat,
    /// Input matrix to the next stage (nx_{k+1} × nu)
    pub B: Mat,
    /// Dynamics offset (nx_{k+1})
    pub b: Vector,

    /// State Hessian block (nx × nx)
    pub Q: Mat,
    /// Cross term `uᵀ S x` (nu × nx)
    pub S: Mat,
    /// Control Hessian block (nu × nu)
    pub R: Mat,
    /// State gradient (nx)
    pub q: Vector,
    /// Control gradient (nu)
    pub r: Vector,

    /// Indices into `[u; x]` of the box-constrained entries
    pub idxb: Vec<usize>,
    /// Box lower bounds (nb)
    pub lb: Vector,
    /// Box upper bounds (nb)
    pub ub: Vector,

    /// General-constraint state matrix (ng × nx)
    pub C: Mat,
    /// General-constraint control matrix (ng × nu)
    pub D: Mat,
    /// General-constraint lower bounds (ng)
    pub lg: Vector,
    /// General-constraint upper bounds (ng)
    pub ug: Vector,
}

impl StageQp {
    /// Stage with the given sizes, zero cost and no constraints.
    pub fn zeros(nx: usize, nu: usize, nx_next: usize) -> Self {
        Self {
            A: Mat::zeros(nx_next, nx),
            B: Mat::zeros(nx_next, nu),
            b: DVector::zeros(nx_next),
            Q: Mat::zeros(nx, nx),
            S: Mat::zeros(nu, nx),
            R: Mat::zeros(nu, nu),
            q: DVector::zeros(nx),
            r: DVector::zeros(nu),
            idxb: Vec::new(),
            lb: DVector::zeros(0),
            ub: DVector::zeros(0),
            C: Mat::zeros(0, nx),
            D: Mat::zeros(0, nu),
            lg: DVector::zeros(0),
            ug: DVector::zeros(0),
        }
    }

    /// Sizes declared by this stage (read from `Q`, `R`, `idxb` and `C`).
    pub fn dims(&self) -> StageDims {
        StageDims {
            nx: self.Q.nrows(),
            nu: self.R.nrows(),
            nb: self.idxb.len(),
            ng: self.C.nrows(),
        }
    }

    /// State dimension of the stage this one maps into.
    pub fn nx_next(&self) -> usize {
        self.A.nrows()
    }

    /// Check every array against the declared sizes.
    ///
    /// `stage` is only used to label errors.
    pub fn validate(&self, stage: usize) -> OcpResult<()> {
        let d = self.dims();
        let nxn = self.nx_next();

        dense::check_shape(stage, "Q", &self.Q, d.nx, d.nx)?;
        dense::check_shape(stage, "R", &self.R, d.nu, d.nu)?;
        dense::check_shape(stage, "S", &self.S, d.nu, d.nx)?;
        dense::check_len(stage, "q", &self.q, d.nx)?;
        dense::check_len(stage, "r", &self.r, d.nu)?;

        dense::check_shape(stage, "A", &self.A, nxn, d.nx)?;
        dense::check_shape(stage, "B", &self.B, nxn, d.nu)?;
        dense::check_len(stage, "b", &self.b, nxn)?;

        dense::check_len(stage, "lb", &self.lb, d.nb)?;
        dense::check_len(stage, "ub", &self.ub, d.nb)?;
        dense::check_shape(stage, "C", &self.C, d.ng, d.nx)?;
        dense::check_shape(stage, "D", &self.D, d.ng, d.nu)?;
        dense::check_len(stage, "lg", &self.lg, d.ng)?;
        dense::check_len(stage, "ug", &self.ug, d.ng)?;

        let nv = d.nv();
        let mut seen = vec![false; nv];
        for (i, &idx) in self.idxb.iter().enumerate() {
            if idx >= nv {
                return Err(OcpError::mismatch(
                    stage,
                    format!("idxb[{}] = {} is outside the stage vector of length {}", i, idx, nv),
                ));
            }
            if seen[idx] {
                return Err(OcpError::mismatch(
                    stage,
                    format!("idxb[{}] = {} repeats an earlier index", i, idx),
                ));
            }
            seen[idx] = true;
        }

        let lower = self.lb.iter().chain(self.lg.iter());
        let upper = self.ub.iter().chain(self.ug.iter());
        for (row, (&lo, &up)) in lower.zip(upper).enumerate() {
            if !lo.is_finite() || !up.is_finite() || lo > up {
                return Err(OcpError::InfeasibleBounds {
                    stage,
                    row,
                    lower: lo,
                    upper: up,
                });
            }
        }

        Ok(())
    }
}

/// Ordered sequence of `N + 1` stages.
///
/// Stages are reference counted so that time-invariant interior stages can
/// point to one shared template instead of `N - 1` copies. The solver only
/// ever reads them.
#[derive(Debug, Clone)]
pub struct Horizon {
    stages: Vec<Arc<StageQp>>,
}

impl Horizon {
    /// Validate and wrap the stages.
    ///
    /// Checks each stage on its own and then the coupling between stages,
    /// so that any inconsistency surfaces here rather than inside a solve.
    pub fn new(stages: Vec<Arc<StageQp>>) -> OcpResult<Self> {
        if stages.len() < 2 {
            return Err(OcpError::mismatch(
                0,
                format!("a horizon needs at least 2 stages, got {}", stages.len()),
            ));
        }

        for (k, stage) in stages.iter().enumerate() {
            stage.validate(k)?;
        }

        if stages[0].dims().nx != 0 {
            return Err(OcpError::mismatch(
                0,
                format!(
                    "first stage must have no free state, got nx = {}",
                    stages[0].dims().nx
                ),
            ));
        }

        let n = stages.len() - 1;
        for k in 0..n {
            let nx_next = stages[k + 1].dims().nx;
            if stages[k].nx_next() != nx_next {
                return Err(OcpError::mismatch(
                    k,
                    format!(
                        "dynamics map into {} states but stage {} has {}",
                        stages[k].nx_next(),
                        k + 1,
                        nx_next
                    ),
                ));
            }
        }

        let last = &stages[n];
        if last.dims().nu != 0 {
            return Err(OcpError::mismatch(
                n,
                format!("terminal stage must have no control, got nu = {}", last.dims().nu),
            ));
        }
        if last.nx_next() != 0 {
            return Err(OcpError::mismatch(
                n,
                format!("terminal stage must have no dynamics, got {} rows", last.nx_next()),
            ));
        }

        Ok(Self { stages })
    }

    /// Horizon length `N` (number of dynamics steps).
    pub fn len(&self) -> usize {
        self.stages.len() - 1
    }

    /// Always false: a valid horizon has at least one step.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Stage `k` (0 ≤ k ≤ N).
    pub fn stage(&self, k: usize) -> &StageQp {
        &self.stages[k]
    }

    /// All stages.
    pub fn stages(&self) -> &[Arc<StageQp>] {
        &self.stages
    }

    /// Sizes of every stage.
    pub fn dims(&self) -> Vec<StageDims> {
        self.stages.iter().map(|s| s.dims()).collect()
    }

    /// True when stages `i` and `j` share one buffer.
    pub fn shares_data(&self, i: usize, j: usize) -> bool {
        Arc::ptr_eq(&self.stages[i], &self.stages[j])
    }
}

/// Solver configuration.
///
/// Construct with [`SolverConfig::new`] or struct-update syntax on
/// `Default`; the solver re-validates on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Exit tolerance on the duality measure and the KKT residuals
    pub tol: f64,

    /// Maximum number of interior point iterations
    pub max_iter: usize,

    /// Steps shorter than this end the solve with `BelowMinStep`
    pub min_step: f64,

    /// Initial barrier parameter; `<= 0` derives it from the cost data
    pub mu0: f64,

    /// Lower bound on the centering parameter σ
    pub sigma_min: f64,

    /// Start from the trajectory passed to the solver instead of zero
    pub warm_start: bool,

    /// Log one line per iteration at debug level
    pub verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tol: 1e-8,
            max_iter: 50,
            min_step: 1e-8,
            mu0: 0.0,
            sigma_min: 1e-3,
            warm_start: false,
            verbose: false,
        }
    }
}

impl SolverConfig {
    /// Validated configuration with default `mu0` and `sigma_min`.
    pub fn new(tol: f64, max_iter: usize, min_step: f64) -> OcpResult<Self> {
        let config = Self {
            tol,
            max_iter,
            min_step,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> OcpResult<()> {
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(OcpError::InvalidConfig(format!(
                "tol must be positive, got {}",
                self.tol
            )));
        }
        if self.max_iter == 0 {
            return Err(OcpError::InvalidConfig("max_iter must be at least 1".to_string()));
        }
        if !(self.min_step > 0.0 && self.min_step < 1.0) {
            return Err(OcpError::InvalidConfig(format!(
                "min_step must lie in (0, 1), got {}",
                self.min_step
            )));
        }
        if !self.mu0.is_finite() {
            return Err(OcpError::InvalidConfig(format!(
                "mu0 must be finite, got {}",
                self.mu0
            )));
        }
        if !(0.0..1.0).contains(&self.sigma_min) {
            return Err(OcpError::InvalidConfig(format!(
                "sigma_min must lie in [0, 1), got {}",
                self.sigma_min
            )));
        }
        Ok(())
    }
}

/// Outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Duality measure and residuals below tolerance
    Success,

    /// Iteration cap reached first
    MaxIterReached,

    /// The accepted step fell below the minimum step length
    BelowMinStep,
}

impl SolveStatus {
    /// Raw return code (`0` success, `1` iteration cap, `2` minimum step).
    pub fn code(&self) -> i32 {
        match self {
            SolveStatus::Success => 0,
            SolveStatus::MaxIterReached => 1,
            SolveStatus::BelowMinStep => 2,
        }
    }

    /// Inverse of [`SolveStatus::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SolveStatus::Success),
            1 => Some(SolveStatus::MaxIterReached),
            2 => Some(SolveStatus::BelowMinStep),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Success)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Success => write!(f, "solution found"),
            SolveStatus::MaxIterReached => write!(f, "maximum number of iterations reached"),
            SolveStatus::BelowMinStep => write!(f, "below minimum step size length"),
        }
    }
}

/// State and control trajectory, one vector per stage.
///
/// `x[k]` has length `nx_k` (so `x[0]` is empty: the initial state is not a
/// decision variable) and `u[k]` has length `nu_k` for `k < N`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// States x[0..=N]
    pub x: Vec<Vector>,
    /// Controls u[0..N]
    pub u: Vec<Vector>,
}

impl Trajectory {
    /// Zero trajectory shaped for `dims`.
    pub fn zeros(dims: &[StageDims]) -> Self {
        let n = dims.len().saturating_sub(1);
        Self {
            x: dims.iter().map(|d| DVector::zeros(d.nx)).collect(),
            u: dims[..n].iter().map(|d| DVector::zeros(d.nu)).collect(),
        }
    }

    /// True when every buffer has the size `dims` asks for.
    pub fn fits(&self, dims: &[StageDims]) -> bool {
        let n = dims.len().saturating_sub(1);
        self.x.len() == dims.len()
            && self.u.len() == n
            && self.x.iter().zip(dims).all(|(x, d)| x.len() == d.nx)
            && self.u.iter().zip(dims).all(|(u, d)| u.len() == d.nu)
    }

    /// Horizon length.
    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }
}

/// Per-iteration statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IterStats {
    /// Centering parameter of the corrector
    pub sigma: f64,
    /// Step length of the affine predictor
    pub alpha_aff: f64,
    /// Duality measure predicted by the affine step
    pub mu_aff: f64,
    /// Accepted step length
    pub alpha: f64,
    /// Duality measure after the step
    pub mu: f64,
}

/// Diagnostics returned with every solve.
#[derive(Debug, Clone, Default)]
pub struct SolveInfo {
    /// Iterations taken
    pub iters: usize,

    /// Final duality measure
    pub mu: f64,

    /// Final stationarity residual (infinity norm)
    pub res_stat: f64,

    /// Final dynamics residual (infinity norm)
    pub res_dyn: f64,

    /// Final inequality residual (infinity norm)
    pub res_ineq: f64,

    /// Scratch memory used by the solve, in bytes
    pub workspace_bytes: usize,

    /// One entry per iteration
    pub stats: Vec<IterStats>,
}

/// Solve result: status, last iterate and diagnostics.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Outcome of the solve
    pub status: SolveStatus,

    /// Last iterate (optimal when `status` is `Success`)
    pub trajectory: Trajectory,

    /// Diagnostics
    pub info: SolveInfo,
}
