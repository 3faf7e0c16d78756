//! Assembly of a [`Horizon`] from a discrete model, a cost and constraints.
//!
//! The builder takes time-invariant data (one dynamics model, one stage cost,
//! one set of constraints) and produces the `N + 1` stage QPs the solver
//! consumes. Three stages are special:
//!
//! - **Stage 0.** The initial state `x0` is known, so the stage carries no
//!   free state. Its contribution is folded into the data:
//!   `b0 = b + A x0`, `r0 = r + S x0`, `lg0 = lg − C x0`, `ug0 = ug − C x0`.
//!   Only control bounds remain.
//! - **Interior stages 1..N-1.** All share one `Arc<StageQp>` template with
//!   control bounds followed by state bounds.
//! - **Stage N.** No control and no dynamics. Terminal cost, state bounds
//!   and the terminal general constraints.

use std::sync::Arc;

use nalgebra::DVector;

use crate::error::{OcpError, OcpResult};
use crate::linalg::dense::{self, Mat, Vector};
use crate::problem::{Horizon, StageQp};
use crate::system::{self, DiscreteSystem};

/// Quadratic stage cost `½ xᵀQx + uᵀSx + ½ uᵀRu + qᵀx + rᵀu`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct StageCost {
    pub Q: Mat,
    pub S: Mat,
    pub R: Mat,
    pub q: Vector,
    pub r: Vector,
}

impl StageCost {
    /// Zero cost for the given sizes.
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self {
            Q: Mat::zeros(nx, nx),
            S: Mat::zeros(nu, nx),
            R: Mat::zeros(nu, nu),
            q: DVector::zeros(nx),
            r: DVector::zeros(nu),
        }
    }
}

/// Terminal cost `½ xᵀQx + qᵀx`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct TerminalCost {
    pub Q: Mat,
    pub q: Vector,
}

/// Box bounds on the first `nbu = min(nu, nb)` controls and the first
/// `nbx = max(nb − nu, 0)` states.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoxBounds {
    /// Total box rows at an interior stage
    pub nb: usize,
    /// Control lower bounds (nbu)
    pub lbu: Vector,
    /// Control upper bounds (nbu)
    pub ubu: Vector,
    /// State lower bounds (nbx)
    pub lbx: Vector,
    /// State upper bounds (nbx)
    pub ubx: Vector,
}

impl BoxBounds {
    /// No box constraints.
    pub fn none() -> Self {
        Self {
            nb: 0,
            lbu: DVector::zeros(0),
            ubu: DVector::zeros(0),
            lbx: DVector::zeros(0),
            ubx: DVector::zeros(0),
        }
    }

    /// Symmetric bounds `|u| ≤ umax` and `|x| ≤ xmax` split for `nu` controls.
    pub fn symmetric(nb: usize, nu: usize, umax: f64, xmax: f64) -> Self {
        let (nbu, nbx) = split_box(nb, nu);
        Self {
            nb,
            lbu: DVector::from_element(nbu, -umax),
            ubu: DVector::from_element(nbu, umax),
            lbx: DVector::from_element(nbx, -xmax),
            ubx: DVector::from_element(nbx, xmax),
        }
    }
}

/// Two-sided general constraints `lg ≤ D u + C x ≤ ug`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct GeneralConstraints {
    pub C: Mat,
    pub D: Mat,
    pub lg: Vector,
    pub ug: Vector,
}

impl GeneralConstraints {
    /// `ng` all-zero rows with zero bounds.
    pub fn zeros(ng: usize, nx: usize, nu: usize) -> Self {
        Self {
            C: Mat::zeros(ng, nx),
            D: Mat::zeros(ng, nu),
            lg: DVector::zeros(ng),
            ug: DVector::zeros(ng),
        }
    }

    pub fn ng(&self) -> usize {
        self.C.nrows()
    }
}

/// Terminal constraints `lg ≤ C x_N ≤ ug`.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct TerminalConstraints {
    pub C: Mat,
    pub lg: Vector,
    pub ug: Vector,
}

impl TerminalConstraints {
    pub fn none(nx: usize) -> Self {
        Self {
            C: Mat::zeros(0, nx),
            lg: DVector::zeros(0),
            ug: DVector::zeros(0),
        }
    }

    /// Pin the first `ngn` states to zero.
    pub fn pin_to_origin(ngn: usize, nx: usize) -> Self {
        Self {
            C: Mat::identity(ngn, nx),
            lg: DVector::zeros(ngn),
            ug: DVector::zeros(ngn),
        }
    }
}

/// Time-invariant OCP description.
#[derive(Debug, Clone)]
pub struct OcpProblem {
    /// Discrete dynamics shared by every step
    pub system: DiscreteSystem,
    /// Number of dynamics steps `N`
    pub horizon: usize,
    /// Known initial state
    pub x0: Vector,
    /// Stage cost for stages 0..N-1
    pub cost: StageCost,
    /// Terminal cost; the stage `Q`, `q` when absent
    pub terminal_cost: Option<TerminalCost>,
    pub bounds: BoxBounds,
    /// General constraints at stages 0..N-1
    pub general: GeneralConstraints,
    /// General constraints at stage N
    pub terminal: TerminalConstraints,
}

/// Split `nb` box rows into `(nbu, nbx)`.
pub fn split_box(nb: usize, nu: usize) -> (usize, usize) {
    (nu.min(nb), nb.saturating_sub(nu))
}

impl OcpProblem {
    /// Unconstrained problem with zero cost.
    pub fn new(system: DiscreteSystem, horizon: usize, x0: Vector) -> Self {
        let nx = system.nx();
        let nu = system.nu();
        Self {
            system,
            horizon,
            x0,
            cost: StageCost::zeros(nx, nu),
            terminal_cost: None,
            bounds: BoxBounds::none(),
            general: GeneralConstraints::zeros(0, nx, nu),
            terminal: TerminalConstraints::none(nx),
        }
    }

    /// Mass-spring regulation problem.
    ///
    /// Drives `x0 = [2.5, 2.5, 0, …]` to the origin under a unit forcing
    /// offset of `0.1`, with `Q = I`, `R = 2I`, `q = 0.1`, `r = 0.2`,
    /// `|u| ≤ 0.5`, `|x| ≤ 4`, and the first `ngn` terminal states pinned to
    /// zero. The `ng` stage constraints are all-zero rows with zero bounds.
    pub fn mass_spring(
        ts: f64,
        nx: usize,
        nu: usize,
        horizon: usize,
        nb: usize,
        ng: usize,
        ngn: usize,
    ) -> OcpResult<Self> {
        let sys = system::ContinuousSystem::mass_spring(nx, nu)?
            .with_offset(DVector::from_element(nx, 0.1))?
            .discretize(ts)?;

        let mut x0 = DVector::zeros(nx);
        x0[0] = 2.5;
        x0[1] = 2.5;

        let mut problem = Self::new(sys, horizon, x0);
        problem.cost = StageCost {
            Q: Mat::identity(nx, nx),
            S: Mat::zeros(nu, nx),
            R: dense::scaled_identity(nu, 2.0),
            q: DVector::from_element(nx, 0.1),
            r: DVector::from_element(nu, 0.2),
        };
        problem.bounds = BoxBounds::symmetric(nb, nu, 0.5, 4.0);
        problem.general = GeneralConstraints::zeros(ng, nx, nu);
        problem.terminal = TerminalConstraints::pin_to_origin(ngn, nx);
        Ok(problem)
    }

    /// Check every array against the model sizes.
    ///
    /// Stage labels in errors refer to the stage the data ends up in:
    /// interior data is reported at stage 1 (or 0 when `N = 1`), terminal
    /// data at stage N.
    pub fn validate(&self) -> OcpResult<()> {
        system::check_discrete(&self.system)?;
        let nx = self.system.nx();
        let nu = self.system.nu();
        let n = self.horizon;
        if n == 0 {
            return Err(OcpError::mismatch(0, "horizon length must be at least 1"));
        }
        let interior = if n > 1 { 1 } else { 0 };

        dense::check_len(0, "x0", &self.x0, nx)?;

        let c = &self.cost;
        dense::check_shape(interior, "Q", &c.Q, nx, nx)?;
        dense::check_shape(interior, "S", &c.S, nu, nx)?;
        dense::check_shape(interior, "R", &c.R, nu, nu)?;
        dense::check_len(interior, "q", &c.q, nx)?;
        dense::check_len(interior, "r", &c.r, nu)?;
        if let Some(t) = &self.terminal_cost {
            dense::check_shape(n, "Q_N", &t.Q, nx, nx)?;
            dense::check_len(n, "q_N", &t.q, nx)?;
        }

        let bx = &self.bounds;
        let (nbu, nbx) = split_box(bx.nb, nu);
        if nbx > nx {
            return Err(OcpError::mismatch(
                interior,
                format!("{} state bounds requested but only {} states exist", nbx, nx),
            ));
        }
        dense::check_len(interior, "lbu", &bx.lbu, nbu)?;
        dense::check_len(interior, "ubu", &bx.ubu, nbu)?;
        dense::check_len(interior, "lbx", &bx.lbx, nbx)?;
        dense::check_len(interior, "ubx", &bx.ubx, nbx)?;

        let g = &self.general;
        let ng = g.ng();
        dense::check_shape(interior, "C", &g.C, ng, nx)?;
        dense::check_shape(interior, "D", &g.D, ng, nu)?;
        dense::check_len(interior, "lg", &g.lg, ng)?;
        dense::check_len(interior, "ug", &g.ug, ng)?;

        let t = &self.terminal;
        let ngn = t.C.nrows();
        dense::check_shape(n, "C_N", &t.C, ngn, nx)?;
        dense::check_len(n, "lg_N", &t.lg, ngn)?;
        dense::check_len(n, "ug_N", &t.ug, ngn)?;

        Ok(())
    }

    /// Build the stage QPs.
    pub fn build(&self) -> OcpResult<Horizon> {
        self.validate()?;

        let sys = &self.system;
        let nx = sys.nx();
        let nu = sys.nu();
        let n = self.horizon;
        let (nbu, nbx) = split_box(self.bounds.nb, nu);
        let x0 = &self.x0;

        let mut stages = Vec::with_capacity(n + 1);

        // Stage 0: fold the known initial state
        let mut first = StageQp::zeros(0, nu, nx);
        first.B = sys.B.clone();
        first.b = &sys.b + &sys.A * x0;
        first.R = self.cost.R.clone();
        first.r = &self.cost.r + &self.cost.S * x0;
        first.idxb = (0..nbu).collect();
        first.lb = self.bounds.lbu.clone();
        first.ub = self.bounds.ubu.clone();
        first.C = Mat::zeros(self.general.ng(), 0);
        first.D = self.general.D.clone();
        let cx0 = &self.general.C * x0;
        first.lg = &self.general.lg - &cx0;
        first.ug = &self.general.ug - &cx0;
        stages.push(Arc::new(first));

        // Interior stages share one template
        if n > 1 {
            let mut interior = StageQp::zeros(nx, nu, nx);
            interior.A = sys.A.clone();
            interior.B = sys.B.clone();
            interior.b = sys.b.clone();
            interior.Q = self.cost.Q.clone();
            interior.S = self.cost.S.clone();
            interior.R = self.cost.R.clone();
            interior.q = self.cost.q.clone();
            interior.r = self.cost.r.clone();
            interior.idxb = (0..nbu).chain(nu..nu + nbx).collect();
            interior.lb = concat(&self.bounds.lbu, &self.bounds.lbx);
            interior.ub = concat(&self.bounds.ubu, &self.bounds.ubx);
            interior.C = self.general.C.clone();
            interior.D = self.general.D.clone();
            interior.lg = self.general.lg.clone();
            interior.ug = self.general.ug.clone();

            let shared = Arc::new(interior);
            for _ in 1..n {
                stages.push(Arc::clone(&shared));
            }
        }

        // Stage N
        let mut last = StageQp::zeros(nx, 0, 0);
        match &self.terminal_cost {
            Some(t) => {
                last.Q = t.Q.clone();
                last.q = t.q.clone();
            }
            None => {
                last.Q = self.cost.Q.clone();
                last.q = self.cost.q.clone();
            }
        }
        last.idxb = (0..nbx).collect();
        last.lb = self.bounds.lbx.clone();
        last.ub = self.bounds.ubx.clone();
        last.C = self.terminal.C.clone();
        last.D = Mat::zeros(self.terminal.C.nrows(), 0);
        last.lg = self.terminal.lg.clone();
        last.ug = self.terminal.ug.clone();
        stages.push(Arc::new(last));

        let horizon = Horizon::new(stages)?;
        log::debug!(
            "built OCP horizon: N={}, nx={}, nu={}, nbu={}, nbx={}, ng={}, ngN={}",
            n,
            nx,
            nu,
            nbu,
            nbx,
            self.general.ng(),
            self.terminal.C.nrows()
        );
        Ok(horizon)
    }
}

fn concat(a: &Vector, b: &Vector) -> Vector {
    DVector::from_iterator(a.len() + b.len(), a.iter().chain(b.iter()).copied())
}
