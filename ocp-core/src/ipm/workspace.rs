//! Pre-allocated workspace for the stage-wise predictor-corrector IPM.
//!
//! Every buffer the solver touches during its iterations is allocated here,
//! once, from the per-stage dimensions; the only exception is the diagonal
//! shift retried when a control block fails to factor. The size is a pure
//! function of those dimensions and of the iteration cap (the statistics
//! buffer holds five values per iteration), so callers can query it before
//! allocating.

use nalgebra::{Cholesky, DVector, Dyn};

use crate::error::{OcpError, OcpResult};
use crate::linalg::dense::{Mat, Vector};
use crate::problem::{Horizon, IterStats, SolverConfig, StageDims, StageQp, Trajectory};

/// Number of `f64` values stored per iteration statistics record.
const STATS_PER_ITER: usize = 5;

/// Buffers for one stage.
///
/// `nv = nu + nx` is the stage vector length, `nc = nb + ng` the number of
/// two-sided inequality rows and `nxn` the state dimension of the next stage.
pub struct StageWork {
    pub(crate) nx: usize,
    pub(crate) nu: usize,

    // ========================================================================
    // Stage data packed in [u; x] form
    // ========================================================================
    /// Cost Hessian [R S; Sᵀ Q]
    pub(crate) hess: Mat,
    /// Cost gradient [r; q]
    pub(crate) grad: Vector,
    /// Inequality Jacobian: unit rows for `idxb`, then [D C]
    pub(crate) jac: Mat,
    /// Dynamics matrix [B A]
    pub(crate) dyn_mat: Mat,
    /// Dynamics offset b
    pub(crate) dyn_off: Vector,
    /// Lower bounds [lb; lg]
    pub(crate) lo: Vector,
    /// Upper bounds [ub; ug]
    pub(crate) up: Vector,

    // ========================================================================
    // Iterate
    // ========================================================================
    pub(crate) v: Vector,
    /// Multiplier of the dynamics leaving this stage
    pub(crate) pi: Vector,
    pub(crate) t_lo: Vector,
    pub(crate) t_up: Vector,
    pub(crate) lam_lo: Vector,
    pub(crate) lam_up: Vector,

    // ========================================================================
    // Residuals
    // ========================================================================
    pub(crate) r_stat: Vector,
    pub(crate) r_dyn: Vector,
    pub(crate) r_lo: Vector,
    pub(crate) r_up: Vector,
    /// Complementarity right-hand sides
    pub(crate) rc_lo: Vector,
    pub(crate) rc_up: Vector,

    // ========================================================================
    // Newton system and Riccati recursion
    // ========================================================================
    /// Barrier weights λ/t summed over both sides
    pub(crate) w: Vector,
    /// Condensed complementarity term
    pub(crate) gam: Vector,
    /// W·J scratch
    pub(crate) wj: Mat,
    /// Barrier-augmented Hessian
    pub(crate) h_tilde: Mat,
    /// Condensed gradient
    pub(crate) g_tilde: Vector,
    /// H̃ + [B A]ᵀ P⁺ [B A]
    pub(crate) m_mat: Mat,
    pub(crate) m_vec: Vector,
    /// [B A]ᵀ P⁺ scratch
    pub(crate) bat_p: Mat,
    /// Cost-to-go Hessian
    pub(crate) p_mat: Mat,
    /// Cost-to-go gradient
    pub(crate) p_vec: Vector,
    /// Feedback gain
    pub(crate) k_mat: Mat,
    /// Feedforward term
    pub(crate) k_ff: Vector,
    /// Factor of the control block of `m_mat`
    pub(crate) chol: Option<Cholesky<f64, Dyn>>,

    // ========================================================================
    // Search directions
    // ========================================================================
    pub(crate) dv: Vector,
    pub(crate) dpi: Vector,
    pub(crate) dt_lo: Vector,
    pub(crate) dt_up: Vector,
    pub(crate) dlam_lo: Vector,
    pub(crate) dlam_up: Vector,
    pub(crate) dt_lo_aff: Vector,
    pub(crate) dt_up_aff: Vector,
    pub(crate) dlam_lo_aff: Vector,
    pub(crate) dlam_up_aff: Vector,

    // Scratch
    pub(crate) tmp_nv: Vector,
    pub(crate) tmp_nc: Vector,
    pub(crate) tmp_nxn: Vector,
}

impl StageWork {
    /// Allocate zeroed buffers for a stage.
    pub fn new(d: &StageDims, nxn: usize) -> Self {
        let nv = d.nv();
        let nc = d.nc();
        let z = |n: usize| DVector::zeros(n);

        Self {
            nx: d.nx,
            nu: d.nu,

            hess: Mat::zeros(nv, nv),
            grad: z(nv),
            jac: Mat::zeros(nc, nv),
            dyn_mat: Mat::zeros(nxn, nv),
            dyn_off: z(nxn),
            lo: z(nc),
            up: z(nc),

            v: z(nv),
            pi: z(nxn),
            t_lo: z(nc),
            t_up: z(nc),
            lam_lo: z(nc),
            lam_up: z(nc),

            r_stat: z(nv),
            r_dyn: z(nxn),
            r_lo: z(nc),
            r_up: z(nc),
            rc_lo: z(nc),
            rc_up: z(nc),

            w: z(nc),
            gam: z(nc),
            wj: Mat::zeros(nc, nv),
            h_tilde: Mat::zeros(nv, nv),
            g_tilde: z(nv),
            m_mat: Mat::zeros(nv, nv),
            m_vec: z(nv),
            bat_p: Mat::zeros(nv, nxn),
            p_mat: Mat::zeros(d.nx, d.nx),
            p_vec: z(d.nx),
            k_mat: Mat::zeros(d.nu, d.nx),
            k_ff: z(d.nu),
            // storage for the factor, overwritten by every factorization
            chol: Cholesky::new(Mat::identity(d.nu, d.nu)),

            dv: z(nv),
            dpi: z(nxn),
            dt_lo: z(nc),
            dt_up: z(nc),
            dlam_lo: z(nc),
            dlam_up: z(nc),
            dt_lo_aff: z(nc),
            dt_up_aff: z(nc),
            dlam_lo_aff: z(nc),
            dlam_up_aff: z(nc),

            tmp_nv: z(nv),
            tmp_nc: z(nc),
            tmp_nxn: z(nxn),
        }
    }

    /// Number of `f64` values a stage of these sizes needs.
    pub fn float_count(d: &StageDims, nxn: usize) -> usize {
        let nv = d.nv();
        let nc = d.nc();
        // hess, h_tilde, m_mat
        let square = 3 * nv * nv;
        // jac, wj
        let constraint = 2 * nc * nv;
        // dyn_mat, bat_p
        let dynamics = 2 * nxn * nv;
        // p_mat, k_mat, Cholesky factor
        let riccati = d.nx * d.nx + d.nu * d.nx + d.nu * d.nu;
        // grad, v, r_stat, g_tilde, m_vec, dv, tmp_nv
        let per_nv = 7 * nv;
        // dyn_off, pi, r_dyn, dpi, tmp_nxn
        let per_nxn = 5 * nxn;
        // lo, up, t/lam (4), r_lo, r_up, rc (2), w, gam, d* (4), d*_aff (4), tmp_nc
        let per_nc = 21 * nc;
        // p_vec, k_ff
        let small = d.nx + d.nu;

        square + constraint + dynamics + riccati + per_nv + per_nxn + per_nc + small
    }

    /// Copy stage data into the packed `[u; x]` buffers.
    pub(crate) fn load(&mut self, stage: &StageQp) {
        let nu = self.nu;
        let nx = self.nx;

        self.hess.view_mut((0, 0), (nu, nu)).copy_from(&stage.R);
        self.hess.view_mut((0, nu), (nu, nx)).copy_from(&stage.S);
        self.hess
            .view_mut((nu, 0), (nx, nu))
            .tr_copy_from(&stage.S);
        self.hess.view_mut((nu, nu), (nx, nx)).copy_from(&stage.Q);

        self.grad.rows_mut(0, nu).copy_from(&stage.r);
        self.grad.rows_mut(nu, nx).copy_from(&stage.q);

        let nb = stage.idxb.len();
        let ng = stage.C.nrows();
        self.jac.fill(0.0);
        for (row, &idx) in stage.idxb.iter().enumerate() {
            self.jac[(row, idx)] = 1.0;
        }
        self.jac.view_mut((nb, 0), (ng, nu)).copy_from(&stage.D);
        self.jac.view_mut((nb, nu), (ng, nx)).copy_from(&stage.C);

        let nxn = stage.A.nrows();
        self.dyn_mat.view_mut((0, 0), (nxn, nu)).copy_from(&stage.B);
        self.dyn_mat.view_mut((0, nu), (nxn, nx)).copy_from(&stage.A);
        self.dyn_off.copy_from(&stage.b);

        self.lo.rows_mut(0, nb).copy_from(&stage.lb);
        self.lo.rows_mut(nb, ng).copy_from(&stage.lg);
        self.up.rows_mut(0, nb).copy_from(&stage.ub);
        self.up.rows_mut(nb, ng).copy_from(&stage.ug);
    }

    #[cfg(test)]
    fn allocated(&self) -> usize {
        let mats = [
            &self.hess,
            &self.h_tilde,
            &self.m_mat,
            &self.jac,
            &self.wj,
            &self.dyn_mat,
            &self.bat_p,
            &self.p_mat,
            &self.k_mat,
        ];
        let vecs = [
            &self.grad,
            &self.v,
            &self.r_stat,
            &self.g_tilde,
            &self.m_vec,
            &self.dv,
            &self.tmp_nv,
            &self.dyn_off,
            &self.pi,
            &self.r_dyn,
            &self.dpi,
            &self.tmp_nxn,
            &self.lo,
            &self.up,
            &self.t_lo,
            &self.t_up,
            &self.lam_lo,
            &self.lam_up,
            &self.r_lo,
            &self.r_up,
            &self.rc_lo,
            &self.rc_up,
            &self.w,
            &self.gam,
            &self.dt_lo,
            &self.dt_up,
            &self.dlam_lo,
            &self.dlam_up,
            &self.dt_lo_aff,
            &self.dt_up_aff,
            &self.dlam_lo_aff,
            &self.dlam_up_aff,
            &self.tmp_nc,
            &self.p_vec,
            &self.k_ff,
        ];
        let factor = self.chol.as_ref().map_or(0, |c| c.l_dirty().len());
        mats.iter().map(|m| m.len()).sum::<usize>()
            + vecs.iter().map(|v| v.len()).sum::<usize>()
            + factor
    }
}

/// Solver workspace: one [`StageWork`] per stage plus iteration statistics.
///
/// Owned by the caller and borrowed mutably for a solve; it can be reused
/// for any horizon with the same dimensions.
pub struct Workspace {
    pub(crate) stages: Vec<StageWork>,
    pub(crate) stats: Vec<IterStats>,
    dims: Vec<StageDims>,
    max_iter: usize,
}

/// Next-stage state dimension for each stage (0 for the last).
fn next_nx(dims: &[StageDims]) -> impl Iterator<Item = usize> + '_ {
    dims.iter()
        .skip(1)
        .map(|d| d.nx)
        .chain(std::iter::once(0))
}

/// Workspace size in bytes for the given stage dimensions and configuration.
pub fn workspace_size(dims: &[StageDims], config: &SolverConfig) -> usize {
    let stage_floats: usize = dims
        .iter()
        .zip(next_nx(dims))
        .map(|(d, nxn)| StageWork::float_count(d, nxn))
        .sum();
    let stats_floats = STATS_PER_ITER * config.max_iter;
    (stage_floats + stats_floats) * std::mem::size_of::<f64>()
}

impl Workspace {
    /// Allocate a workspace for the given stage dimensions.
    pub fn new(dims: &[StageDims], config: &SolverConfig) -> OcpResult<Self> {
        config.validate()?;
        if dims.len() < 2 {
            return Err(OcpError::mismatch(
                0,
                format!("a horizon needs at least 2 stages, got {}", dims.len()),
            ));
        }
        let stages = dims
            .iter()
            .zip(next_nx(dims))
            .map(|(d, nxn)| StageWork::new(d, nxn))
            .collect();
        Ok(Self {
            stages,
            stats: Vec::with_capacity(config.max_iter),
            dims: dims.to_vec(),
            max_iter: config.max_iter,
        })
    }

    /// Allocate a workspace sized for `horizon`.
    pub fn for_horizon(horizon: &Horizon, config: &SolverConfig) -> OcpResult<Self> {
        Self::new(&horizon.dims(), config)
    }

    /// Size of this workspace in bytes, as reported by [`workspace_size`].
    pub fn bytes(&self) -> usize {
        let floats: usize = self
            .dims
            .iter()
            .zip(next_nx(&self.dims))
            .map(|(d, nxn)| StageWork::float_count(d, nxn))
            .sum();
        (floats + STATS_PER_ITER * self.max_iter) * std::mem::size_of::<f64>()
    }

    /// True when the workspace can serve a solve with these sizes and cap.
    pub fn fits(&self, dims: &[StageDims], max_iter: usize) -> bool {
        self.dims == dims && max_iter <= self.max_iter
    }

    /// Statistics of the last solve.
    pub fn stats(&self) -> &[IterStats] {
        &self.stats
    }

    /// Pack a trajectory into the stage vectors.
    pub(crate) fn read_trajectory(&mut self, traj: &Trajectory) {
        let n = self.stages.len() - 1;
        for (k, sw) in self.stages.iter_mut().enumerate() {
            let (nu, nx) = (sw.nu, sw.nx);
            if k < n {
                sw.v.rows_mut(0, nu).copy_from(&traj.u[k]);
            }
            sw.v.rows_mut(nu, nx).copy_from(&traj.x[k]);
        }
    }

    /// Unpack the stage vectors into a trajectory.
    pub(crate) fn write_trajectory(&self, traj: &mut Trajectory) {
        let n = self.stages.len() - 1;
        for (k, sw) in self.stages.iter().enumerate() {
            let (nu, nx) = (sw.nu, sw.nx);
            if k < n {
                traj.u[k].copy_from(&sw.v.rows(0, nu));
            }
            traj.x[k].copy_from(&sw.v.rows(nu, nx));
        }
    }
}
