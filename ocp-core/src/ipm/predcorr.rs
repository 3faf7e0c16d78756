//! Mehrotra predictor-corrector step for the stage-structured QP.
//!
//! Each two-sided inequality row `lo ≤ c(v) ≤ up` of a stage carries a slack
//! and a multiplier per side:
//!
//! ```text
//! c(v) − lo − t_lo = 0,   t_lo ≥ 0,   λ_lo ≥ 0,   λ_lo ∘ t_lo = μ
//! up − c(v) − t_up = 0,   t_up ≥ 0,   λ_up ≥ 0,   λ_up ∘ t_up = μ
//! ```
//!
//! Slacks and multipliers are eliminated stage by stage, which leaves an
//! LQ problem with barrier-augmented Hessian `H + Jᵀ W J` for the Riccati
//! recursion. The affine (predictor) direction and the centered (corrector)
//! direction share one factorization.

use crate::linalg::dense::{self, Vector};
use crate::problem::{Horizon, IterStats};

use super::riccati::{self, RiccatiError};
use super::workspace::{StageWork, Workspace};

/// Initial slack floor.
const SLACK_INIT_MIN: f64 = 0.1;

/// Fraction of the distance to the boundary taken by a step.
const STEP_FRACTION: f64 = 0.995;

/// Automatic initial barrier parameter: the largest cost entry, at least 2.
pub fn default_mu0(horizon: &Horizon) -> f64 {
    horizon.stages().iter().fold(2.0_f64, |acc, s| {
        acc.max(dense::max_abs(&s.Q))
            .max(dense::max_abs(&s.S))
            .max(dense::max_abs(&s.R))
            .max(dense::inf_norm(s.q.as_slice()))
            .max(dense::inf_norm(s.r.as_slice()))
    })
}

/// Total number of one-sided complementarity pairs.
pub fn complementarity_count(ws: &Workspace) -> usize {
    ws.stages.iter().map(|s| 2 * s.lo.len()).sum()
}

/// Set slacks and multipliers around the current stage vectors.
///
/// Dynamics multipliers start at zero.
pub fn initialize(ws: &mut Workspace, mu0: f64) {
    for sw in ws.stages.iter_mut() {
        sw.tmp_nc.gemv(1.0, &sw.jac, &sw.v, 0.0);
        for i in 0..sw.lo.len() {
            let c = sw.tmp_nc[i];
            sw.t_lo[i] = (c - sw.lo[i]).max(SLACK_INIT_MIN);
            sw.t_up[i] = (sw.up[i] - c).max(SLACK_INIT_MIN);
            sw.lam_lo[i] = mu0 / sw.t_lo[i];
            sw.lam_up[i] = mu0 / sw.t_up[i];
        }
        sw.pi.fill(0.0);
    }
}

/// Duality measure `Σ λᵀt / (number of pairs)`, 0 without inequalities.
pub fn duality_measure(ws: &Workspace) -> f64 {
    let count = complementarity_count(ws);
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = ws
        .stages
        .iter()
        .map(|s| s.lam_lo.dot(&s.t_lo) + s.lam_up.dot(&s.t_up))
        .sum();
    sum / count as f64
}

/// KKT residuals of the current iterate.
///
/// ```text
/// r_stat = H v + g + [B A]ᵀ π_k − [0; π_{k−1}] − Jᵀ(λ_lo − λ_up)
/// r_dyn  = [B A] v + b − x_{k+1}
/// r_lo   = J v − lo − t_lo
/// r_up   = up − J v − t_up
/// ```
pub fn compute_residuals(ws: &mut Workspace) {
    let stages = &mut ws.stages;
    let n = stages.len() - 1;

    for sw in stages.iter_mut() {
        sw.tmp_nc.copy_from(&sw.lam_lo);
        sw.tmp_nc -= &sw.lam_up;

        sw.r_stat.copy_from(&sw.grad);
        sw.r_stat.gemv(1.0, &sw.hess, &sw.v, 1.0);
        sw.r_stat.gemv_tr(1.0, &sw.dyn_mat, &sw.pi, 1.0);
        sw.r_stat.gemv_tr(-1.0, &sw.jac, &sw.tmp_nc, 1.0);

        sw.tmp_nc.gemv(1.0, &sw.jac, &sw.v, 0.0);
        sw.r_lo.copy_from(&sw.tmp_nc);
        sw.r_lo -= &sw.lo;
        sw.r_lo -= &sw.t_lo;
        sw.r_up.copy_from(&sw.up);
        sw.r_up -= &sw.tmp_nc;
        sw.r_up -= &sw.t_up;

        sw.r_dyn.copy_from(&sw.dyn_off);
        sw.r_dyn.gemv(1.0, &sw.dyn_mat, &sw.v, 1.0);
    }

    // Coupling with neighbouring stages
    for k in 0..n {
        let (head, tail) = stages.split_at_mut(k + 1);
        let cur = &mut head[k];
        let next = &mut tail[0];
        let (nu, nx) = (next.nu, next.nx);
        cur.r_dyn -= &next.v.rows(nu, nx);
        next.r_stat.rows_mut(nu, nx).axpy(-1.0, &cur.pi, 1.0);
    }
}

/// Infinity norms `(stationarity, dynamics, inequality)` of the residuals.
pub fn residual_norms(ws: &Workspace) -> (f64, f64, f64) {
    ws.stages.iter().fold((0.0_f64, 0.0_f64, 0.0_f64), |acc, s| {
        (
            acc.0.max(dense::inf_norm(s.r_stat.as_slice())),
            acc.1.max(dense::inf_norm(s.r_dyn.as_slice())),
            acc.2
                .max(dense::inf_norm(s.r_lo.as_slice()))
                .max(dense::inf_norm(s.r_up.as_slice())),
        )
    })
}

/// Barrier weights and augmented Hessian; depends on the iterate only.
fn assemble_hessian(sw: &mut StageWork) {
    for i in 0..sw.w.len() {
        sw.w[i] = sw.lam_lo[i] / sw.t_lo[i] + sw.lam_up[i] / sw.t_up[i];
    }
    sw.wj.copy_from(&sw.jac);
    for (i, &wi) in sw.w.iter().enumerate() {
        sw.wj.row_mut(i).scale_mut(wi);
    }
    sw.h_tilde.copy_from(&sw.hess);
    sw.h_tilde.gemm_tr(1.0, &sw.jac, &sw.wj, 1.0);
}

/// Condensed gradient for the current `rc_lo`, `rc_up`.
fn assemble_gradient(sw: &mut StageWork) {
    for i in 0..sw.gam.len() {
        sw.gam[i] = (sw.rc_lo[i] + sw.lam_lo[i] * sw.r_lo[i]) / sw.t_lo[i]
            - (sw.rc_up[i] + sw.lam_up[i] * sw.r_up[i]) / sw.t_up[i];
    }
    sw.g_tilde.copy_from(&sw.r_stat);
    sw.g_tilde.gemv_tr(1.0, &sw.jac, &sw.gam, 1.0);
}

/// Recover slack and multiplier directions from `dv`.
fn expand_direction(sw: &mut StageWork) {
    sw.tmp_nc.gemv(1.0, &sw.jac, &sw.dv, 0.0);
    for i in 0..sw.tmp_nc.len() {
        let jd = sw.tmp_nc[i];
        sw.dt_lo[i] = jd + sw.r_lo[i];
        sw.dt_up[i] = -jd + sw.r_up[i];
        sw.dlam_lo[i] = -(sw.rc_lo[i] + sw.lam_lo[i] * sw.dt_lo[i]) / sw.t_lo[i];
        sw.dlam_up[i] = -(sw.rc_up[i] + sw.lam_up[i] * sw.dt_up[i]) / sw.t_up[i];
    }
}

/// Solve for a direction with the current complementarity right-hand side.
fn direction(ws: &mut Workspace) {
    for sw in ws.stages.iter_mut() {
        assemble_gradient(sw);
    }
    riccati::solve(&mut ws.stages);
    for sw in ws.stages.iter_mut() {
        expand_direction(sw);
    }
}

fn ratio_test(z: &Vector, dz: &Vector, alpha: f64) -> f64 {
    z.iter().zip(dz.iter()).fold(alpha, |a, (&zi, &dzi)| {
        if dzi < 0.0 {
            a.min(-zi / dzi)
        } else {
            a
        }
    })
}

/// Largest step in `(0, cap]` keeping slacks and multipliers nonnegative.
pub fn max_step(ws: &Workspace, cap: f64) -> f64 {
    ws.stages.iter().fold(cap, |a, s| {
        let a = ratio_test(&s.t_lo, &s.dt_lo, a);
        let a = ratio_test(&s.t_up, &s.dt_up, a);
        let a = ratio_test(&s.lam_lo, &s.dlam_lo, a);
        ratio_test(&s.lam_up, &s.dlam_up, a)
    })
}

/// Duality measure after a step of length `alpha` along the direction.
fn trial_measure(ws: &Workspace, alpha: f64, count: usize) -> f64 {
    let sum: f64 = ws
        .stages
        .iter()
        .map(|s| {
            let mut acc = 0.0;
            for i in 0..s.t_lo.len() {
                acc += (s.lam_lo[i] + alpha * s.dlam_lo[i]) * (s.t_lo[i] + alpha * s.dt_lo[i]);
                acc += (s.lam_up[i] + alpha * s.dlam_up[i]) * (s.t_up[i] + alpha * s.dt_up[i]);
            }
            acc
        })
        .sum();
    sum / count as f64
}

/// One predictor-corrector iteration from the current iterate.
///
/// Expects residuals to be current (see [`compute_residuals`]). Updates the
/// iterate in place and returns the statistics of the step; the caller
/// decides what a short step means.
pub fn step(ws: &mut Workspace, mu: f64, sigma_min: f64) -> Result<IterStats, RiccatiError> {
    let count = complementarity_count(ws);

    // Step 1: factor the barrier-augmented system
    for sw in ws.stages.iter_mut() {
        assemble_hessian(sw);
    }
    riccati::factorize(&mut ws.stages)?;

    // Step 2: affine predictor
    for sw in ws.stages.iter_mut() {
        for i in 0..sw.rc_lo.len() {
            sw.rc_lo[i] = sw.lam_lo[i] * sw.t_lo[i];
            sw.rc_up[i] = sw.lam_up[i] * sw.t_up[i];
        }
    }
    direction(ws);

    let alpha_aff = max_step(ws, 1.0);
    let (mu_aff, sigma) = if count > 0 && mu > 0.0 {
        let mu_aff = trial_measure(ws, alpha_aff, count);
        let ratio = mu_aff / mu;
        (mu_aff, (ratio * ratio * ratio).min(1.0).max(sigma_min))
    } else {
        (0.0, 0.0)
    };

    // Step 3: centered corrector with the second-order term
    let target = sigma * mu;
    for sw in ws.stages.iter_mut() {
        sw.dt_lo_aff.copy_from(&sw.dt_lo);
        sw.dt_up_aff.copy_from(&sw.dt_up);
        sw.dlam_lo_aff.copy_from(&sw.dlam_lo);
        sw.dlam_up_aff.copy_from(&sw.dlam_up);
        for i in 0..sw.rc_lo.len() {
            sw.rc_lo[i] =
                sw.lam_lo[i] * sw.t_lo[i] + sw.dlam_lo_aff[i] * sw.dt_lo_aff[i] - target;
            sw.rc_up[i] =
                sw.lam_up[i] * sw.t_up[i] + sw.dlam_up_aff[i] * sw.dt_up_aff[i] - target;
        }
    }
    direction(ws);

    // Step 4: step length and update
    let alpha = (STEP_FRACTION * max_step(ws, f64::INFINITY)).min(1.0);
    for sw in ws.stages.iter_mut() {
        sw.v.axpy(alpha, &sw.dv, 1.0);
        sw.pi.axpy(alpha, &sw.dpi, 1.0);
        sw.t_lo.axpy(alpha, &sw.dt_lo, 1.0);
        sw.t_up.axpy(alpha, &sw.dt_up, 1.0);
        sw.lam_lo.axpy(alpha, &sw.dlam_lo, 1.0);
        sw.lam_up.axpy(alpha, &sw.dlam_up, 1.0);
    }

    Ok(IterStats {
        sigma,
        alpha_aff,
        mu_aff,
        alpha,
        mu: duality_measure(ws),
    })
}
