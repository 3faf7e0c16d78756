//! Interior point solver for stage-structured OCP QPs.
//!
//! Predictor-corrector algorithm on the stage-wise KKT system, Riccati
//! recursion for the Newton directions, and termination criteria.

pub mod predcorr;
pub mod riccati;
pub mod termination;
pub mod workspace;

use crate::error::{OcpError, OcpResult};
use crate::problem::{Horizon, SolveInfo, SolveStatus, Solution, SolverConfig, Trajectory};
use termination::{check_termination, Progress};
use workspace::Workspace;

pub use workspace::workspace_size;

fn measure(ws: &Workspace, mu: f64) -> Progress {
    let (res_stat, res_dyn, res_ineq) = predcorr::residual_norms(ws);
    Progress {
        mu,
        res_stat,
        res_dyn,
        res_ineq,
    }
}

/// Solve an OCP QP with freshly allocated buffers.
///
/// Construction problems (bad configuration) are errors; non-convergence is
/// reported in [`Solution::status`] together with the last iterate.
pub fn solve(horizon: &Horizon, config: &SolverConfig) -> OcpResult<Solution> {
    config.validate()?;
    let dims = horizon.dims();
    let mut workspace = Workspace::new(&dims, config)?;
    let mut trajectory = Trajectory::zeros(&dims);

    let (status, info) = solve_with(horizon, config, &mut trajectory, &mut workspace)?;

    Ok(Solution {
        status,
        trajectory,
        info,
    })
}

/// Solve an OCP QP into caller-owned buffers.
///
/// `trajectory` receives the last iterate on every exit path. When
/// `config.warm_start` is set it also provides the starting point.
/// `workspace` must have been allocated for the horizon's dimensions with an
/// iteration cap of at least `config.max_iter`.
pub fn solve_with(
    horizon: &Horizon,
    config: &SolverConfig,
    trajectory: &mut Trajectory,
    workspace: &mut Workspace,
) -> OcpResult<(SolveStatus, SolveInfo)> {
    config.validate()?;

    let dims = horizon.dims();
    if !workspace.fits(&dims, config.max_iter) {
        return Err(OcpError::mismatch(
            0,
            "workspace was allocated for different dimensions or a smaller iteration cap",
        ));
    }
    if !trajectory.fits(&dims) {
        return Err(OcpError::mismatch(0, "trajectory buffers do not match the horizon"));
    }

    let ws = workspace;
    for (sw, stage) in ws.stages.iter_mut().zip(horizon.stages()) {
        sw.load(stage);
    }
    if config.warm_start {
        ws.read_trajectory(trajectory);
    } else {
        for sw in ws.stages.iter_mut() {
            sw.v.fill(0.0);
        }
    }

    let mu0 = if config.mu0 > 0.0 {
        config.mu0
    } else {
        predcorr::default_mu0(horizon)
    };
    predcorr::initialize(ws, mu0);
    let mut mu = predcorr::duality_measure(ws);
    ws.stats.clear();

    if config.verbose {
        log::debug!(
            "IPM: N={}, {} inequality pairs, mu0={:.3e}, tol={:.1e}, max_iter={}",
            horizon.len(),
            predcorr::complementarity_count(ws),
            mu0,
            config.tol,
            config.max_iter
        );
    }

    let mut iters = 0;
    let status = loop {
        predcorr::compute_residuals(ws);
        let progress = measure(ws, mu);

        if config.verbose {
            log::debug!(
                "iter {:3}  mu {:.3e}  res_stat {:.3e}  res_dyn {:.3e}  res_ineq {:.3e}",
                iters,
                progress.mu,
                progress.res_stat,
                progress.res_dyn,
                progress.res_ineq
            );
        }

        if let Some(status) = check_termination(config, iters, &progress) {
            break status;
        }

        match predcorr::step(ws, mu, config.sigma_min) {
            Ok(stats) => {
                iters += 1;
                mu = stats.mu;
                ws.stats.push(stats);

                if config.verbose {
                    log::debug!(
                        "          sigma {:.3e}  alpha_aff {:.4}  mu_aff {:.3e}  alpha {:.4}",
                        stats.sigma,
                        stats.alpha_aff,
                        stats.mu_aff,
                        stats.alpha
                    );
                }

                if stats.alpha < config.min_step {
                    log::warn!(
                        "IPM: step length {:.3e} below minimum {:.1e} at iteration {}",
                        stats.alpha,
                        config.min_step,
                        iters
                    );
                    break SolveStatus::BelowMinStep;
                }
            }
            Err(e) => {
                log::warn!("IPM: {} at iteration {}", e, iters);
                break SolveStatus::BelowMinStep;
            }
        }
    };

    ws.write_trajectory(trajectory);

    predcorr::compute_residuals(ws);
    let progress = measure(ws, mu);

    log::info!(
        "IPM finished: {} after {} iterations (mu {:.3e}, residual {:.3e})",
        status,
        iters,
        mu,
        progress.res_stat.max(progress.res_dyn).max(progress.res_ineq)
    );

    let info = SolveInfo {
        iters,
        mu,
        res_stat: progress.res_stat,
        res_dyn: progress.res_dyn,
        res_ineq: progress.res_ineq,
        workspace_bytes: ws.bytes(),
        stats: ws.stats.clone(),
    };

    Ok((status, info))
}
