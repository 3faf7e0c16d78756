//! Riccati recursion for the stage-structured Newton system.
//!
//! Each interior point iteration solves the equality-constrained LQ problem
//!
//! ```text
//! minimize    Σ_k ½ dv_kᵀ H̃_k dv_k + g̃_kᵀ dv_k
//! subject to  dx_{k+1} = [B A]_k dv_k + r_dyn_k
//! ```
//!
//! where `H̃ = H + Jᵀ W J` carries the barrier terms. The backward sweep
//! builds the cost-to-go `½ dxᵀ P dx + pᵀ dx` stage by stage; the forward
//! sweep rolls out the feedback law `du = K dx + k`.
//!
//! The matrix part ([`factorize`]) depends only on `H̃`, so the corrector
//! reuses it and reruns only the vector part ([`solve`]).

use nalgebra::{Cholesky, Dyn};
use thiserror::Error;

use super::workspace::StageWork;
use crate::linalg::dense::Mat;

/// Diagonal shifts tried, relative to the block scale, when the control
/// block is not numerically positive definite.
const REGULARIZATION: [f64; 4] = [1e-12, 1e-10, 1e-8, 1e-6];

/// Smallest accepted pivot `L_ii²`, relative to the block scale.
const PIVOT_MIN: f64 = 1e-14;

/// Breakdown of the backward sweep.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiccatiError {
    #[error("control block at stage {stage} is not positive definite")]
    NotPositiveDefinite { stage: usize },
}

fn try_cholesky(m: Mat, scale: f64) -> Option<Cholesky<f64, Dyn>> {
    let chol = Cholesky::new(m)?;
    let ok = chol
        .l_dirty()
        .diagonal()
        .iter()
        .all(|&d| d.is_finite() && d * d > PIVOT_MIN * scale);
    if ok {
        Some(chol)
    } else {
        None
    }
}

/// Factor the control block of `m_mat`, regularizing if needed.
///
/// The factor is computed in the storage of the previous one. Only the
/// regularization retries allocate.
fn factor_control_block(sw: &mut StageWork, stage: usize) -> Result<(), RiccatiError> {
    let nu = sw.nu;
    let scale = (0..nu).fold(1.0_f64, |acc, i| acc.max(sw.m_mat[(i, i)].abs()));

    let mut buf = match sw.chol.take() {
        Some(chol) => chol.unpack_dirty(),
        None => Mat::zeros(nu, nu),
    };
    buf.copy_from(&sw.m_mat.view((0, 0), (nu, nu)));
    if let Some(chol) = try_cholesky(buf, scale) {
        sw.chol = Some(chol);
        return Ok(());
    }

    for eps in REGULARIZATION {
        let mut shifted = sw.m_mat.view((0, 0), (nu, nu)).clone_owned();
        for i in 0..nu {
            shifted[(i, i)] += eps * scale;
        }
        if let Some(chol) = try_cholesky(shifted, scale) {
            log::warn!(
                "Riccati: regularized control block at stage {} with shift {:.1e}",
                stage,
                eps * scale
            );
            sw.chol = Some(chol);
            return Ok(());
        }
    }

    Err(RiccatiError::NotPositiveDefinite { stage })
}

/// Backward sweep over the matrices: `P_k`, `K_k` and the control factor.
///
/// Expects `h_tilde` to be filled on every stage.
pub fn factorize(stages: &mut [StageWork]) -> Result<(), RiccatiError> {
    let n = stages.len() - 1;

    // Step 1: terminal cost-to-go
    {
        let last = &mut stages[n];
        let nx = last.nx;
        let nu = last.nu;
        last.m_mat.copy_from(&last.h_tilde);
        last.p_mat
            .copy_from(&last.h_tilde.view((nu, nu), (nx, nx)));
    }

    // Step 2: stages N-1 down to 0
    for k in (0..n).rev() {
        let (head, tail) = stages.split_at_mut(k + 1);
        let cur = &mut head[k];
        let next = &tail[0];
        let nu = cur.nu;
        let nx = cur.nx;

        // M = H̃ + [B A]ᵀ P⁺ [B A]
        cur.bat_p.gemm_tr(1.0, &cur.dyn_mat, &next.p_mat, 0.0);
        cur.m_mat.copy_from(&cur.h_tilde);
        cur.m_mat.gemm(1.0, &cur.bat_p, &cur.dyn_mat, 1.0);

        if nu > 0 {
            factor_control_block(cur, k)?;
        }

        if nx > 0 {
            // K = -Muu⁻¹ Mux
            cur.k_mat.copy_from(&cur.m_mat.view((0, nu), (nu, nx)));
            if let Some(chol) = &cur.chol {
                chol.solve_mut(&mut cur.k_mat);
            }
            cur.k_mat.neg_mut();

            // P = Mxx + Muxᵀ K
            cur.p_mat.copy_from(&cur.m_mat.view((nu, nu), (nx, nx)));
            cur.p_mat
                .gemm_tr(1.0, &cur.m_mat.view((0, nu), (nu, nx)), &cur.k_mat, 1.0);
            symmetrize(&mut cur.p_mat);
        }
    }

    Ok(())
}

fn symmetrize(p: &mut Mat) {
    let n = p.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (p[(i, j)] + p[(j, i)]);
            p[(i, j)] = avg;
            p[(j, i)] = avg;
        }
    }
}

/// Backward sweep over the vectors and forward rollout.
///
/// Uses `g_tilde` and `r_dyn` as right-hand sides and writes `dv` and
/// `dpi` on every stage. Requires a successful [`factorize`].
pub fn solve(stages: &mut [StageWork]) {
    let n = stages.len() - 1;

    {
        let last = &mut stages[n];
        let nu = last.nu;
        let nx = last.nx;
        last.m_vec.copy_from(&last.g_tilde);
        last.p_vec.copy_from(&last.g_tilde.rows(nu, nx));
    }

    for k in (0..n).rev() {
        let (head, tail) = stages.split_at_mut(k + 1);
        let cur = &mut head[k];
        let next = &tail[0];
        let nu = cur.nu;
        let nx = cur.nx;

        // m = g̃ + [B A]ᵀ (P⁺ r_dyn + p⁺)
        cur.tmp_nxn.copy_from(&next.p_vec);
        cur.tmp_nxn.gemv(1.0, &next.p_mat, &cur.r_dyn, 1.0);
        cur.m_vec.copy_from(&cur.g_tilde);
        cur.m_vec.gemv_tr(1.0, &cur.dyn_mat, &cur.tmp_nxn, 1.0);

        // k = -Muu⁻¹ m_u
        cur.k_ff.copy_from(&cur.m_vec.rows(0, nu));
        if let Some(chol) = &cur.chol {
            chol.solve_mut(&mut cur.k_ff);
        }
        cur.k_ff.neg_mut();

        // p = m_x + Muxᵀ k
        cur.p_vec.copy_from(&cur.m_vec.rows(nu, nx));
        cur.p_vec
            .gemv_tr(1.0, &cur.m_mat.view((0, nu), (nu, nx)), &cur.k_ff, 1.0);
    }

    // Forward rollout. Stage 0 has no free state, so dv_0 starts from k_0.
    for k in 0..n {
        let (head, tail) = stages.split_at_mut(k + 1);
        let cur = &mut head[k];
        let next = &mut tail[0];
        let nu = cur.nu;
        let nx = cur.nx;

        // du = K dx + k
        cur.tmp_nv.rows_mut(0, nu).copy_from(&cur.k_ff);
        cur.tmp_nv
            .rows_mut(0, nu)
            .gemv(1.0, &cur.k_mat, &cur.dv.rows(nu, nx), 1.0);
        cur.dv.rows_mut(0, nu).copy_from(&cur.tmp_nv.rows(0, nu));

        // dx⁺ = [B A] dv + r_dyn
        let (nu_next, nx_next) = (next.nu, next.nx);
        next.dv.rows_mut(nu_next, nx_next).copy_from(&cur.r_dyn);
        next.dv
            .rows_mut(nu_next, nx_next)
            .gemv(1.0, &cur.dyn_mat, &cur.dv, 1.0);

        // dπ = P⁺ dx⁺ + p⁺
        cur.dpi.copy_from(&next.p_vec);
        cur.dpi
            .gemv(1.0, &next.p_mat, &next.dv.rows(nu_next, nx_next), 1.0);
    }
}
