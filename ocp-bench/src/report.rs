//! JSON run summary.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use ocp_core::{Solution, SolverConfig};
use serde::{Deserialize, Serialize};

/// Problem sizes of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSize {
    pub nx: usize,
    pub nu: usize,
    pub horizon: usize,
    pub nb: usize,
    pub ng: usize,
    pub ngn: usize,
    pub ts: f64,
}

/// Solver parameters of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverParams {
    pub tol: f64,
    pub max_iter: usize,
    pub min_step: f64,
    pub mu0: f64,
    pub sigma_min: f64,
}

impl From<&SolverConfig> for SolverParams {
    fn from(config: &SolverConfig) -> Self {
        Self {
            tol: config.tol,
            max_iter: config.max_iter,
            min_step: config.min_step,
            mu0: config.mu0,
            sigma_min: config.sigma_min,
        }
    }
}

/// Everything printed by a run, in machine-readable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub arch: String,
    pub os: String,
    pub problem: ProblemSize,
    pub solver: SolverParams,
    pub workspace_bytes: usize,
    /// Raw status code: 0 success, 1 iteration cap, 2 minimum step
    pub status_code: i32,
    pub status: String,
    pub iters: usize,
    pub mu: f64,
    pub reps: usize,
    pub avg_solve_ms: f64,
    /// Controls per stage
    pub u: Vec<Vec<f64>>,
    /// States per stage
    pub x: Vec<Vec<f64>>,
}

impl RunSummary {
    pub fn new(
        problem: ProblemSize,
        config: &SolverConfig,
        solution: &Solution,
        reps: usize,
        avg_solve_ms: f64,
    ) -> Self {
        let traj = &solution.trajectory;
        Self {
            arch: std::env::consts::ARCH.to_string(),
            os: std::env::consts::OS.to_string(),
            problem,
            solver: SolverParams::from(config),
            workspace_bytes: solution.info.workspace_bytes,
            status_code: solution.status.code(),
            status: solution.status.to_string(),
            iters: solution.info.iters,
            mu: solution.info.mu,
            reps,
            avg_solve_ms,
            u: traj.u.iter().map(|u| u.as_slice().to_vec()).collect(),
            x: traj.x.iter().map(|x| x.as_slice().to_vec()).collect(),
        }
    }

    /// Save to JSON file
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create file {}", path.as_ref().display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .with_context(|| format!("Failed to write JSON to {}", path.as_ref().display()))?;
        Ok(())
    }
}
