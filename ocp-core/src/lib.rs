//! ocp-core: stage-structured optimal-control QPs
//!
//! This library formulates a discrete-time linear-quadratic optimal-control
//! problem (OCP) as a stage-structured QP and solves it with a
//! predictor-corrector interior point method.
//!
//! # Pipeline
//!
//! Data flows strictly forward through three components:
//!
//! - **Discretizer** ([`system`]): continuous LTI model → zero-order-hold
//!   discrete model (`A = expm(Ac Ts)`, `Ac B = (A − I) Bc`)
//! - **Problem Builder** ([`builder`]): discrete model, cost and constraints →
//!   a validated [`Horizon`] of `N + 1` stage QPs, with the initial state
//!   folded into stage 0
//! - **Solver Driver** ([`ipm`]): workspace sizing, Riccati-based
//!   predictor-corrector iterations, [`SolveStatus`]
//!
//! # Example
//!
//! ```no_run
//! use ocp_core::{solve, OcpProblem, SolverConfig};
//!
//! // 4 masses, 3 actuated, horizon 20, inputs and states boxed,
//! // all 8 terminal states pinned to zero.
//! let problem = OcpProblem::mass_spring(0.5, 8, 3, 20, 11, 0, 8)?;
//! let horizon = problem.build()?;
//!
//! let config = SolverConfig::new(1e-8, 10, 1e-8)?;
//! let solution = solve(&horizon, &config)?;
//!
//! println!("Status: {}", solution.status);
//! println!("u_0 = {}", solution.trajectory.u[0]);
//! # Ok::<(), ocp_core::OcpError>(())
//! ```
//!
//! # Layout
//!
//! Matrices are column-major [`nalgebra::DMatrix`]; the stage decision vector
//! is `[u; x]`, so box indices below `nu` address controls.

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // Problem constructors take every size

pub mod builder;
pub mod error;
pub mod ipm;
pub mod linalg;
pub mod problem;
pub mod system;

// Re-export main types
pub use builder::{
    BoxBounds, GeneralConstraints, OcpProblem, StageCost, TerminalConstraints, TerminalCost,
};
pub use error::{OcpError, OcpResult};
pub use ipm::workspace::{workspace_size, Workspace};
pub use ipm::{solve, solve_with};
pub use problem::{
    Horizon, IterStats, SolveInfo, SolveStatus, Solution, SolverConfig, StageDims, StageQp,
    Trajectory,
};
pub use system::{mass_spring_system, ContinuousSystem, DiscreteSystem};
