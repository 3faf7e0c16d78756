//! Randomized optimality checks for the stage-wise solver.
//!
//! Rather than comparing against stored solutions, these tests verify the
//! first-order conditions of the returned trajectory directly: the cost
//! gradient must be orthogonal to every direction that keeps the dynamics
//! satisfied, and no feasible perturbation may lower the cost.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ocp_core::{solve, Horizon, OcpProblem, SolveStatus, SolverConfig, StageQp, Trajectory};

fn random_matrix(rng: &mut ChaCha8Rng, rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-1.0..1.0))
}

fn random_vector(rng: &mut ChaCha8Rng, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0))
}

/// Stage with a random positive definite Hessian over `[u; x]` and random
/// dynamics into a state of size `nx_next`.
fn random_stage(rng: &mut ChaCha8Rng, nx: usize, nu: usize, nx_next: usize) -> StageQp {
    let nv = nu + nx;
    let m = random_matrix(rng, nv, nv);
    let h = &m * m.transpose() + DMatrix::identity(nv, nv) * 0.5;

    let mut stage = StageQp::zeros(nx, nu, nx_next);
    stage.R = h.view((0, 0), (nu, nu)).clone_owned();
    stage.S = h.view((0, nu), (nu, nx)).clone_owned();
    stage.Q = h.view((nu, nu), (nx, nx)).clone_owned();
    stage.r = random_vector(rng, nu);
    stage.q = random_vector(rng, nx);
    stage.A = random_matrix(rng, nx_next, nx) * 0.8;
    stage.B = random_matrix(rng, nx_next, nu);
    stage.b = random_vector(rng, nx_next);
    stage
}

/// Horizon of `n` steps with stage sizes drawn at random.
fn random_horizon(rng: &mut ChaCha8Rng, n: usize) -> Horizon {
    let nx: Vec<usize> = (0..=n)
        .map(|k| if k == 0 { 0 } else { rng.gen_range(1..=4) })
        .collect();
    let stages = (0..=n)
        .map(|k| {
            let stage = if k < n {
                let nu = rng.gen_range(1..=3);
                random_stage(rng, nx[k], nu, nx[k + 1])
            } else {
                random_stage(rng, nx[k], 0, 0)
            };
            Arc::new(stage)
        })
        .collect();
    Horizon::new(stages).unwrap()
}

/// Total cost `Σ ½ vᵀHv + gᵀv` of a trajectory.
fn cost(horizon: &Horizon, traj: &Trajectory) -> f64 {
    (0..=horizon.len())
        .map(|k| {
            let s = horizon.stage(k);
            let x = &traj.x[k];
            let state = 0.5 * x.dot(&(&s.Q * x)) + s.q.dot(x);
            match traj.u.get(k) {
                Some(u) => {
                    state + 0.5 * u.dot(&(&s.R * u)) + u.dot(&(&s.S * x)) + s.r.dot(u)
                }
                None => state,
            }
        })
        .sum()
}

/// Directional derivative of the cost at `traj` along `dir`.
fn cost_slope(horizon: &Horizon, traj: &Trajectory, dir: &Trajectory) -> f64 {
    (0..=horizon.len())
        .map(|k| {
            let s = horizon.stage(k);
            let x = &traj.x[k];
            let gx = &s.Q * x + &s.q;
            match traj.u.get(k) {
                Some(u) => {
                    let gu = &s.R * u + &s.S * x + &s.r;
                    let gx = gx + s.S.transpose() * u;
                    gu.dot(&dir.u[k]) + gx.dot(&dir.x[k])
                }
                None => gx.dot(&dir.x[k]),
            }
        })
        .sum()
}

/// Direction driven by the control steps `du` that keeps the dynamics exact.
fn rollout(horizon: &Horizon, du: Vec<DVector<f64>>) -> Trajectory {
    let mut dir = Trajectory::zeros(&horizon.dims());
    for k in 0..horizon.len() {
        let s = horizon.stage(k);
        dir.x[k + 1] = &s.A * &dir.x[k] + &s.B * &du[k];
    }
    dir.u = du;
    dir
}

fn dynamics_violation(horizon: &Horizon, traj: &Trajectory) -> f64 {
    (0..horizon.len())
        .map(|k| {
            let s = horizon.stage(k);
            let pred = &s.b + &s.A * &traj.x[k] + &s.B * &traj.u[k];
            (pred - &traj.x[k + 1]).amax()
        })
        .fold(0.0, f64::max)
}

fn norm(traj: &Trajectory) -> f64 {
    traj.x
        .iter()
        .chain(traj.u.iter())
        .map(|v| v.norm_squared())
        .sum::<f64>()
        .sqrt()
}

#[test]
fn test_random_unconstrained_stationarity() {
    let mut rng = ChaCha8Rng::seed_from_u64(12345);
    let config = SolverConfig::new(1e-8, 10, 1e-8).unwrap();

    for trial in 0..20 {
        let n = rng.gen_range(1..=8);
        let horizon = random_horizon(&mut rng, n);
        let solution = solve(&horizon, &config).unwrap();

        assert_eq!(solution.status, SolveStatus::Success, "trial {}", trial);
        let traj = &solution.trajectory;
        assert!(dynamics_violation(&horizon, traj) < 1e-8, "trial {}", trial);

        for _ in 0..5 {
            let du = horizon.dims()[..n]
                .iter()
                .map(|d| random_vector(&mut rng, d.nu))
                .collect();
            let dir = rollout(&horizon, du);
            let slope = cost_slope(&horizon, traj, &dir);
            assert!(
                slope.abs() <= 1e-7 * (1.0 + norm(traj)) * norm(&dir),
                "trial {}: gradient not orthogonal to feasible direction ({:e})",
                trial,
                slope
            );
        }
    }
}

#[test]
fn test_random_initial_states_input_bounds() {
    let mut rng = ChaCha8Rng::seed_from_u64(54321);
    let config = SolverConfig::new(1e-8, 30, 1e-8).unwrap();
    let umax = 0.5;

    for trial in 0..10 {
        // inputs boxed, states free, no terminal set
        let mut problem = OcpProblem::mass_spring(0.5, 8, 3, 15, 3, 0, 0).unwrap();
        problem.x0 = random_vector(&mut rng, 8) * 2.0;
        let horizon = problem.build().unwrap();

        let solution = solve(&horizon, &config).unwrap();
        assert_eq!(solution.status, SolveStatus::Success, "trial {}", trial);

        let traj = &solution.trajectory;
        assert!(dynamics_violation(&horizon, traj) < 1e-7, "trial {}", trial);
        let x1 = problem.system.step(&problem.x0, &traj.u[0]);
        assert!((x1 - &traj.x[1]).amax() < 1e-7, "trial {}", trial);

        let base = cost(&horizon, traj);
        let pairs: usize = horizon.dims().iter().map(|d| 2 * d.nc()).sum();
        let slack = pairs as f64 * 1e-8 + 1e-9 * (1.0 + base.abs());
        for _ in 0..10 {
            // steer active controls back into the box
            let du: Vec<DVector<f64>> = traj
                .u
                .iter()
                .map(|u| {
                    DVector::from_fn(u.len(), |i, _| {
                        let d: f64 = rng.gen_range(-1.0..1.0);
                        if u[i] > umax - 1e-6 {
                            -d.abs()
                        } else if u[i] < -umax + 1e-6 {
                            d.abs()
                        } else {
                            d
                        }
                    })
                })
                .collect();

            let mut room = f64::INFINITY;
            for (u, d) in traj.u.iter().zip(&du) {
                for i in 0..u.len() {
                    if d[i] > 0.0 {
                        room = room.min((umax - u[i]) / d[i]);
                    } else if d[i] < 0.0 {
                        room = room.min((-umax - u[i]) / d[i]);
                    }
                }
            }
            let eps = (0.5 * room).min(1e-2);
            if eps < 1e-10 {
                continue;
            }

            let dir = rollout(&horizon, du);
            let mut moved = traj.clone();
            for (u, du) in moved.u.iter_mut().zip(&dir.u) {
                *u += du * eps;
            }
            for (x, dx) in moved.x.iter_mut().zip(&dir.x) {
                *x += dx * eps;
            }
            let perturbed = cost(&horizon, &moved);
            assert!(
                perturbed >= base - slack,
                "trial {}: feasible perturbation lowered the cost {} -> {}",
                trial,
                base,
                perturbed
            );
        }
    }
}
