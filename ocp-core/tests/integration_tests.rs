//! End-to-end integration tests for the OCP solver.
//!
//! These tests run the full pipeline (discretize, build, solve) on the
//! mass-spring chain and check the solver contract: statuses, iteration
//! limits, feasibility of the returned trajectory.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use ocp_core::{
    mass_spring_system, solve, solve_with, GeneralConstraints, Horizon, OcpError, OcpProblem,
    SolveStatus, SolverConfig, StageCost, TerminalConstraints, Trajectory, Workspace,
};

fn scenario() -> OcpProblem {
    OcpProblem::mass_spring(0.5, 8, 3, 20, 11, 0, 8).unwrap()
}

fn config(max_iter: usize) -> SolverConfig {
    SolverConfig::new(1e-8, max_iter, 1e-8).unwrap()
}

/// Largest violation of `x_{k+1} = A_k x_k + B_k u_k + b_k` over the horizon.
fn dynamics_violation(horizon: &Horizon, traj: &Trajectory) -> f64 {
    let mut worst: f64 = 0.0;
    for k in 0..horizon.len() {
        let s = horizon.stage(k);
        let pred = &s.b + &s.A * &traj.x[k] + &s.B * &traj.u[k];
        worst = worst.max((pred - &traj.x[k + 1]).amax());
    }
    worst
}

/// Objective `Σ ½ vᵀHv + gᵀv` of a trajectory, constants of the folded
/// initial state excluded.
fn objective(horizon: &Horizon, traj: &Trajectory) -> f64 {
    let mut total = 0.0;
    for k in 0..=horizon.len() {
        let s = horizon.stage(k);
        let x = &traj.x[k];
        total += 0.5 * x.dot(&(&s.Q * x)) + s.q.dot(x);
        if let Some(u) = traj.u.get(k) {
            total += 0.5 * u.dot(&(&s.R * u)) + u.dot(&(&s.S * x)) + s.r.dot(u);
        }
    }
    total
}

fn is_finite(traj: &Trajectory) -> bool {
    traj.x.iter().chain(traj.u.iter()).all(|v| v.iter().all(|x| x.is_finite()))
}

#[test]
fn test_mass_spring_end_to_end() {
    let horizon = scenario().build().unwrap();
    let solution = solve(&horizon, &config(10)).unwrap();

    println!("\n=== Mass-spring OCP ===");
    println!("Status: {} after {} iterations", solution.status, solution.info.iters);
    for (k, u) in solution.trajectory.u.iter().enumerate() {
        println!("u[{:2}] = {:?}", k, u.as_slice());
    }
    println!("x[N] = {:?}", solution.trajectory.x[20].as_slice());

    assert_eq!(solution.status, SolveStatus::Success);
    assert!(solution.status.is_success());
    assert!(solution.info.iters <= 10);
    assert_eq!(solution.info.stats.len(), solution.info.iters);
    assert!(solution.info.mu <= 1e-8);

    let traj = &solution.trajectory;
    for u in &traj.u {
        assert!(u.amax() <= 0.5 + 1e-7, "control bound violated: {}", u.amax());
    }
    for x in &traj.x[1..] {
        assert!(x.amax() <= 4.0 + 1e-7, "state bound violated: {}", x.amax());
    }
    assert!(traj.x[20].amax() < 1e-6, "terminal state not at origin: {}", traj.x[20]);
    assert!(dynamics_violation(&horizon, traj) < 1e-7);

    // the input saturates somewhere: the bounds are active
    let peak = traj.u.iter().map(|u| u.amax()).fold(0.0, f64::max);
    assert!(peak > 0.49);
}

#[test]
fn test_bad_box_index_fails_before_solve() {
    let horizon = scenario().build().unwrap();
    let mut stages = horizon.stages().to_vec();
    // nu + nx = 11 at an interior stage
    Arc::make_mut(&mut stages[1]).idxb[0] = 11;

    let err = Horizon::new(stages).unwrap_err();
    println!("{}", err);
    assert!(matches!(err, OcpError::DimensionMismatch { stage: 1, .. }));
}

#[test]
fn test_iteration_cap() {
    let horizon = scenario().build().unwrap();
    let solution = solve(&horizon, &config(1)).unwrap();

    assert_eq!(solution.status, SolveStatus::MaxIterReached);
    assert!(!solution.status.is_success());
    assert_eq!(solution.status.code(), 1);
    assert_eq!(solution.info.iters, 1);
    assert!(is_finite(&solution.trajectory));
}

#[test]
fn test_minimum_step() {
    let horizon = scenario().build().unwrap();
    let config = SolverConfig {
        min_step: 0.9,
        max_iter: 10,
        ..Default::default()
    };
    let solution = solve(&horizon, &config).unwrap();

    println!("stats: {:?}", solution.info.stats);
    assert_eq!(solution.status, SolveStatus::BelowMinStep);
    assert_eq!(solution.status.code(), 2);
    assert!(solution.info.stats.last().unwrap().alpha < 0.9);
    assert!(is_finite(&solution.trajectory));
}

/// Solve the equality-constrained QP behind `horizon` as one dense KKT system.
fn dense_lq_solution(horizon: &Horizon) -> Vec<DVector<f64>> {
    let dims = horizon.dims();
    let n = horizon.len();
    let nv: Vec<usize> = dims.iter().map(|d| d.nu + d.nx).collect();
    let mut v_off = vec![0; n + 1];
    for k in 1..=n {
        v_off[k] = v_off[k - 1] + nv[k - 1];
    }
    let nz = v_off[n] + nv[n];
    let ne: usize = (1..=n).map(|k| dims[k].nx).sum();
    let dim = nz + ne;

    let mut kkt = DMatrix::zeros(dim, dim);
    let mut rhs = DVector::zeros(dim);
    let mut row = nz;
    for k in 0..=n {
        let s = horizon.stage(k);
        let (nu, nx) = (dims[k].nu, dims[k].nx);
        let o = v_off[k];
        kkt.view_mut((o, o), (nu, nu)).copy_from(&s.R);
        kkt.view_mut((o, o + nu), (nu, nx)).copy_from(&s.S);
        kkt.view_mut((o + nu, o), (nx, nu)).copy_from(&s.S.transpose());
        kkt.view_mut((o + nu, o + nu), (nx, nx)).copy_from(&s.Q);
        rhs.rows_mut(o, nu).copy_from(&(-&s.r));
        rhs.rows_mut(o + nu, nx).copy_from(&(-&s.q));

        if k < n {
            let nxn = dims[k + 1].nx;
            let next = v_off[k + 1] + dims[k + 1].nu;
            kkt.view_mut((row, o), (nxn, nu)).copy_from(&s.B);
            kkt.view_mut((row, o + nu), (nxn, nx)).copy_from(&s.A);
            kkt.view_mut((o, row), (nu, nxn)).copy_from(&s.B.transpose());
            kkt.view_mut((o + nu, row), (nx, nxn)).copy_from(&s.A.transpose());
            for i in 0..nxn {
                kkt[(row + i, next + i)] = -1.0;
                kkt[(next + i, row + i)] = -1.0;
            }
            rhs.rows_mut(row, nxn).copy_from(&(-&s.b));
            row += nxn;
        }
    }

    let z = kkt.lu().solve(&rhs).unwrap();
    (0..=n).map(|k| z.rows(v_off[k], nv[k]).clone_owned()).collect()
}

#[test]
fn test_unconstrained_matches_dense_kkt() {
    let (sys, _) = mass_spring_system(0.5, 4, 1).unwrap();
    let x0 = DVector::from_vec(vec![1.0, -0.5, 0.0, 0.3]);
    let mut problem = OcpProblem::new(sys, 6, x0);
    problem.cost = StageCost {
        Q: DMatrix::identity(4, 4),
        S: DMatrix::from_row_slice(1, 4, &[0.1, 0.0, -0.05, 0.0]),
        R: DMatrix::from_element(1, 1, 0.5),
        q: DVector::from_element(4, 0.1),
        r: DVector::from_element(1, -0.2),
    };
    let horizon = problem.build().unwrap();

    let solution = solve(&horizon, &config(5)).unwrap();
    assert_eq!(solution.status, SolveStatus::Success);
    assert!(solution.info.iters <= 2);

    let reference = dense_lq_solution(&horizon);
    let traj = &solution.trajectory;
    for k in 0..=horizon.len() {
        let nu = horizon.dims()[k].nu;
        let v = &reference[k];
        if k < horizon.len() {
            let err = (&traj.u[k] - v.rows(0, nu)).amax();
            assert!(err < 1e-8, "u[{}] differs by {}", k, err);
        }
        let err = (&traj.x[k] - v.rows(nu, horizon.dims()[k].nx)).amax();
        assert!(err < 1e-8, "x[{}] differs by {}", k, err);
    }
}

#[test]
fn test_warm_start_reaches_same_solution() {
    let horizon = scenario().build().unwrap();
    let cold = solve(&horizon, &config(50)).unwrap();
    assert_eq!(cold.status, SolveStatus::Success);

    let warm_config = SolverConfig {
        warm_start: true,
        ..config(50)
    };
    let mut traj = cold.trajectory.clone();
    let mut ws = Workspace::for_horizon(&horizon, &warm_config).unwrap();
    let (status, info) = solve_with(&horizon, &warm_config, &mut traj, &mut ws).unwrap();

    println!("cold {} iterations, warm {} iterations", cold.info.iters, info.iters);
    assert!(status.is_success());

    // mu <= tol per pair bounds the duality gap, not the primal distance
    let pairs: usize = horizon.dims().iter().map(|d| 2 * d.nc()).sum();
    let gap = pairs as f64 * 1e-8;
    let cold_obj = objective(&horizon, &cold.trajectory);
    let warm_obj = objective(&horizon, &traj);
    println!("objective cold {:.10}, warm {:.10}", cold_obj, warm_obj);
    assert!((cold_obj - warm_obj).abs() <= gap, "objectives differ beyond {:e}", gap);
    for k in 0..horizon.len() {
        assert!((&traj.u[k] - &cold.trajectory.u[k]).amax() < 1e-4);
    }
}

#[test]
fn test_canonical_initial_state_problem() {
    let (sys, x0) = mass_spring_system(0.5, 4, 1).unwrap();
    assert_eq!(x0.as_slice(), &[5.0, 10.0, 15.0, 20.0]);

    let mut problem = OcpProblem::new(sys, 10, x0.clone());
    problem.cost = StageCost {
        Q: DMatrix::identity(4, 4),
        S: DMatrix::zeros(1, 4),
        R: DMatrix::identity(1, 1),
        q: DVector::zeros(4),
        r: DVector::zeros(1),
    };
    let horizon = problem.build().unwrap();
    let solution = solve(&horizon, &config(10)).unwrap();

    assert_eq!(solution.status, SolveStatus::Success);
    // x[1] follows from the known initial state
    let x1 = problem.system.step(&x0, &solution.trajectory.u[0]);
    assert!((x1 - &solution.trajectory.x[1]).amax() < 1e-8);
}

#[test]
fn test_general_constraints() {
    // |u_0 + u_1| ≤ 0.3 at every stage, expressed through D. Pinning the
    // terminal state as well would make the problem infeasible.
    let mut problem = scenario();
    problem.terminal = TerminalConstraints::none(8);
    problem.general = GeneralConstraints {
        C: DMatrix::zeros(1, 8),
        D: DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 0.0]),
        lg: DVector::from_element(1, -0.3),
        ug: DVector::from_element(1, 0.3),
    };
    let horizon = problem.build().unwrap();
    assert_eq!(horizon.dims()[0].ng, 1);

    let solution = solve(&horizon, &config(50)).unwrap();
    println!("general constraints: {} in {} iterations", solution.status, solution.info.iters);
    assert_eq!(solution.status, SolveStatus::Success);
    for u in &solution.trajectory.u {
        assert!((u[0] + u[1]).abs() <= 0.3 + 1e-7);
    }
    assert!(dynamics_violation(&horizon, &solution.trajectory) < 1e-7);
}

#[test]
fn test_trajectory_shape_checked() {
    let horizon = scenario().build().unwrap();
    let config = config(10);
    let mut ws = Workspace::for_horizon(&horizon, &config).unwrap();
    let mut traj = Trajectory::zeros(&horizon.dims());
    traj.u.pop();
    assert!(solve_with(&horizon, &config, &mut traj, &mut ws).is_err());
}
