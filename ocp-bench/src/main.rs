//! Benchmarking CLI for the mass-spring OCP.
//!
//! Builds the mass-spring chain problem, solves it `--reps` times with the
//! interior point solver and reports the solution and the average time.
//!
//! Usage:
//!   cargo run --release -p ocp-bench
//!   cargo run --release -p ocp-bench -- --nx 16 --nu 4 --horizon 40 --reps 100 --json run.json

mod report;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, Log, Metadata, Record};
use ocp_core::linalg::dense::Vector;
use ocp_core::{solve_with, OcpProblem, Solution, SolverConfig, Trajectory, Workspace};

use report::{ProblemSize, RunSummary};

#[derive(Parser)]
#[command(about = "Mass-spring OCP benchmark for the stage-wise interior point solver")]
struct Args {
    /// Number of states (even; nx/2 masses)
    #[arg(long, default_value_t = 8)]
    nx: usize,

    /// Number of actuated masses
    #[arg(long, default_value_t = 3)]
    nu: usize,

    /// Horizon length N
    #[arg(long, default_value_t = 20)]
    horizon: usize,

    /// Box-constrained inputs and states per interior stage
    #[arg(long, default_value_t = 11)]
    nb: usize,

    /// General constraints per stage
    #[arg(long, default_value_t = 0)]
    ng: usize,

    /// General constraints on the last stage
    #[arg(long, default_value_t = 8)]
    ngn: usize,

    /// Sampling time (s)
    #[arg(long, default_value_t = 0.5)]
    ts: f64,

    /// Exit tolerance
    #[arg(long, default_value_t = 1e-8)]
    tol: f64,

    /// Maximum number of iterations
    #[arg(long, default_value_t = 10)]
    max_iter: usize,

    /// Minimum step length
    #[arg(long, default_value_t = 1e-8)]
    min_step: f64,

    /// Initial barrier parameter (<= 0 derives it from the cost)
    #[arg(long, default_value_t = 0.0)]
    mu0: f64,

    /// Lower bound on the centering parameter
    #[arg(long, default_value_t = 1e-3)]
    sigma_min: f64,

    /// Number of timed solves
    #[arg(long, default_value_t = 1000)]
    reps: usize,

    /// Log every iteration (at debug level)
    #[arg(long)]
    verbose: bool,

    /// Write a JSON run summary to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

/// Writes solver log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    }
}

fn print_vectors(name: &str, vs: &[Vector]) {
    for (k, v) in vs.iter().enumerate() {
        let entries: Vec<String> = v.iter().map(|x| format!("{:9.5}", x)).collect();
        println!("  {}[{:3}] = [{}]", name, k, entries.join(" "));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let reps = args.reps.max(1);

    println!("OCP Solver Benchmark");
    println!("====================\n");
    println!(
        "Test problem: mass-spring system with {} masses and {} controls.",
        args.nx / 2,
        args.nu
    );
    println!(
        "MPC problem size: {} states, {} inputs, {} horizon length, {} two-sided box constraints, {} two-sided general constraints, {} two-sided general constraints on the last stage.",
        args.nx, args.nu, args.horizon, args.nb, args.ng, args.ngn
    );
    println!(
        "IP method parameters: predictor-corrector IP, double precision, {} maximum iterations, {:.1e} exit tolerance, {:.1e} minimum step length.",
        args.max_iter, args.tol, args.min_step
    );
    println!(
        "Build target: {} ({})\n",
        std::env::consts::ARCH,
        std::env::consts::OS
    );

    let problem = OcpProblem::mass_spring(
        args.ts, args.nx, args.nu, args.horizon, args.nb, args.ng, args.ngn,
    )
    .context("Failed to set up the mass-spring problem")?;
    let horizon = problem.build().context("Failed to build the stage QPs")?;

    let config = SolverConfig {
        tol: args.tol,
        max_iter: args.max_iter,
        min_step: args.min_step,
        mu0: args.mu0,
        sigma_min: args.sigma_min,
        warm_start: false,
        verbose: args.verbose,
    };
    config.validate().context("Invalid solver parameters")?;

    let mut workspace = Workspace::for_horizon(&horizon, &config)?;
    println!("Workspace size: {} bytes\n", workspace.bytes());

    let mut trajectory = Trajectory::zeros(&horizon.dims());
    let start = Instant::now();
    let (mut status, mut info) = solve_with(&horizon, &config, &mut trajectory, &mut workspace)?;
    for _ in 1..reps {
        (status, info) = solve_with(&horizon, &config, &mut trajectory, &mut workspace)?;
    }
    let avg_ms = start.elapsed().as_secs_f64() * 1e3 / reps as f64;

    println!(
        "Solver status: {} (code {}) after {} iterations, mu = {:.3e}\n",
        status,
        status.code(),
        info.iters,
        info.mu
    );
    if !status.is_success() {
        log::warn!("returned trajectory is the last iterate, not an optimum");
    }
    println!("u =");
    print_vectors("u", &trajectory.u);
    println!("\nx =");
    print_vectors("x", &trajectory.x);

    println!("\n{}", "=".repeat(60));
    println!("Average solution time over {} runs: {:.3} ms", reps, avg_ms);
    println!("{}", "=".repeat(60));

    if let Some(path) = &args.json {
        let solution = Solution {
            status,
            trajectory,
            info,
        };
        let size = ProblemSize {
            nx: args.nx,
            nu: args.nu,
            horizon: args.horizon,
            nb: args.nb,
            ng: args.ng,
            ngn: args.ngn,
            ts: args.ts,
        };
        RunSummary::new(size, &config, &solution, reps, avg_ms).save_json(path)?;
        println!("Summary written to {}", path.display());
    }

    Ok(())
}
