//! Benchmarking CLI for the batched LCP solver.

mod problems;
mod strategy_choice;

use std::time::Instant;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use lcp_core::{forward, LcpSettings, Verbosity, DEFAULT_VERIFY_TOL};
use log::info;
use nalgebra::DVector;

use problems::{contact_batch, BatchShape};
use strategy_choice::StrategyChoice;

#[derive(Parser, Debug)]
#[command(name = "lcp-bench", about = "Benchmarks for the batched differentiable LCP solver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Solver strategy
    #[arg(long, value_enum, default_value = "pdipm-batched")]
    solver: StrategyChoice,

    /// Maximum Newton iterations
    #[arg(long, default_value_t = 10)]
    max_iter: usize,

    /// Convergence tolerance
    #[arg(long, default_value_t = 1e-12)]
    eps: f64,

    /// Log level: -1 silent, 0 warnings, 1 per-iteration trace
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    verbose: i32,

    /// Minimum batch size for parallel processing
    #[arg(long, default_value_t = 4)]
    min_parallel: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Benchmark one batch shape
    Run {
        #[arg(long, default_value_t = 64)]
        batch: usize,
        #[arg(long, default_value_t = 12)]
        nz: usize,
        #[arg(long, default_value_t = 8)]
        nineq: usize,
        #[arg(long, default_value_t = 0)]
        neq: usize,
        #[arg(long, default_value_t = 12345)]
        seed: u64,
        /// Number of timed repetitions
        #[arg(long, default_value_t = 3)]
        repeats: usize,
    },
    /// Benchmark a fixed set of shapes
    Sweep {
        #[arg(long, default_value_t = 12345)]
        seed: u64,
    },
}

struct BenchResult {
    forward_ms: f64,
    backward_ms: f64,
    iterations: usize,
    max_residual: f64,
    verified: bool,
}

fn run_once(shape: BatchShape, seed: u64, settings: &LcpSettings) -> Result<BenchResult> {
    let prob = contact_batch(shape, seed);

    let start = Instant::now();
    let session = forward(prob, settings).context("forward solve failed")?;
    let forward_ms = start.elapsed().as_secs_f64() * 1000.0;

    let iterations = session.info().iterations;
    let max_residual = session.info().max_residual();
    let verified = session.verify(DEFAULT_VERIFY_TOL).passed();

    let dl_dz = vec![DVector::from_element(shape.nz, 1.0); shape.batch];
    let start = Instant::now();
    session.backward(&dl_dz).context("backward solve failed")?;
    let backward_ms = start.elapsed().as_secs_f64() * 1000.0;

    Ok(BenchResult { forward_ms, backward_ms, iterations, max_residual, verified })
}

fn run_benchmark(name: &str, shape: BatchShape, seed: u64, repeats: usize, settings: &LcpSettings) -> Result<()> {
    ensure!(repeats > 0, "repeats must be at least 1");

    println!("\n{}", "=".repeat(60));
    println!("{}", name);
    println!("{}", "=".repeat(60));
    println!("Batch:            {}", shape.batch);
    println!("Variables (nz):   {}", shape.nz);
    println!("Inequalities:     {}", shape.nineq);
    println!("Equalities:       {}", shape.neq);
    println!();

    let mut results = Vec::with_capacity(repeats);
    for r in 0..repeats {
        let res = run_once(shape, seed, settings)?;
        info!("repeat {}: forward {:.3} ms, backward {:.3} ms", r, res.forward_ms, res.backward_ms);
        results.push(res);
    }

    let n = results.len() as f64;
    let fwd = results.iter().map(|r| r.forward_ms).sum::<f64>() / n;
    let bwd = results.iter().map(|r| r.backward_ms).sum::<f64>() / n;
    let last = &results[results.len() - 1];

    println!("Iterations:       {}", last.iterations);
    println!("Max residual:     {:.6e}", last.max_residual);
    println!("Verified:         {}", if last.verified { "yes" } else { "NO" });
    println!("Forward time:     {:.3} ms", fwd);
    println!("Backward time:    {:.3} ms", bwd);
    println!("Time/instance:    {:.3} ms", (fwd + bwd) / shape.batch as f64);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match Verbosity::from_level(cli.verbose) {
        Verbosity::Silent => "error",
        Verbosity::Warnings => "warn",
        Verbosity::Iterations => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = LcpSettings {
        eps: cli.eps,
        max_iter: cli.max_iter,
        verbose: Verbosity::from_level(cli.verbose),
        strategy: cli.solver.into(),
        min_batch_for_parallel: cli.min_parallel,
        ..LcpSettings::default()
    };
    settings.validate()?;

    println!("LCP Solver Benchmarks");
    println!("=====================");

    match cli.command.unwrap_or(Command::Sweep { seed: 12345 }) {
        Command::Run { batch, nz, nineq, neq, seed, repeats } => {
            let shape = BatchShape { batch, nz, nineq, neq };
            let name = format!("Contact batch (B={}, nz={}, nineq={}, neq={})", batch, nz, nineq, neq);
            run_benchmark(&name, shape, seed, repeats, &settings)?;
        }
        Command::Sweep { seed } => {
            let shapes = [
                ("Small contacts", BatchShape { batch: 16, nz: 6, nineq: 4, neq: 0 }),
                ("Medium contacts", BatchShape { batch: 64, nz: 12, nineq: 8, neq: 0 }),
                ("Large contacts", BatchShape { batch: 256, nz: 24, nineq: 16, neq: 0 }),
                ("Articulated (with joints)", BatchShape { batch: 64, nz: 18, nineq: 12, neq: 6 }),
            ];
            for (name, shape) in shapes {
                run_benchmark(name, shape, seed, 3, &settings)?;
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("Benchmarks complete");
    println!("{}", "=".repeat(60));
    Ok(())
}
