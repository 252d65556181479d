//! CLI for comparing sequential and grouped block execution.
//!
//! # Example
//!
//! ```bash
//! # Sweep conflict factors with the resource grouper
//! block-exec --accounts 1000 --transactions 10000 --block-size 500
//!
//! # A single run with sender grouping on 8 threads
//! block-exec --grouper sender --conflict-factor 0.5 --threads 8
//! ```

use block_exec::{
    BlockRunner, ExecutionResult, GroupedRunner, ResourceGrouper, SenderGrouper,
    SequentialRunner, Workload, WorkloadConfig,
};
use clap::{Parser, ValueEnum};
use eyre::{ensure, Result, WrapErr};
use group_executor::{ExecutorConfig, SerialGrouper, StateSnapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GrouperKind {
    /// Union of touched balance keys; never conflicts
    Resource,
    /// One group per sender; conflicts on shared recipients
    Sender,
    /// Everything serial
    Serial,
}

/// Grouped block execution benchmark
#[derive(Parser, Debug)]
#[command(name = "block-exec")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of accounts
    #[arg(short = 'a', long, default_value = "1000")]
    accounts: usize,

    /// Total number of transactions per run
    #[arg(short = 'n', long, default_value = "1000")]
    transactions: usize,

    /// Maximum transactions per block
    #[arg(short = 'b', long, default_value = "250")]
    block_size: usize,

    /// Conflict factor (0.0-1.0). When omitted, a range of factors is swept.
    #[arg(long)]
    conflict_factor: Option<f64>,

    /// Share of calls to undeployed contracts
    #[arg(long, default_value = "0.0")]
    unroutable_ratio: f64,

    /// Share of consensus calls
    #[arg(long, default_value = "0.0")]
    system_ratio: f64,

    /// Worker threads for the parallel phase. Defaults to available parallelism.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Grouping strategy
    #[arg(short = 'g', long, value_enum, default_value = "resource")]
    grouper: GrouperKind,

    /// Random seed for workload generation
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    ensure!(args.block_size > 0, "--block-size must be positive");

    let mut config = ExecutorConfig::default();
    if let Some(threads) = args.threads {
        ensure!(threads > 0, "--threads must be positive");
        config.num_threads = threads;
    }

    println!("=== Grouped Block Execution Benchmark ===\n");
    println!(
        "Configuration: {} accounts, {} transactions, {} per block, {} threads, {:?} grouper\n",
        args.accounts, args.transactions, args.block_size, config.num_threads, args.grouper
    );

    let factors = match args.conflict_factor {
        Some(factor) => {
            ensure!((0.0..=1.0).contains(&factor), "--conflict-factor must be in 0.0-1.0");
            vec![factor]
        }
        None => vec![0.0, 0.25, 0.5, 0.75, 1.0],
    };

    match args.grouper {
        GrouperKind::Resource => {
            run_benchmarks(&args, &factors, GroupedRunner::new(config, ResourceGrouper))
        }
        GrouperKind::Sender => {
            run_benchmarks(&args, &factors, GroupedRunner::new(config, SenderGrouper))
        }
        GrouperKind::Serial => {
            run_benchmarks(&args, &factors, GroupedRunner::new(config, SerialGrouper))
        }
    }
}

fn run_benchmarks(args: &Args, factors: &[f64], grouped: impl BlockRunner) -> Result<()> {
    let sequential = SequentialRunner::new();

    for &conflict_factor in factors {
        let workload = Workload::generate(WorkloadConfig {
            num_accounts: args.accounts,
            num_transactions: args.transactions,
            transactions_per_block: args.block_size,
            conflict_factor,
            unroutable_ratio: args.unroutable_ratio,
            system_ratio: args.system_ratio,
            seed: args.seed,
        });
        info!(conflict_factor, blocks = workload.blocks.len(), "workload generated");

        let (expected, baseline) = sequential
            .run(&workload)
            .wrap_err("sequential run failed")?;
        let (state, result) = grouped
            .run(&workload)
            .wrap_err_with(|| format!("{} run failed", grouped.name()))?;

        let label = format!("{:.0}% conflicts", conflict_factor * 100.0);
        print_row(&label, sequential.name(), &baseline, None);
        print_row("", grouped.name(), &result, Some(matches(&state, &expected)));
    }
    Ok(())
}

fn matches(state: &StateSnapshot, expected: &StateSnapshot) -> &'static str {
    if state == expected {
        "state matches"
    } else {
        "state differs"
    }
}

fn print_row(label: &str, runner: &str, result: &ExecutionResult, note: Option<&str>) {
    println!(
        "{:15} | {:10} | {:6} ok | {:5} failed | {:5} conflict | {:8.2} ms | {:9.0} tx/s{}",
        label,
        runner,
        result.successful,
        result.failed,
        result.conflicted,
        result.duration.as_secs_f64() * 1000.0,
        result.throughput(),
        note.map(|n| format!(" | {n}")).unwrap_or_default()
    );
}
