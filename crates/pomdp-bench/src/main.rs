use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pomdp_approx::CancellationToken;
use pomdp_bench::config::{ResolvedOutputs, RunConfig};
use pomdp_bench::logging::init_logging;
use pomdp_bench::runner::ApproximationRunner;

/// Belief-space approximation runner for POMDP properties.
#[derive(Debug, Parser)]
#[command(
    name = "pomdp-bench",
    author,
    version,
    about = "Bounds optimal POMDP values with grid and unfolding approximations"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "bench/run.yaml")]
    config: PathBuf,

    /// Override the run identifier (substitutes {run_id} templates).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Override the maximal number of refinement steps.
    #[arg(long, value_name = "STEPS")]
    refine_steps: Option<u64>,

    /// Override the goal precision of the refinement loop.
    #[arg(long, value_name = "EPSILON")]
    precision: Option<f64>,

    /// Override the time limit of each exploration pass.
    #[arg(long, value_name = "SECONDS")]
    time_limit_secs: Option<u64>,

    /// Exit after validating the configuration (no approximation is run).
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RunConfig::from_path(&cli.config)?;

    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    if let Some(steps) = cli.refine_steps {
        config.options.refine_step_limit = Some(steps);
    }

    if let Some(precision) = cli.precision {
        config.options.refine_precision = precision;
    }

    if let Some(seconds) = cli.time_limit_secs {
        config.options.exploration_time_limit_secs = Some(seconds);
    }

    config.validate()?;

    let outputs: ResolvedOutputs = config.resolved_outputs();
    let run_id = config.run_id.clone();
    println!(
        "Loaded configuration '{run_id}' ({:?} values, refinement {})",
        config.value_type,
        if config.options.refine { "on" } else { "off" }
    );

    let _logging_guard = init_logging(&config.logging, &outputs)?;
    let runner = ApproximationRunner::new(config, outputs)?;

    if cli.validate_only {
        println!("Validation-only mode: approximation skipped.");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling; finishing with the bounds found so far...");
        handler_token.cancel();
    })
    .context("installing Ctrl-C handler")?;

    let summary = runner.run(&cancel)?;
    let record = &summary.record;
    println!(
        "Approximation complete for '{run_id}': [{}, {}]{}",
        record.lower_bound,
        record.upper_bound,
        if record.aborted { " (cancelled)" } else { "" }
    );
    if let Some(steps) = record.refinement_steps {
        println!("Refinement steps: {steps}");
    }
    println!("Result: {}", summary.result_path.display());
    println!("Report: {}", summary.report_path.display());

    Ok(())
}
