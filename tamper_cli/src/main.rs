mod demo;

use clap::Parser;
use demo::DemoProgram;
use std::path::PathBuf;
use std::time::Instant;
use tamper_core::config::{ParallelizationSettings, SandboxKind, TamperConfig};
use tamper_core::{MutationEngine, RunSummary, passing_tests};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Walk the pipeline without executing any mutant.
    #[clap(long)]
    dry_run: bool,
    /// Stop testing a mutant as soon as one test kills it.
    #[clap(long)]
    fail_fast: bool,
    /// Worker count for every pool (0 = one per core).
    #[clap(short, long)]
    workers: Option<usize>,
    /// `fork` or `null`.
    #[clap(long)]
    sandbox: Option<SandboxKind>,
    /// Write the run summary as JSON to this path.
    #[clap(long, value_parser)]
    json: Option<PathBuf>,
}

fn load_config(config_file: Option<PathBuf>) -> Result<TamperConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            info!(path = ?config_path, "Loading configuration from specified path");
            TamperConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!(path = ?default_config_path, "No config file specified via CLI, loading default");
                TamperConfig::load_from_file(&default_config_path)
            } else {
                info!("No config file specified and default 'config.toml' not found, using built-in defaults");
                Ok(TamperConfig::default())
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    for mutant in &summary.mutants {
        println!(
            "{:<12} {:<44} {}  {}",
            format!("{:?}", mutant.status),
            mutant.id,
            mutant.location.as_deref().unwrap_or("-"),
            mutant.description
        );
        for test in &mutant.tests {
            println!(
                "             {:<12} {:>6} ms  distance {}  {:?}",
                test.test, test.running_time_ms, test.distance, test.status
            );
        }
    }
    println!();
    println!(
        "Mutants: {}, Killed: {}, Survived: {}, Not executed: {}, Score: {:.1}%",
        summary.total, summary.killed, summary.survived, summary.not_executed, summary.score
    );
    for survivor in summary.survivors() {
        println!(
            "Survived: {} ({})",
            survivor.id,
            survivor.location.as_deref().unwrap_or("unknown location")
        );
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config_file)?;

    if cli.dry_run {
        config.execution.dry_run = true;
    }
    if cli.fail_fast {
        config.execution.fail_fast = true;
    }
    if let Some(workers) = cli.workers {
        config.parallelization = ParallelizationSettings::with_workers(workers);
    }
    if let Some(sandbox) = cli.sandbox {
        config.execution.sandbox = sandbox;
    }
    info!(?config, "Effective configuration");

    let program = DemoProgram::build();
    let engine = MutationEngine::new(config, DemoProgram::runner());
    let start_time = Instant::now();

    let original_runs =
        engine.run_original_tests(&program.tests, &program.objects, &program.function_names)?;
    let tests = passing_tests(&original_runs);
    info!(
        tests = tests.len(),
        excluded = original_runs.len() - tests.len(),
        "Original tests finished"
    );

    let testees = program.discover_testees(&tests)?;
    let points = program.mutation_points(&testees);
    info!(
        mutation_points = points.len(),
        testees = testees.len(),
        "Discovered mutation points"
    );

    let results = engine.run_mutants(&points, &program.objects, &program.function_names)?;
    let summary = RunSummary::from_results(&results);
    print_summary(&summary);
    println!("Finished in {:.2?}.", start_time.elapsed());

    if let Some(path) = cli.json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write summary to {:?}: {}", path, e))?;
        info!(path = ?path, "Wrote JSON summary");
    }

    Ok(())
}
