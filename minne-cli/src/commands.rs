use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use minne_config::MinneConfig;
use minne_core::zone::ZoneSnapshot;
use minne_telemetry::{log_zone_report, MetricsRecorder};
use tracing::info;

use crate::setup::build_context;
use crate::simulate;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/minne.yaml` plus overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration, then print it
    Validate,
    /// Build the memory context and print its zone table
    Zones,
    /// Run a multi-threaded allocation workload against the configured zones
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    pub threads: Option<usize>,
    /// Iterations per worker
    #[arg(long, default_value_t = 10_000)]
    pub iterations: usize,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Print Prometheus metrics when done
    #[arg(long)]
    pub metrics: bool,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<MinneConfig> {
    match path {
        Some(path) => MinneConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display())),
        None => MinneConfig::load().context("loading configuration"),
    }
}

pub fn run_command(command: Commands, config: MinneConfig) -> anyhow::Result<()> {
    match command {
        Commands::Validate => {
            print!("{}", serde_yaml::to_string(&config)?);
            info!(zones = config.zones.len(), "Configuration is valid");
            Ok(())
        }
        Commands::Zones => {
            let context = build_context(&config);
            print_zone_table(&context.registry().snapshots());
            Ok(())
        }
        Commands::Simulate(args) => run_simulation(&config, &args),
    }
}

fn run_simulation(config: &MinneConfig, args: &SimulateArgs) -> anyhow::Result<()> {
    let context = build_context(config);
    let metrics = if config.telemetry.metrics || args.metrics {
        Some(MetricsRecorder::new()?)
    } else {
        None
    };

    let report = simulate::run(&context, config, args)?;
    log_zone_report(&report.snapshots);
    info!(
        workers = report.workers,
        allocations = report.allocations,
        samples = report.samples,
        pool_exhaustions = report.pool_exhaustions,
        "Simulation finished"
    );

    if let Some(metrics) = metrics {
        metrics.record_zones(&report.snapshots);
        metrics.pool_exhaustions.inc_by(report.pool_exhaustions);
        if args.metrics {
            print!("{}", metrics.gather_metrics()?);
        }
    }
    Ok(())
}

fn print_zone_table(snapshots: &[ZoneSnapshot]) {
    println!("{:>5}  {:<31}  {:>14}  policy", "id", "name", "budget");
    for zone in snapshots {
        let budget = if zone.budget.is_unlimited() {
            "unlimited".to_string()
        } else {
            zone.budget.bytes.to_string()
        };
        println!(
            "{:>5}  {:<31}  {:>14}  {:?}",
            zone.id, zone.name, budget, zone.budget.policy
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simulate_flags() {
        let cli = Cli::parse_from([
            "minne",
            "simulate",
            "--threads",
            "3",
            "--iterations",
            "50",
            "--seed",
            "9",
            "--metrics",
            "--config",
            "custom.yaml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.threads, Some(3));
                assert_eq!(args.iterations, 50);
                assert_eq!(args.seed, 9);
                assert!(args.metrics);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("no/such/minne.yaml"))).unwrap_err();
        assert!(err.to_string().contains("no/such/minne.yaml"));
    }

    #[test]
    fn simulate_command_runs_with_defaults() {
        let args = SimulateArgs {
            threads: Some(2),
            iterations: 100,
            seed: 1,
            metrics: false,
        };
        run_command(Commands::Simulate(args), MinneConfig::default()).unwrap();
    }
}
