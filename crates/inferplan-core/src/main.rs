//! inferplan CLI — Find the cheapest serving configuration without GPUs.

use clap::{Parser, Subcommand};
use inferplan_core::config::PlanConfig;
use inferplan_core::report;
use inferplan_core::PlanExclusions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "inferplan",
    about = "Find the cheapest serving configuration without GPUs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for the cheapest configuration per device type.
    Optimize {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Override the search strategy from the config.
        #[arg(short, long)]
        strategy: Option<String>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Assemble a min-cost cluster plan for a concurrency target.
    Plan {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Aggregate concurrency the plan must reach.
        #[arg(short, long)]
        target_concurrency: u64,
        /// Plan assembler name.
        #[arg(short, long, default_value = "optimal")]
        planner: String,
        /// Comma-separated device types to exclude from the plan.
        #[arg(short = 'x', long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available search strategies and planners.
    ListStrategies,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Optimize {
            config,
            strategy,
            output,
        } => {
            let mut plan_config = load_config(&config);
            if let Some(strategy) = strategy {
                plan_config.search.strategy = strategy;
            }

            let result = inferplan_core::run_optimization(&plan_config).unwrap_or_else(|e| {
                eprintln!("Optimization failed: {}", e);
                std::process::exit(1);
            });
            println!("{}", report::format_report(&result));

            if let Some(output_path) = output {
                write_json(&output_path, &result);
            }
        }
        Commands::Plan {
            config,
            target_concurrency,
            planner,
            exclude,
            output,
        } => {
            let plan_config = load_config(&config);
            let mut exclusions = PlanExclusions::default();
            for device_type in exclude {
                exclusions.ban_device_type(device_type);
            }

            let (ranking, plan) = inferplan_core::plan_deployment(
                &plan_config,
                target_concurrency,
                &planner,
                &exclusions,
            )
            .unwrap_or_else(|e| {
                eprintln!("Planning failed: {}", e);
                std::process::exit(1);
            });
            println!("{}", report::format_report(&ranking));
            println!("{}", report::format_plan(&plan));

            if let Some(output_path) = output {
                write_json(&output_path, &plan);
            }
        }
        Commands::ListStrategies => {
            println!("Available search strategies:");
            for name in inferplan_search::available_strategies() {
                println!("  - {}", name);
            }
            println!("Available planners:");
            for name in inferplan_search::available_planners() {
                println!("  - {}", name);
            }
        }
    }
}

fn load_config(path: &PathBuf) -> PlanConfig {
    PlanConfig::from_file(path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    })
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing output: {}", e);
        std::process::exit(1);
    });
    std::fs::write(path, json).unwrap_or_else(|e| {
        eprintln!("Error writing output: {}", e);
        std::process::exit(1);
    });
    println!("Results written to {}", path.display());
}
