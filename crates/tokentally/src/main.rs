// SPDX-FileCopyrightText: 2026 Tokentally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokentally - hierarchical token usage and cost accounting.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod cost;
mod pricing;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokentally_config::model::TallyConfig;
use tokentally_core::TallyError;

/// Tokentally - hierarchical token usage and cost accounting.
#[derive(Parser, Debug)]
#[command(name = "tokentally", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colors.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Calculate the cost of a usage.
    Cost {
        #[arg(long)]
        model: String,
        #[arg(long)]
        provider: Option<String>,
        /// Input units.
        #[arg(long)]
        input: u64,
        /// Output units.
        #[arg(long)]
        output: u64,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the effective pricing table.
    Pricing {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Drive a synthetic multi-agent run and print its usage report.
    Simulate {
        /// Number of concurrent agents.
        #[arg(long, default_value_t = 3)]
        agents: usize,
        /// Model calls per agent.
        #[arg(long, default_value_t = 5)]
        calls: usize,
        /// Run id of the simulated run.
        #[arg(long, default_value = "sim-run")]
        run_id: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> TallyConfig {
    let loaded = match path {
        Some(path) => tokentally_config::load_and_validate_path(path),
        None => tokentally_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            tokentally_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref());
    if cli.plain {
        config.display.plain = true;
    }
    init_tracing(&config.session.log_level);
    tokentally_accounting::recording::register_metrics();
    tracing::debug!(session = %config.session.name, "config loaded");

    let result: Result<(), TallyError> = match cli.command {
        Some(Commands::Cost {
            model,
            provider,
            input,
            output,
            json,
        }) => cost::run_cost(&config, &model, provider.as_deref(), input, output, json),
        Some(Commands::Pricing { json }) => pricing::run_pricing(&config, json),
        Some(Commands::Simulate {
            agents,
            calls,
            run_id,
        }) => simulate::run_simulate(&config, agents, calls, &run_id).await,
        None => {
            println!("tokentally: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tokentally={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_cost_command() {
        let cli = Cli::parse_from([
            "tokentally", "cost", "--model", "gpt-4o", "--input", "100", "--output", "50",
        ]);
        match cli.command {
            Some(Commands::Cost {
                model,
                provider,
                input,
                output,
                json,
            }) => {
                assert_eq!(model, "gpt-4o");
                assert_eq!(provider, None);
                assert_eq!((input, output), (100, 50));
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::parse_from(["tokentally", "--plain", "simulate"]);
        assert!(cli.plain);
        match cli.command {
            Some(Commands::Simulate {
                agents,
                calls,
                run_id,
            }) => {
                assert_eq!((agents, calls), (3, 5));
                assert_eq!(run_id, "sim-run");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
