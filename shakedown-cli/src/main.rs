//! # shakedown
//!
//! Chaos runner for replicated SQL clusters.
//!
//! ## Commands
//!
//! - `run`: execute a plan against the configured cluster
//! - `validate`: check a config and plan without touching anything
//!
//! ## Example
//!
//! ```bash
//! # Check the inputs first
//! shakedown validate --config cluster.toml --plan plans/leader-loss.json
//!
//! # Run, giving stragglers an extra 30 seconds before abandoning them
//! shakedown run --config cluster.toml --plan plans/leader-loss.json --grace 30s
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{run, validate};
use shakedown_core::duration::parse_duration;

/// Chaos runner for replicated SQL clusters.
#[derive(Parser, Debug)]
#[command(name = "shakedown")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a plan against the configured cluster
    Run {
        /// Cluster config file (TOML)
        #[arg(long, short)]
        config: PathBuf,

        /// Plan file (JSON)
        #[arg(long, short)]
        plan: PathBuf,

        /// Extra time to wait for in-flight events after the plan's total
        /// time, e.g. "30s"; without it stragglers are abandoned at once
        #[arg(long)]
        grace: Option<String>,
    },

    /// Check a config and plan without touching the cluster
    Validate {
        /// Cluster config file (TOML)
        #[arg(long, short)]
        config: PathBuf,

        /// Plan file (JSON)
        #[arg(long, short)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            plan,
            grace,
        } => {
            let grace = grace
                .as_deref()
                .map(parse_duration)
                .transpose()
                .context("invalid --grace duration")?;
            run::run(&config, &plan, grace).await?;
        }
        Commands::Validate { config, plan } => {
            validate::run(&config, &plan)?;
        }
    }

    Ok(())
}
