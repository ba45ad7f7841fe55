// SPDX-License-Identifier: GPL-3.0-only

use camera_worker::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-worker")]
#[command(about = "On-demand camera worker thread shared by camera sessions")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: <config dir>/camera-worker/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated camera sessions against one camera thread
    Simulate {
        /// Number of sessions opened at the same time
        #[arg(short, long, default_value = "4")]
        owners: usize,

        /// Tasks submitted by each session
        #[arg(short, long, default_value = "8")]
        tasks: usize,

        /// How many times all sessions open and close
        #[arg(short, long, default_value = "3")]
        rounds: usize,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::default_path);
    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };

    // Initialize logging
    // RUST_LOG wins over the config file, e.g. RUST_LOG=camera_worker=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Simulate {
            owners,
            tasks,
            rounds,
        } => cli::simulate(config, owners, tasks, rounds),
        Commands::Config => cli::show_config(&config, config_path.as_deref()),
    }
}
