//! rinzler — drive an autoscaling worker pool with synthetic load.
//!
//! # Usage
//!
//! ```text
//! rinzler load --jobs 200 --job-ms 250 --interval-ms 50
//! rinzler monitor --every-ms 500
//! rinzler --config rinzler.toml load --preheat
//! rinzler init-config rinzler.toml
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rinzler_core::RinzlerConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "rinzler",
    about = "Rinzler — self-sizing worker pool",
    version,
    propagate_version = true
)]
struct Cli {
    /// TOML config file with [engine] and [load] sections.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit synthetic jobs at a fixed rate and log the results.
    Load(LoadArgs),
    /// Same load, with a JSON pool snapshot printed on a fixed period.
    Monitor {
        #[command(flatten)]
        load: LoadArgs,
        /// Snapshot period in milliseconds.
        #[arg(long, default_value = "500")]
        every_ms: u64,
    },
    /// Write a scaffolded config file.
    InitConfig {
        /// Destination path.
        path: PathBuf,
    },
}

/// Overrides for the `[load]` and `[engine]` config sections.
#[derive(Args, Debug, Clone, Default)]
pub struct LoadArgs {
    /// Milliseconds between job submissions.
    #[arg(long)]
    pub interval_ms: Option<u64>,
    /// Busy-loop duration of each job in milliseconds.
    #[arg(long)]
    pub job_ms: Option<u64>,
    /// Number of jobs to submit.
    #[arg(long)]
    pub jobs: Option<u64>,
    /// Start at max capacity instead of a single worker.
    #[arg(long)]
    pub preheat: bool,
    /// Capacity ceiling.
    #[arg(long)]
    pub max_capacity: Option<usize>,
    /// Idle time before a worker is cooled down, in milliseconds.
    #[arg(long)]
    pub cooling_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rinzler=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RinzlerConfig::from_file(path)?,
        None => RinzlerConfig::default(),
    };

    match cli.command {
        Command::Load(args) => commands::load::run(&config, &args, None).await,
        Command::Monitor { load, every_ms } => {
            commands::load::run(&config, &load, Some(every_ms)).await
        }
        Command::InitConfig { path } => commands::init::init_config(&path),
    }
}
