// src/main.rs
mod app;
mod cert;
mod config;
mod discovery;
mod error;
mod kubeconfig;
mod remote;
mod types;
mod utils;

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use config::RotationConfig;
use error::AppError;
use tracing::error;

#[derive(Parser)]
#[command(
    version,
    about = "Zero-downtime rotation of Kubernetes, etcd and front-proxy CAs"
)]
pub struct Args {
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
    #[arg(short, long, global = true)]
    pub debug: bool,
    /// Also append log lines to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Verify API access, topology and SSH to every node. Changes nothing.
    Check {
        /// Also probe for passwordless sudo.
        #[arg(long)]
        sudo: bool,
    },
    /// Print the discovered control-plane topology.
    Discover,
    /// Back up, generate new CAs and roll them out node by node.
    Run {
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Push the backed-up trust material back to every node.
    Rollback {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

async fn dispatch(args: Args) -> Result<(), AppError> {
    let config = RotationConfig::load_from_file(&args.config)?;
    match args.command {
        Command::Check { sudo } => app::run_check(config, sudo).await,
        Command::Discover => app::run_discover(config).await,
        Command::Run { dry_run, yes } => app::run_rotation(config, dry_run, yes).await,
        Command::Rollback { dry_run, yes } => app::run_rollback(config, dry_run, yes).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = utils::logging::init(args.debug, args.log_file.as_deref()) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match dispatch(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
