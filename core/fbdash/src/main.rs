//! fbdash: headless build-farm dashboard.
//!
//! Launched without a subcommand it runs the dashboard core: single-instance
//! check, hand-off to a shadow copy in temp storage, then worker discovery,
//! access-list enforcement and (in the shadow) self-update from the brokerage.
//!
//! ## Subcommands
//!
//! - `workers`: resolve this host's pool and list live workers
//! - `policy`: show the access-list decision for this host
//! - `check-config`: print the resolved configuration and validate it

mod inspect;
mod logging;
mod run;

use clap::{Parser, Subcommand};
use fbdash_core::{load_config, LaunchMode, StorageConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fbdash")]
#[command(about = "Build farm dashboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Marks a shadow copy launched by the installed executable
    #[arg(long, hide = true, global = true)]
    shadow: bool,

    /// Run in place without a shadow copy (disables self-update)
    #[arg(long, global = true)]
    no_shadow: bool,

    /// Config file (default: ~/.fbdash/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List live workers in this host's pool
    Workers,

    /// Show the access-list decision for this host
    Policy,

    /// Print the resolved configuration and validate the brokerage path
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let storage = match StorageConfig::from_home() {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("fbdash: {}", e);
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(&storage.logs_dir());

    let config_path = cli.config.unwrap_or_else(|| storage.config_file());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Using default configuration");
            Default::default()
        }
    };

    let result = match cli.command {
        Some(Commands::Workers) => inspect::workers(&config),
        Some(Commands::Policy) => inspect::policy(&config),
        Some(Commands::CheckConfig) => inspect::check_config(&config, &config_path),
        None => run::run(
            LaunchMode::from_flags(cli.shadow, cli.no_shadow),
            storage,
            config,
            config_path,
        ),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fbdash failed");
        std::process::exit(1);
    }
}
