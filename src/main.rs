//! sortstash - cached spike sorting pipeline
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use sortstash::cli::{commands, Cli, Commands};
use sortstash::config::{Config, ConfigManager};
use sortstash::error::{StashError, StashResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let result = tokio::select! {
        result = run() => result,
        _ = tokio::signal::ctrl_c() => Err(StashError::Interrupted),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if matches!(e, StashError::Interrupted) {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run() -> StashResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions { shell } = cli.command {
        commands::completions(shell);
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| StashError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let mut config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    match &local_config_path {
        Some(path) => debug!("Using local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => {}
    }

    ConfigManager::override_cache_dir(&mut config, cli.cache_dir);

    match cli.command {
        Commands::Completions { .. } => unreachable!("Completions handled above"),
        Commands::Preprocess(args) => commands::preprocess(args, &config).await,
        Commands::Sort(args) => commands::sort(args, &config).await,
        Commands::Amplitudes(args) => commands::amplitudes(args, &config).await,
        Commands::Mode(args) => commands::mode(args).await,
        Commands::Probe(args) => commands::probe(args, &config).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug; `general.log_format =
/// "json"` switches to JSON lines
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("sortstash=warn"),
        1 => EnvFilter::new("sortstash=info"),
        _ => EnvFilter::new("sortstash=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
