//! patchup - self-updater for the translation installer
//!
//! Exit codes: 0 installer launched (or command succeeded), 1 nothing
//! runnable or the operation failed, 2 usage or configuration error.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use patchup_common::install_scan::{scan_install_folders, volume_roots};
use patchup_common::{ProcessLauncher, UpdateOrchestrator, UpdaterConfig};
use tracing::{error, info, warn};

use cli::{Cli, Commands};

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The log file location comes from the config, so warnings raised while
    // loading it go to stderr
    let config = match logging::scoped(cli.verbose, std::io::stderr, || load_config(&cli)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(EXIT_USAGE);
        }
    };

    let log_file = config.paths.log_file();
    if !logging::init(cli.verbose, Some(&log_file)) {
        warn!("Could not open {}, logging to stderr only", log_file.display());
    }
    info!("patchup v{} starting", env!("CARGO_PKG_VERSION"));

    let orchestrator = match UpdateOrchestrator::new(config, Box::new(ProcessLauncher))
        .context("Failed to initialise updater")
    {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    let code = match execute(cli.selected(), &orchestrator).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

fn load_config(cli: &Cli) -> Result<UpdaterConfig> {
    let mut config = UpdaterConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;
    if cli.no_relocate {
        config.relocate = false;
    }
    Ok(config)
}

async fn execute(command: Commands, orchestrator: &UpdateOrchestrator) -> Result<i32> {
    match command {
        Commands::Run => {
            let report = orchestrator.run().await;
            if let Some(path) = &report.launched {
                println!("{} {}", "Launched".green(), path.display());
            } else {
                println!("{} {}", "Not launched:".red(), report.exit);
            }
            Ok(report.exit_code())
        }

        Commands::Check => {
            let check = orchestrator.check_for_update().await;
            println!("installed: {}", check.installed);
            match &check.manifest {
                Some(manifest) => {
                    println!("online:    {}", manifest.version);
                    println!("update:    {}", check.update_needed);
                    Ok(EXIT_OK)
                }
                None => {
                    println!("online:    {}", "unavailable".yellow());
                    Ok(EXIT_FAILED)
                }
            }
        }

        Commands::Fetch => {
            let check = orchestrator.check_for_update().await;
            let Some(manifest) = check.manifest else {
                println!("{}", "No update information available".yellow());
                return Ok(EXIT_FAILED);
            };
            if !check.update_needed {
                println!("Installer {} is up to date", manifest.version);
                return Ok(EXIT_OK);
            }
            let artifact = orchestrator
                .fetch_update(&manifest)
                .await
                .with_context(|| format!("Failed to fetch installer {}", manifest.version))?;
            println!("{} {}", "Fetched".green(), artifact.path.display());
            Ok(EXIT_OK)
        }

        Commands::Launch => {
            let version = orchestrator.installed_version();
            let path = orchestrator
                .launch_version(&version)
                .with_context(|| format!("Failed to launch installer {}", version))?;
            println!("{} {}", "Launched".green(), path.display());
            Ok(EXIT_OK)
        }

        Commands::Installed => {
            println!("{}", orchestrator.installed_version());
            Ok(EXIT_OK)
        }

        Commands::Scan { roots } => {
            let roots = if roots.is_empty() { volume_roots() } else { roots };
            let found = scan_install_folders(roots, &orchestrator.config().scan).await;
            for candidate in found.values() {
                println!("{}\t{}", candidate.name, candidate.path.display());
            }
            Ok(EXIT_OK)
        }
    }
}
