//! barrage CLI - bounded parallel runner for test assemblies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use barrage::assembly::AssemblyInfo;
use barrage::config::{self, Strategy};
use barrage::executor::{ProcessExecutor, Scheduler, concurrency_limit};
use barrage::farm::FarmSubmitter;
use barrage::report::ConsoleReporter;

#[derive(Parser)]
#[command(name = "barrage")]
#[command(about = "Bounded parallel runner for test assemblies", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "barrage.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured assemblies
    Run {
        /// Force the concurrency bound to 1
        #[arg(long)]
        sequential: bool,

        /// Submit to the test farm instead of running locally
        #[arg(long)]
        farm: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { sequential, farm } => run(&cli.config, sequential, farm).await,
        Commands::Validate => validate(&cli.config),
        Commands::Init => init(&cli.config),
    }
}

async fn run(config_path: &Path, sequential: bool, farm: bool) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Flags override the configured mode.
    if sequential {
        config.barrage.sequential = true;
    }
    if farm {
        config.barrage.strategy = Strategy::Farm;
    }

    let assemblies: Vec<AssemblyInfo> = config
        .assemblies
        .iter()
        .map(|a| a.to_assembly_info())
        .collect();
    if assemblies.is_empty() {
        warn!("no assemblies configured");
    }

    let executor = Arc::new(ProcessExecutor::new(config.executor.clone()));

    let cancel = CancellationToken::new();
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    match config.barrage.strategy {
        Strategy::Local => {
            let limit = concurrency_limit(config.barrage.sequential);
            info!("running {} assemblies, bound {}", assemblies.len(), limit);

            let scheduler = Scheduler::new(Arc::clone(&executor), limit)
                .with_progress(ProgressBar::new_spinner());
            let result = scheduler.run_all(assemblies, cancel).await?;

            let reporter = ConsoleReporter::new(config.barrage.output_dir.clone());
            reporter.report(&result, executor.as_ref())?;

            std::process::exit(result.exit_code());
        }
        Strategy::Farm => {
            let submitter = FarmSubmitter::new(config.farm.clone(), Arc::clone(&executor))?;
            let result = submitter.run_all(&assemblies, cancel).await?;

            if let Some(build) = result.process_results.first() {
                for line in &build.stdout_lines {
                    println!("{line}");
                }
                for line in &build.stderr_lines {
                    eprintln!("{line}");
                }
            }
            if result.succeeded {
                info!("farm submission succeeded");
            } else {
                warn!("farm submission failed");
            }

            std::process::exit(result.exit_code());
        }
    }
}

fn validate(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let strategy = match config.barrage.strategy {
        Strategy::Local => "local",
        Strategy::Farm => "farm",
    };
    println!(
        "Configuration is valid: {} assemblies, {} strategy",
        config.assemblies.len(),
        strategy
    );
    Ok(())
}

fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    let starter = r#"[barrage]
sequential = false
strategy = "local"
output_dir = "test-logs"

[executor]
program = "dotnet"
base_args = ["exec", "testhost.dll"]
timeout_secs = 900

[farm]
manifest_path = "farm-run.proj"
build_program = "dotnet"
build_args = ["build"]

[[assemblies]]
path = "bin/Unit.Tests.dll"
"#;

    std::fs::write(config_path, starter)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote starter configuration to {}", config_path.display());
    Ok(())
}
