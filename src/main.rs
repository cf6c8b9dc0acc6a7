//! linux-mirrors CLI
//!
//! Usage:
//! - Sync everything enabled: `linux-mirrors sync --all`
//! - Sync some versions: `linux-mirrors sync --distribution debian --version bookworm`
//! - Show sync containers: `linux-mirrors status`
//! - Container logs: `linux-mirrors logs debian bookworm --tail 200`
//! - Remove exited containers: `linux-mirrors cleanup`
//! - Show configured distributions: `linux-mirrors list`

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linux_mirrors::config::env::{self, constants};
use linux_mirrors::domain::SyncResult;
use linux_mirrors::services::sync::container_name;
use linux_mirrors::{CliGateway, ContainerGateway, CoordinatorSettings, MirrorConfig, SyncCoordinator};

#[derive(Parser)]
#[command(name = "linux-mirrors", version, about = "Mirror APT and YUM repositories with containers")]
struct Cli {
    /// Config file (default: $LINUX_MIRRORS_CONFIG or ~/.config/linux-mirrors/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync distributions
    Sync {
        /// Every enabled distribution with its configured versions
        #[arg(long, conflicts_with = "distribution", required_unless_present = "distribution")]
        all: bool,

        #[arg(long, short = 'd')]
        distribution: Option<String>,

        /// Version to sync; repeatable, defaults to all configured versions
        #[arg(long = "version", value_name = "VERSION", requires = "distribution")]
        versions: Vec<String>,
    },
    /// Show sync containers
    Status,
    /// Print the logs of a sync container
    Logs {
        distribution: String,
        version: String,
        #[arg(long, default_value_t = constants::DEFAULT_LOG_TAIL)]
        tail: usize,
    },
    /// Remove exited sync containers
    Cleanup,
    /// Show configured distributions
    List,
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os("LINUX_MIRRORS_CONFIG").map(PathBuf::from))
        .unwrap_or_else(MirrorConfig::default_path)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let path = config_path(&cli);
    let mut config = MirrorConfig::load(&path)?;
    env::apply_overrides(&mut config);
    config.validate()?;
    info!(config = %path.display(), version = constants::VERSION, "linux-mirrors starting");

    if let Command::List = cli.command {
        print_distributions(&config);
        return Ok(ExitCode::SUCCESS);
    }

    let gateway: Arc<dyn ContainerGateway> = Arc::new(
        CliGateway::connect(&config.container_runtime, config.command_timeout())
            .await
            .context("Container runtime check failed")?,
    );

    match cli.command {
        Command::Sync {
            all,
            distribution,
            versions,
        } => {
            let settings = CoordinatorSettings::from_config(&config);
            let config = Arc::new(config);
            let coordinator = SyncCoordinator::new(config.clone(), gateway, settings);

            let cancel = coordinator.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping sync containers");
                    cancel.cancel();
                }
            });

            let results = match distribution {
                Some(name) if !all => {
                    let dist = config.distribution(&name)?;
                    if !dist.enabled {
                        println!("Distribution {} is disabled", name);
                    }
                    coordinator.sync_distribution(dist, Some(versions.as_slice())).await
                }
                _ => coordinator.sync_all().await,
            };

            print_results(&results);
            if results.iter().any(|r| !r.is_success()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Status => {
            let containers = gateway
                .list_containers(constants::CONTAINER_NAME_PREFIX)
                .await?;
            if containers.is_empty() {
                println!("No sync containers");
            }
            for c in containers {
                println!("{:<40} {:<10} {:<27} {}", c.name, c.state, c.created, c.id);
            }
        }
        Command::Logs {
            distribution,
            version,
            tail,
        } => {
            let logs = gateway
                .get_logs(&container_name(&distribution, &version), tail)
                .await?;
            print!("{}", logs);
        }
        Command::Cleanup => {
            let removed = gateway
                .cleanup_exited(constants::CONTAINER_NAME_PREFIX)
                .await?;
            println!("Removed {} exited container(s)", removed);
        }
        Command::List => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn print_distributions(config: &MirrorConfig) {
    for dist in config.distributions.values() {
        println!(
            "{:<12} {:<4} {:<9} {:<40} {}",
            dist.name,
            dist.repo_type,
            if dist.enabled { "enabled" } else { "disabled" },
            dist.versions.join(","),
            config.distribution_path(dist).display()
        );
    }
}

fn print_results(results: &[SyncResult]) {
    for r in results {
        let seconds = r.duration_ms() as f64 / 1000.0;
        match &r.error {
            Some(error) => println!(
                "{:<9} {}/{} ({:.1}s): {}",
                r.status.as_str(),
                r.distribution,
                r.version,
                seconds,
                error
            ),
            None => println!(
                "{:<9} {}/{} ({:.1}s)",
                r.status.as_str(),
                r.distribution,
                r.version,
                seconds
            ),
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    println!(
        "{} completed, {} failed",
        results.len() - failed,
        failed
    );
}
