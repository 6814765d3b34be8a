//! # clusterpost-execution
//!
//! Runs one lifecycle operation for one job, or the queue daemon.
//!
//! ```bash
//! clusterpost-execution --job <id> --submit [-f]
//! clusterpost-execution --job <id> --status
//! clusterpost-execution --daemon
//! ```
//!
//! In single job mode this is what the remote bridge invokes on a peer over
//! ssh: the resulting job status goes to stdout, and anything on stderr means
//! failure, so logs only go to the log file.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clusterpost_core::config::ConfigManager;
use clusterpost_core::engine::{CommandRunner, SystemCommandRunner};
use clusterpost_core::logging;
use clusterpost_core::orchestration::LifecycleOrchestrator;
use clusterpost_core::queue::{LifecycleHandler, QueueManager, Scheduler};
use clusterpost_core::remote::{TokenProvisioner, TunnelSupervisor};
use clusterpost_core::store;

#[derive(Parser, Debug)]
#[command(name = "clusterpost-execution")]
#[command(about = "Submit, monitor, kill and delete cluster jobs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(group(
    ArgGroup::new("operation")
        .args(["submit", "status", "kill", "delete", "daemon"])
        .required(true)
        .multiple(false)
))]
struct Cli {
    /// Job document id
    #[arg(short, long, required_unless_present = "daemon")]
    job: Option<String>,

    /// Submit the job
    #[arg(long)]
    submit: bool,

    /// Refresh the job status
    #[arg(long)]
    status: bool,

    /// Kill the job
    #[arg(long)]
    kill: bool,

    /// Delete the job and its working directory
    #[arg(long)]
    delete: bool,

    /// Resubmit even if the job already ran
    #[arg(short, long, requires = "submit")]
    force: bool,

    /// Run the queue scheduler until SIGINT/SIGTERM
    #[arg(long, conflicts_with = "job")]
    daemon: bool,

    /// Directory containing clusterpost.yaml
    #[arg(long, env = "CLUSTERPOST_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.daemon {
        logging::init_structured_logging();
    } else {
        logging::init_file_logging();
    }

    let code = match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "clusterpost-execution failed");
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    };
    logging::shutdown_logging();
    code
}

async fn run(cli: Cli) -> Result<()> {
    let manager = ConfigManager::load_from_directory(cli.config_dir.clone())
        .context("loading configuration")?;
    let config = manager.config();
    info!(
        environment = manager.environment(),
        config_file = %manager.config_file().display(),
        "Configuration loaded"
    );

    let store = store::from_config(&config.store)?;
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let orchestrator = Arc::new(LifecycleOrchestrator::new(config, store.clone(), runner.clone()));

    if cli.daemon {
        return run_daemon(&manager, orchestrator, runner).await;
    }

    let job_id = cli.job.context("--job is required")?;
    if cli.delete {
        orchestrator.delete_job(&job_id).await?;
        println!("{{\"status\":\"Job deleted {job_id}\"}}");
        return Ok(());
    }

    let job = if cli.submit {
        orchestrator.submit_job(&job_id, cli.force).await?
    } else if cli.kill {
        orchestrator.kill_job(&job_id).await?
    } else {
        orchestrator.refresh_status(&job_id).await?
    };
    println!("{}", serde_json::to_string(&job.job_status)?);
    Ok(())
}

async fn run_daemon(
    manager: &ConfigManager,
    orchestrator: Arc<LifecycleOrchestrator>,
    runner: Arc<dyn CommandRunner>,
) -> Result<()> {
    let config = manager.config();
    let shutdown = install_shutdown_handler()?;

    let provisioner = TokenProvisioner::new(runner.clone(), &config.auth, &config.storage_dir);
    if config.auth.token_secret.is_empty() {
        warn!("auth.token_secret not set, execution server tokens not provisioned");
    } else {
        provisioner.provision_all(&config.execution_servers).await;
    }

    let queues = Arc::new(QueueManager::new());
    let handler: Arc<dyn LifecycleHandler> = orchestrator.clone();
    let mut scheduler = Scheduler::new(
        queues,
        handler,
        orchestrator.store().clone(),
        config.scheduler.clone(),
    )
    .with_tunnels(
        Arc::new(TunnelSupervisor::new(runner)),
        config.execution_servers.clone(),
    );
    if let Some(name) = &config.execution_server {
        scheduler = scheduler.with_execution_server(name.clone());
    }

    info!(
        execution_servers = orchestrator.servers().len(),
        worker_id = config.scheduler.worker_id,
        "Starting clusterpost daemon"
    );
    Arc::new(scheduler).run(shutdown).await;
    Ok(())
}

/// Cancelled on SIGTERM or SIGINT.
fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
        cancel.cancel();
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exactly_one_operation() {
        assert!(Cli::try_parse_from(["clusterpost-execution", "--job", "a", "--submit", "-f"]).is_ok());
        assert!(Cli::try_parse_from(["clusterpost-execution", "-j", "a", "--status"]).is_ok());
        assert!(Cli::try_parse_from(["clusterpost-execution", "--daemon"]).is_ok());

        assert!(Cli::try_parse_from(["clusterpost-execution", "--job", "a"]).is_err());
        assert!(Cli::try_parse_from(["clusterpost-execution", "--job", "a", "--kill", "--delete"]).is_err());
        assert!(Cli::try_parse_from(["clusterpost-execution", "--job", "a", "--kill", "-f"]).is_err());
        assert!(Cli::try_parse_from(["clusterpost-execution", "--submit"]).is_err());
    }
}
