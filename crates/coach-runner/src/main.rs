use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coach_runner::{
    logging, OperatorOptions, Orchestrator, OrchestratorError, RunnerConfig, StackStatus,
};
use coach_supervisor::{ClientConfig, SupervisorClient};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Installs, configures and starts the LibreCoach add-on stack.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Operator options document
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    /// Directory for the run record and credential files
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Supervisor API base URL
    #[arg(long, global = true)]
    supervisor_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Converge every service to its desired state (default)
    Converge {
        /// Generate a new broker credential pair and propagate it
        #[arg(long)]
        rotate_credentials: bool,

        /// Stay running after a successful convergence
        #[arg(long)]
        keep_alive: bool,
    },
    /// Show install and run state without changing anything
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let log_handle = logging::init();
    let cli = Cli::parse();

    let mut config = RunnerConfig::from_env();
    if let Some(path) = cli.options.clone() {
        config.options_path = path;
    }
    if let Some(dir) = cli.state_dir.clone() {
        config.state_dir = dir;
    }
    if let Some(url) = cli.supervisor_url.clone() {
        config.supervisor_url = url;
    }

    let options = OperatorOptions::load(&config.options_path, &config.settings_path);
    if let Ok(options) = &options {
        if let Err(e) = log_handle.set_debug(options.debug_logging) {
            warn!(error = %e, "could not apply debug_logging");
        }
    }

    let result = match options {
        Ok(options) => run(cli.command, config, options).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "coach-runner failed");
            if let Some(orchestrator_error) = e.downcast_ref::<OrchestratorError>() {
                eprintln!("\n{}\n", orchestrator_error.remediation());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Option<Command>, config: RunnerConfig, options: OperatorOptions) -> Result<()> {
    let mut client_config = ClientConfig::new(config.supervisor_url.clone())
        .with_request_timeout(config.request_timeout);
    if let Some(token) = &config.supervisor_token {
        client_config = client_config.with_token(token.clone());
    } else {
        warn!("SUPERVISOR_TOKEN is not set; control-plane calls will be rejected");
    }
    let client = SupervisorClient::new(client_config).context("Failed to create Supervisor client")?;

    let (rotate, keep_alive) = match command {
        Some(Command::Status) => {
            let orchestrator = Orchestrator::new(config, options, Arc::new(client))?;
            print_status(&orchestrator.status().await?);
            return Ok(());
        }
        Some(Command::Converge {
            rotate_credentials,
            keep_alive,
        }) => (rotate_credentials, keep_alive),
        None => (false, false),
    };

    let orchestrator =
        Orchestrator::new(config, options, Arc::new(client))?.rotate_credentials(rotate);
    let summary = orchestrator.run().await?;

    for report in &summary.reports {
        info!(service = %report.id, role = %report.role, state = %report.state, "Service summary");
    }
    for warning in &summary.warnings {
        warn!("{warning}");
    }

    if keep_alive {
        info!("Stack converged, staying alive until stopped");
        wait_for_shutdown().await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    info!("Shutdown requested");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    Ok(())
}

fn print_status(status: &StackStatus) {
    println!("{:<28} {:<10} {:<10} {}", "SERVICE", "INSTALLED", "STATE", "VERSION");
    for service in &status.services {
        println!(
            "{:<28} {:<10} {:<10} {}",
            service.id,
            service.is_installed(),
            service.run_state,
            service.version.as_deref().unwrap_or("-")
        );
    }
    match &status.record {
        Some(record) => println!(
            "\nmanaged: {} (coach {} at {})",
            record.managed,
            record.version,
            record.last_update.to_rfc3339()
        ),
        None => println!("\nmanaged: no run record"),
    }
    if status.rotation_pending {
        println!("credential rotation: pending");
    }
}
