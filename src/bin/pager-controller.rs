//! pager-controller CLI: runs the alert controller against a manifest directory.

use clap::{Parser, Subcommand};
use pager_controller::alert::AlertReconciler;
use pager_controller::config::Config;
use pager_controller::controller::Controller;
use pager_controller::key::key_for;
use pager_controller::model::Alert;
use pager_controller::sink::TracingSink;
use pager_controller::source::DirectorySource;
use pager_controller::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pager-controller", about = "Reconcile Alert resources")]
struct Cli {
    /// Directory of alert manifests (overrides PAGER_MANIFEST_DIR)
    #[arg(long, global = true)]
    manifests: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller until interrupted
    Run {
        /// Number of worker loops
        #[arg(long)]
        workers: Option<usize>,
        /// Resync period in seconds (0 disables)
        #[arg(long)]
        resync: Option<u64>,
    },
    /// Load and validate manifests, then print their keys
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Let --manifests stand in for the required env var.
    let manifests = cli.manifests.clone();
    let mut config = Config::from_lookup(|name| match (name, &manifests) {
        ("PAGER_MANIFEST_DIR", Some(dir)) => Some(dir.display().to_string()),
        _ => std::env::var(name).ok(),
    })?;

    match cli.command {
        Command::Run { workers, resync } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(secs) = resync {
                config.resync_period = Duration::from_secs(secs);
            }
            config.validate()?;
            cmd_run(config).await
        }
        Command::Check => cmd_check(config).await,
    }
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "pager-controller".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let source = DirectorySource::<Alert>::new(&config.manifest_dir, config.poll_interval);
    let controller: Controller<Alert, _> = Controller::new(
        config.controller_config(),
        Arc::new(AlertReconciler::new()),
        Arc::new(TracingSink),
    );

    let ctrl = controller.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    controller.run(source).await?;
    Ok(())
}

async fn cmd_check(config: Config) -> anyhow::Result<()> {
    let source = DirectorySource::<Alert>::new(&config.manifest_dir, config.poll_interval);
    let alerts = source.load().await?;

    if alerts.is_empty() {
        println!("No alerts found in {}.", config.manifest_dir.display());
        return Ok(());
    }

    println!("{:<40}  {:<9}  MESSAGE", "KEY", "SEVERITY");
    println!("{}", "-".repeat(80));
    let mut invalid = 0usize;
    for alert in &alerts {
        match key_for(alert) {
            Ok(key) => println!(
                "{:<40}  {:<9}  {}",
                key.to_string(),
                alert.spec.severity.to_string(),
                alert.spec.message
            ),
            Err(e) => {
                invalid += 1;
                println!("{:<40}  {:<9}  {e}", "<invalid>", "-");
            }
        }
    }
    println!("\n{} alert(s)", alerts.len());

    if invalid > 0 {
        anyhow::bail!("{invalid} alert(s) have no valid identity");
    }
    Ok(())
}
