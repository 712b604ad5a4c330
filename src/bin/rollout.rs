//! Operator CLI for `rollout`.
//!
//! Drives the orchestrator against a YAML inventory and prints the progress
//! notifications as they are published:
//!
//! ```text
//! rollout --inventory fleet.yaml deploy --deployment 1 --artifact ./billing.jar
//! rollout --inventory fleet.yaml status --deployment 1
//! rollout --inventory fleet.yaml rollback --deployment 1 --ip 10.0.0.5 --app billing --timestamp 20240309070503
//! ```

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use rollout::configuration::get_configuration;
use rollout::db::{Inventory, MemoryStore};
use rollout::helpers::SshConnector;
use rollout::models::{DeploymentHistory, OperationReport};
use rollout::services::backup::SNAPSHOT_STAMP_FORMAT;
use rollout::services::{
    BroadcastHub, DeploymentOrchestrator, Notification, Severity, DEPLOY_CHANNEL, LINE_BREAK,
};
use rollout::telemetry::{get_subscriber, init_subscriber};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

#[derive(Parser, Debug)]
#[command(
    name = "rollout",
    version,
    about = "Deploy, start, stop and roll back applications across a server fleet"
)]
struct Cli {
    /// Inventory file with applications, servers and deployments
    /// (default: `inventory_path` from the configuration)
    #[arg(long, env = "ROLLOUT_INVENTORY", value_name = "FILE", global = true)]
    inventory: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload an artifact and redeploy it on every server of a deployment
    Deploy {
        #[arg(long)]
        deployment: i64,
        /// Local artifact file
        #[arg(long, value_name = "PATH")]
        artifact: PathBuf,
        /// Recorded in the backup history
        #[arg(long, env = "USER", default_value = "cli")]
        user: String,
    },
    /// Restart the application on every server of a deployment
    Start {
        #[arg(long)]
        deployment: i64,
    },
    /// Stop the application on every server of a deployment
    Stop {
        #[arg(long)]
        deployment: i64,
    },
    /// Report whether the application listens on every server
    Status {
        #[arg(long)]
        deployment: i64,
    },
    /// Restore a backup snapshot on one server
    Rollback {
        #[arg(long)]
        deployment: i64,
        /// Server holding the snapshot
        #[arg(long)]
        ip: String,
        #[arg(long)]
        app: String,
        /// Snapshot directory name, yyyyMMddHHmmss, as printed by the
        /// "Backing up current application to ..." line of a deploy
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: NaiveDateTime,
    },
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, SNAPSHOT_STAMP_FORMAT)
        .map_err(|err| format!("expected yyyyMMddHHmmss: {}", err))
}

fn render(notification: &Notification) -> String {
    let text = notification.text.replace(LINE_BREAK, "\n  ");
    match notification.severity {
        Severity::Info => text,
        Severity::Error => format!("ERROR: {}", text),
    }
}

/// Prints notifications until `done` fires, then flushes what is still queued.
async fn print_notifications(
    mut receiver: broadcast::Receiver<Notification>,
    mut done: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Ok(notification) => println!("{}", render(&notification)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification output lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut done => break,
        }
    }
    while let Ok(notification) = receiver.try_recv() {
        println!("{}", render(&notification));
    }
}

async fn execute(
    orchestrator: &DeploymentOrchestrator,
    command: Command,
) -> anyhow::Result<OperationReport> {
    let report = match command {
        Command::Deploy {
            deployment,
            artifact,
            user,
        } => orchestrator.deploy(&artifact, deployment, &user).await?,
        Command::Start { deployment } => {
            let deployment = orchestrator.resolve_deployment(deployment).await?;
            orchestrator.start_server(&deployment).await?
        }
        Command::Stop { deployment } => {
            let deployment = orchestrator.resolve_deployment(deployment).await?;
            orchestrator.stop_server(&deployment).await?
        }
        Command::Status { deployment } => {
            let deployment = orchestrator.resolve_deployment(deployment).await?;
            orchestrator.server_status(&deployment).await?
        }
        Command::Rollback {
            deployment,
            ip,
            app,
            timestamp,
        } => {
            let history = DeploymentHistory::new(app, String::new(), ip, deployment, timestamp);
            orchestrator.rollback(&history).await?
        }
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let subscriber = get_subscriber("rollout-cli".into(), "warn".into(), std::io::stderr);
    init_subscriber(subscriber)?;

    let cli = Cli::parse();
    let settings = get_configuration().context("Failed to read configuration.")?;
    let inventory_path = cli
        .inventory
        .or_else(|| settings.inventory_path.as_ref().map(PathBuf::from))
        .context("No inventory given, pass --inventory or set inventory_path")?;
    let store = Arc::new(MemoryStore::from_inventory(Inventory::load(&inventory_path)?));

    let hub = Arc::new(BroadcastHub::new(settings.deploy.notification_capacity));
    let orchestrator = DeploymentOrchestrator::new(
        store.clone(),
        store,
        Arc::new(SshConnector::new(
            settings.deploy.connect_timeout(),
            settings.deploy.command_timeout(),
        )),
        hub.clone(),
        settings.deploy.orchestrator_config(),
    );

    let (done_tx, done_rx) = oneshot::channel();
    let printer = tokio::spawn(print_notifications(hub.subscribe(DEPLOY_CHANNEL), done_rx));

    let result = execute(&orchestrator, cli.command).await;
    let _ = done_tx.send(());
    printer.await?;

    let report = result?;
    println!("{}", report.summary());
    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapshot_timestamps() {
        let parsed = parse_timestamp("20240309070503").unwrap();
        assert_eq!(parsed.format(SNAPSHOT_STAMP_FORMAT).to_string(), "20240309070503");
        assert!(parse_timestamp("2024-03-09").is_err());
    }

    #[test]
    fn renders_line_breaks_and_errors() {
        let line = render(&Notification::error("Server: web-1<br>Application: billing"));
        assert_eq!(line, "ERROR: Server: web-1\n  Application: billing");
    }

    #[test]
    fn cli_accepts_rollback_arguments() {
        let cli = Cli::try_parse_from([
            "rollout",
            "--inventory",
            "fleet.yaml",
            "rollback",
            "--deployment",
            "1",
            "--ip",
            "10.0.0.5",
            "--app",
            "billing",
            "--timestamp",
            "20240309070503",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Rollback { deployment: 1, .. }));
    }
}
