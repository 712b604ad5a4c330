//! Fleet deployment orchestrator.
//!
//! Sequences remote sessions, artifact transfer, backups and liveness checks
//! for every target server of a deployment and reports progress on the
//! `deploy` notification channel.
//!
//! Missing records are fatal and abort the call before any host is touched.
//! Everything that goes wrong on a single host (unreachable, failed transfer,
//! application never came up) is recorded in that host's outcome and the
//! remaining hosts are still processed. There is no cross-server rollback.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::backup::{snapshot_path, snapshot_stamp, BackupManager, BackupRequest};
use super::locks::DeploymentLocks;
use super::notifier::{Notification, NotificationPublisher, DEPLOY_CHANNEL, LINE_BREAK};
use super::prober::{LivenessPolicy, ProcessStatusProber};
use super::remote::{connect_with_retry, RemoteSession, RemoteShell, RetryPolicy, SessionConnector};
use crate::db::{DeploymentRepository, HistoryStore};
use crate::errors::DeployError;
use crate::models::{
    Application, DeployTarget, Deployment, DeploymentHistory, DeploymentOutcome, Operation,
    OperationReport, TargetServer,
};

/// Timing and fan-out knobs of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub liveness: LivenessPolicy,
    /// Pause between the stop command and the confirming probe.
    pub stop_settle: Duration,
    pub connect_retry: RetryPolicy,
    /// Number of target servers handled at once; 1 processes them in order.
    pub max_parallel_servers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessPolicy::default(),
            stop_settle: Duration::from_secs(1),
            connect_retry: RetryPolicy::default(),
            max_parallel_servers: 1,
        }
    }
}

/// A deployment target together with its connection profile.
#[derive(Debug, Clone)]
struct ResolvedTarget {
    target: DeployTarget,
    profile: TargetServer,
}

/// Per-server progress: every line is published and kept in the outcome.
struct Transcript<'a> {
    notifier: &'a dyn NotificationPublisher,
    outcome: DeploymentOutcome,
}

impl<'a> Transcript<'a> {
    fn new(notifier: &'a dyn NotificationPublisher, server: &str, app: &str) -> Self {
        Self {
            notifier,
            outcome: DeploymentOutcome::new(server, app),
        }
    }

    fn info(&mut self, text: impl Into<String>) {
        self.push(Notification::info(text));
    }

    fn error(&mut self, text: impl Into<String>) {
        self.push(Notification::error(text));
    }

    fn push(&mut self, notification: Notification) {
        self.outcome.trail.push(notification.text.clone());
        self.notifier.publish(DEPLOY_CHANNEL, notification);
    }

    fn finish(mut self, success: bool) -> DeploymentOutcome {
        self.outcome.success = success;
        self.outcome
    }
}

fn headline(server: &str, app: &str) -> String {
    format!("Server: {}{}Application: {}", server, LINE_BREAK, app)
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

pub struct DeploymentOrchestrator {
    records: Arc<dyn DeploymentRepository>,
    connector: Arc<dyn SessionConnector>,
    notifier: Arc<dyn NotificationPublisher>,
    backups: BackupManager,
    prober: ProcessStatusProber,
    locks: DeploymentLocks,
    config: OrchestratorConfig,
}

impl DeploymentOrchestrator {
    pub fn new(
        records: Arc<dyn DeploymentRepository>,
        history: Arc<dyn HistoryStore>,
        connector: Arc<dyn SessionConnector>,
        notifier: Arc<dyn NotificationPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            records,
            connector,
            notifier,
            backups: BackupManager::new(history),
            prober: ProcessStatusProber::new(),
            locks: DeploymentLocks::new(),
            config,
        }
    }

    /// Ships `artifact` to every target server of the deployment and waits
    /// for the application to come up on each of them.
    #[tracing::instrument(name = "Deploy application", skip(self, artifact), fields(operation_id = %Uuid::new_v4(), artifact = %artifact.display()))]
    pub async fn deploy(
        &self,
        artifact: &Path,
        deployment_id: i64,
        deploy_user: &str,
    ) -> Result<OperationReport, DeployError> {
        let _guard = self.locks.acquire(deployment_id).await;

        let deployment = self.resolve_deployment(deployment_id).await?;
        let app = self.require_application(&deployment)?;
        if !artifact.is_file() {
            return Err(self.fatal(DeployError::configuration(format!(
                "Artifact not found: {}",
                artifact.display()
            ))));
        }
        let targets = self.resolve_targets(&deployment.targets).await?;

        let outcomes = self
            .for_each_target(targets, |target| {
                self.deploy_target(artifact, deployment_id, deploy_user, app, target)
            })
            .await;
        Ok(self.report(Operation::Deploy, outcomes))
    }

    /// Restarts the application on every target server.
    #[tracing::instrument(name = "Start application", skip(self, deployment), fields(operation_id = %Uuid::new_v4(), deployment_id = deployment.id))]
    pub async fn start_server(&self, deployment: &Deployment) -> Result<OperationReport, DeployError> {
        let _guard = self.locks.acquire(deployment.id).await;

        let app = self.require_application(deployment)?;
        let targets = self.resolve_targets(&deployment.targets).await?;

        let outcomes = self
            .for_each_target(targets, |target| self.start_target(app, target))
            .await;
        Ok(self.report(Operation::Start, outcomes))
    }

    /// Stops the application on every target server.
    #[tracing::instrument(name = "Stop application", skip(self, deployment), fields(operation_id = %Uuid::new_v4(), deployment_id = deployment.id))]
    pub async fn stop_server(&self, deployment: &Deployment) -> Result<OperationReport, DeployError> {
        let _guard = self.locks.acquire(deployment.id).await;

        let app = self.require_application(deployment)?;
        let targets = self.resolve_targets(&deployment.targets).await?;

        let outcomes = self
            .for_each_target(targets, |target| self.stop_target(app, target))
            .await;
        Ok(self.report(Operation::Stop, outcomes))
    }

    /// Reports whether the application listens on every target server.
    /// Read-only, so it does not wait for running operations.
    #[tracing::instrument(name = "Application status", skip(self, deployment), fields(operation_id = %Uuid::new_v4(), deployment_id = deployment.id))]
    pub async fn server_status(&self, deployment: &Deployment) -> Result<OperationReport, DeployError> {
        let app = self.require_application(deployment)?;
        let targets = self.resolve_targets(&deployment.targets).await?;

        let outcomes = self
            .for_each_target(targets, |target| self.status_target(app, target))
            .await;
        Ok(self.report(Operation::Status, outcomes))
    }

    /// Restores the snapshot referenced by `history` on its server and
    /// restarts the application.
    #[tracing::instrument(name = "Roll back application", skip(self, history), fields(operation_id = %Uuid::new_v4(), history_id = history.id, ip = %history.ip))]
    pub async fn rollback(&self, history: &DeploymentHistory) -> Result<OperationReport, DeployError> {
        let _guard = self.locks.acquire(history.deployment_id).await;

        let application = self
            .records
            .find_deployment(history.deployment_id)
            .await
            .map_err(|err| self.fatal(err))?
            .and_then(|deployment| deployment.application);
        let Some(app) = application else {
            return Err(self.fatal(DeployError::configuration(format!(
                "Application not found: {}",
                history.app_name
            ))));
        };
        let profile = self.server_profile(&history.ip).await?;
        let target = ResolvedTarget {
            target: DeployTarget {
                ip: profile.ip.clone(),
                name: profile.name.clone(),
            },
            profile,
        };
        let snapshot = snapshot_path(&app.backup_path, &history.app_name, history.deployed_at);

        let outcome = self.rollback_target(&app, history, &snapshot, target).await;
        Ok(self.report(Operation::Rollback, vec![outcome]))
    }

    /// Looks up the history row first, then rolls back to it.
    pub async fn rollback_by_id(&self, history_id: i64) -> Result<OperationReport, DeployError> {
        let history = self
            .backups
            .find_history(history_id)
            .await
            .map_err(|err| self.fatal(err))?
            .ok_or_else(|| {
                self.fatal(DeployError::configuration(format!(
                    "Deployment history not found: {}",
                    history_id
                )))
            })?;
        self.rollback(&history).await
    }

    /// Loads a deployment or fails with a configuration error.
    pub async fn resolve_deployment(&self, deployment_id: i64) -> Result<Deployment, DeployError> {
        self.records
            .find_deployment(deployment_id)
            .await
            .map_err(|err| self.fatal(err))?
            .ok_or_else(|| {
                self.fatal(DeployError::configuration(format!(
                    "Deployment not found: {}",
                    deployment_id
                )))
            })
    }

    fn require_application<'d>(&self, deployment: &'d Deployment) -> Result<&'d Application, DeployError> {
        deployment.application.as_ref().ok_or_else(|| {
            self.fatal(DeployError::configuration(format!(
                "Deployment {} has no application",
                deployment.id
            )))
        })
    }

    /// Every connection profile is resolved before any host is contacted.
    async fn resolve_targets(
        &self,
        targets: &[DeployTarget],
    ) -> Result<Vec<ResolvedTarget>, DeployError> {
        if targets.is_empty() {
            tracing::warn!("Deployment has no target servers");
        }
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let profile = self.server_profile(&target.ip).await?;
            resolved.push(ResolvedTarget {
                target: target.clone(),
                profile,
            });
        }
        Ok(resolved)
    }

    async fn server_profile(&self, ip: &str) -> Result<TargetServer, DeployError> {
        self.records
            .find_server_by_ip(ip)
            .await
            .map_err(|err| self.fatal(err))?
            .ok_or_else(|| {
                self.fatal(DeployError::configuration(format!(
                    "No server record for ip: {}",
                    ip
                )))
            })
    }

    /// Publishes a fatal error and hands it back for propagation.
    fn fatal(&self, err: DeployError) -> DeployError {
        tracing::error!("{}", err);
        self.notifier
            .publish(DEPLOY_CHANNEL, Notification::error(err.to_string()));
        err
    }

    fn report(&self, operation: Operation, outcomes: Vec<DeploymentOutcome>) -> OperationReport {
        let report = OperationReport::new(operation, outcomes);
        tracing::info!("{}", report.summary());
        report
    }

    /// Runs `run` for every target, at most `max_parallel_servers` at a time.
    /// Outcomes keep the order of `targets`.
    async fn for_each_target<F, Fut>(
        &self,
        targets: Vec<ResolvedTarget>,
        run: F,
    ) -> Vec<DeploymentOutcome>
    where
        F: FnMut(ResolvedTarget) -> Fut,
        Fut: Future<Output = DeploymentOutcome>,
    {
        stream::iter(targets)
            .map(run)
            .buffered(self.config.max_parallel_servers.max(1))
            .collect()
            .await
    }

    async fn open_session(
        &self,
        target: &ResolvedTarget,
        transcript: &mut Transcript<'_>,
    ) -> Option<Box<dyn RemoteSession>> {
        match connect_with_retry(self.connector.as_ref(), &target.profile, self.config.connect_retry)
            .await
        {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::error!(host = %target.profile.ip, "{}", err);
                let text = format!(
                    "{}{}Login failed: {}",
                    headline(&target.target.name, &transcript.outcome.app_name),
                    LINE_BREAK,
                    err
                );
                transcript.error(text);
                None
            }
        }
    }

    /// Settles, polls and publishes the final start result.
    async fn confirm_started(
        &self,
        shell: &dyn RemoteShell,
        app: &Application,
        server_label: &str,
        transcript: &mut Transcript<'_>,
    ) -> bool {
        let liveness = self
            .prober
            .wait_until_running(app.port, shell, &self.config.liveness)
            .await;

        let mut text = headline(server_label, &app.name);
        text.push_str(LINE_BREAK);
        if liveness.is_up() {
            text.push_str("Started successfully!");
            transcript.info(text);
        } else {
            let err = DeployError::LivenessTimeout {
                server: server_label.to_string(),
                app: app.name.clone(),
                attempts: liveness.attempts(),
            };
            tracing::warn!("{}", err);
            text.push_str("Failed to start!");
            transcript.error(text);
        }
        liveness.is_up()
    }

    async fn deploy_target(
        &self,
        artifact: &Path,
        deployment_id: i64,
        deploy_user: &str,
        app: &Application,
        target: ResolvedTarget,
    ) -> DeploymentOutcome {
        let mut transcript = Transcript::new(self.notifier.as_ref(), &target.target.name, &app.name);
        let Some(session) = self.open_session(&target, &mut transcript).await else {
            return transcript.finish(false);
        };

        let result = self
            .deploy_on(
                session.as_ref(),
                artifact,
                deployment_id,
                deploy_user,
                app,
                &target,
                &mut transcript,
            )
            .await;
        session.close().await;

        match result {
            Ok(up) => transcript.finish(up),
            Err(err) => {
                tracing::error!(host = %target.profile.ip, "{}", err);
                transcript.error(format!(
                    "{}{}Deployment failed: {}",
                    headline(&target.target.name, &app.name),
                    LINE_BREAK,
                    err
                ));
                transcript.finish(false)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn deploy_on(
        &self,
        session: &dyn RemoteSession,
        artifact: &Path,
        deployment_id: i64,
        deploy_user: &str,
        app: &Application,
        target: &ResolvedTarget,
        transcript: &mut Transcript<'_>,
    ) -> Result<bool, DeployError> {
        let shell = session.shell();
        let ip = target.profile.ip.as_str();

        let redeploy = self
            .prober
            .artifact_exists(shell, &app.deploy_path, &app.name)
            .await;
        for dir in [&app.upload_path, &app.backup_path, &app.deploy_path] {
            shell.execute(&format!("mkdir -p {}", dir)).await;
        }

        let msg = format!("Logged in to server: {}", ip);
        tracing::info!("{}", msg);
        transcript.info(msg);
        transcript.info(format!(
            "Uploading artifact to server: {}{}directory: {}, please wait...",
            ip, LINE_BREAK, app.upload_path
        ));
        session.put_file(artifact, &app.upload_path).await?;

        if redeploy {
            transcript.info("Stopping current application");
            self.prober.stop_process(app.port, shell).await;
            let request = BackupRequest {
                ip,
                deploy_path: &app.deploy_path,
                app_name: &app.name,
                backup_root: &app.backup_path,
                deployment_id,
                deploy_user,
                taken_at: snapshot_stamp(),
            };
            let destination = request.destination();
            transcript.info(format!("Backing up current application to {}", destination));
            match self.backups.backup(shell, request).await {
                Ok(record) => {
                    tracing::info!(history_id = record.id, snapshot = %destination, "Backup recorded")
                }
                Err(err) => {
                    tracing::error!("Backup history not saved: {}", err);
                    transcript.error(format!("Backup history not saved: {}", err));
                }
            }
        }

        transcript.info("Deploying application");
        shell.execute(&app.deploy_script).await;
        transcript.info(
            "Deployment in progress, wait for the result or check the status later",
        );

        Ok(self
            .confirm_started(shell, app, &target.target.name, transcript)
            .await)
    }

    async fn start_target(&self, app: &Application, target: ResolvedTarget) -> DeploymentOutcome {
        let mut transcript = Transcript::new(self.notifier.as_ref(), &target.target.name, &app.name);
        let Some(session) = self.open_session(&target, &mut transcript).await else {
            return transcript.finish(false);
        };
        let shell = session.shell();

        // Avoid a second instance fighting over the port.
        self.prober.stop_process(app.port, shell).await;
        transcript.info("Start command sent");
        shell.execute(&app.start_script).await;
        transcript.info("Application starting, wait for the result or check the status later");
        let up = self
            .confirm_started(shell, app, &target.target.name, &mut transcript)
            .await;

        session.close().await;
        transcript.finish(up)
    }

    async fn stop_target(&self, app: &Application, target: ResolvedTarget) -> DeploymentOutcome {
        let mut transcript = Transcript::new(self.notifier.as_ref(), &target.target.name, &app.name);
        let Some(session) = self.open_session(&target, &mut transcript).await else {
            return transcript.finish(false);
        };
        let shell = session.shell();

        let was_running = self.prober.is_running(app.port, shell).await;
        transcript.info("Stop command sent");
        self.prober.stop_process(app.port, shell).await;
        pause(self.config.stop_settle).await;
        let still_running = self.prober.is_running(app.port, shell).await;
        session.close().await;

        let mut text = headline(&target.target.name, &app.name);
        text.push_str(LINE_BREAK);
        if still_running {
            text.push_str("Stop failed!");
            transcript.error(text);
        } else if was_running {
            text.push_str("Stopped successfully!");
            transcript.info(text);
        } else {
            text.push_str("Already stopped");
            transcript.info(text);
        }
        transcript.finish(!still_running)
    }

    async fn status_target(&self, app: &Application, target: ResolvedTarget) -> DeploymentOutcome {
        let mut transcript = Transcript::new(self.notifier.as_ref(), &target.target.name, &app.name);
        let Some(session) = self.open_session(&target, &mut transcript).await else {
            return transcript.finish(false);
        };

        let running = self.prober.is_running(app.port, session.shell()).await;
        session.close().await;

        let mut text = headline(&target.target.name, &app.name);
        text.push_str(LINE_BREAK);
        if running {
            text.push_str("Running");
            transcript.info(text);
        } else {
            text.push_str("Stopped!");
            transcript.error(text);
        }
        transcript.finish(running)
    }

    async fn rollback_target(
        &self,
        app: &Application,
        history: &DeploymentHistory,
        snapshot: &str,
        target: ResolvedTarget,
    ) -> DeploymentOutcome {
        let mut transcript =
            Transcript::new(self.notifier.as_ref(), &target.target.name, &history.app_name);
        let Some(session) = self.open_session(&target, &mut transcript).await else {
            return transcript.finish(false);
        };
        let shell = session.shell();

        let msg = format!("Logged in to server: {}", target.profile.ip);
        tracing::info!("{}", msg);
        transcript.info(msg);
        transcript.info("Stopping current application");
        self.prober.stop_process(app.port, shell).await;
        transcript.info(format!("Restoring backup {}", snapshot));
        self.backups
            .restore(shell, snapshot, &app.deploy_path, &history.app_name)
            .await;
        transcript.info("Starting application");
        shell.execute(&app.start_script).await;
        transcript.info("Application starting, wait for the result or check the status later");
        let up = self
            .confirm_started(shell, app, &target.target.name, &mut transcript)
            .await;

        session.close().await;
        transcript.finish(up)
    }
}
