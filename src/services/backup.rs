//! Backup snapshots of deployed artifacts and their history rows.
//!
//! A snapshot lives at `<backupRoot>/<appName>/<yyyyMMddHHmmss>`. Rollback
//! recomputes that path from the history row, so the format must not change.

use chrono::{Local, NaiveDateTime, SubsecRound};
use std::sync::Arc;

use super::remote::RemoteShell;
use crate::db::HistoryStore;
use crate::errors::DeployError;
use crate::models::DeploymentHistory;

pub const SNAPSHOT_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const FILE_SEPARATOR: char = '/';

/// Appends `/` unless the path already ends with a separator.
pub fn with_trailing_separator(path: &str) -> String {
    if path.ends_with('/') || path.ends_with('\\') {
        path.to_string()
    } else {
        format!("{}{}", path, FILE_SEPARATOR)
    }
}

/// Directory holding the snapshot of `app_name` taken at `taken_at`.
/// Two snapshots of one app within the same second share a path.
pub fn snapshot_path(backup_root: &str, app_name: &str, taken_at: NaiveDateTime) -> String {
    format!(
        "{}{}{}{}",
        with_trailing_separator(backup_root),
        app_name,
        FILE_SEPARATOR,
        taken_at.format(SNAPSHOT_STAMP_FORMAT)
    )
}

/// Creates the snapshot directory and moves the live artifact into it.
pub fn backup_command(deploy_path: &str, app_name: &str, destination: &str) -> String {
    format!(
        "mkdir -p {destination} && mv -f {}{app_name} {destination}",
        with_trailing_separator(deploy_path)
    )
}

pub fn remove_command(deploy_path: &str, app_name: &str) -> String {
    format!("rm -rf {}{}", with_trailing_separator(deploy_path), app_name)
}

pub fn restore_command(snapshot: &str, deploy_path: &str) -> String {
    format!("cp -r {}/. {}", snapshot.trim_end_matches(FILE_SEPARATOR), deploy_path)
}

/// Current local time at the precision of a snapshot directory name.
pub fn snapshot_stamp() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

/// Everything needed to back up one live artifact.
#[derive(Debug, Clone, Copy)]
pub struct BackupRequest<'a> {
    pub ip: &'a str,
    pub deploy_path: &'a str,
    pub app_name: &'a str,
    pub backup_root: &'a str,
    pub deployment_id: i64,
    pub deploy_user: &'a str,
    pub taken_at: NaiveDateTime,
}

impl BackupRequest<'_> {
    /// Snapshot directory the artifact is moved into.
    pub fn destination(&self) -> String {
        snapshot_path(self.backup_root, self.app_name, self.taken_at)
    }
}

#[derive(Clone)]
pub struct BackupManager {
    history: Arc<dyn HistoryStore>,
}

impl BackupManager {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }

    /// Moves the live artifact into a fresh snapshot and records it.
    ///
    /// The move is destructive: afterwards nothing is left at
    /// `deploy_path/app_name`. The history row carries the exact timestamp used
    /// for the snapshot directory.
    #[tracing::instrument(name = "Back up application", skip(self, shell), fields(host = request.ip, app = request.app_name))]
    pub async fn backup(
        &self,
        shell: &dyn RemoteShell,
        request: BackupRequest<'_>,
    ) -> Result<DeploymentHistory, DeployError> {
        let destination = request.destination();
        let command = backup_command(request.deploy_path, request.app_name, &destination);

        tracing::info!("Backup command: {}", command);
        shell.execute(&command).await;

        let record = DeploymentHistory::new(
            request.app_name.to_string(),
            request.deploy_user.to_string(),
            request.ip.to_string(),
            request.deployment_id,
            request.taken_at,
        );
        self.history.create(record).await
    }

    /// Replaces the live artifact with the contents of `snapshot`.
    #[tracing::instrument(name = "Restore application", skip(self, shell), fields(host = shell.host()))]
    pub async fn restore(
        &self,
        shell: &dyn RemoteShell,
        snapshot: &str,
        deploy_path: &str,
        app_name: &str,
    ) {
        shell.execute(&remove_command(deploy_path, app_name)).await;
        shell.execute(&restore_command(snapshot, deploy_path)).await;
    }

    pub async fn find_history(&self, id: i64) -> Result<Option<DeploymentHistory>, DeployError> {
        self.history.find_by_id(id).await
    }
}
