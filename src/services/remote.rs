//! Remote execution boundary.
//!
//! The orchestrator only talks to hosts through these traits. Production uses
//! the russh-backed `helpers::SshConnector`; tests plug in scripted fakes.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::errors::DeployError;
use crate::models::TargetServer;

/// Command channel to one host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Host this session is bound to.
    fn host(&self) -> &str;

    /// Runs a command without inspecting its output. Failures, including a
    /// non-zero exit status, are logged and otherwise ignored.
    async fn execute(&self, command: &str);

    /// Runs a command and returns its combined stdout and stderr regardless of
    /// the exit status.
    async fn execute_for_result(&self, command: &str) -> Result<String, DeployError>;

    /// Releases the underlying channel. Safe to call more than once.
    async fn close(&self);
}

/// Copies local files to one host.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copies `local` into `remote_dir`, keeping its file name.
    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<(), DeployError>;
}

/// A scoped session able to run commands and receive files.
pub trait RemoteSession: RemoteShell + FileTransfer {
    fn shell(&self) -> &dyn RemoteShell;
}

impl<T: RemoteShell + FileTransfer> RemoteSession for T {
    fn shell(&self) -> &dyn RemoteShell {
        self
    }
}

/// Opens sessions from connection profiles.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, server: &TargetServer) -> Result<Box<dyn RemoteSession>, DeployError>;
}

/// Bounded retry for opening sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay_before(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Opens a session, retrying connection failures with linear backoff.
///
/// Only `DeployError::Connection` is retried; anything else is returned as is.
#[tracing::instrument(name = "Open remote session", skip(connector, server, policy), fields(host = %server.ip))]
pub async fn connect_with_retry(
    connector: &dyn SessionConnector,
    server: &TargetServer,
    policy: RetryPolicy,
) -> Result<Box<dyn RemoteSession>, DeployError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match connector.connect(server).await {
            Ok(session) => return Ok(session),
            Err(err @ DeployError::Connection { .. }) if attempt < attempts => {
                let delay = policy.delay_before(attempt);
                tracing::warn!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Connection failed: {}, retrying",
                    err
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
