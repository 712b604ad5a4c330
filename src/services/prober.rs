//! Process liveness checks on remote hosts.

use std::time::Duration;

use super::backup::with_trailing_separator;
use super::remote::RemoteShell;

/// Substring `fuser -n tcp <port>` prints when something holds the port.
pub const LISTENING_MARKER: &str = "/tcp:";

/// Bounded wait-with-retry used after starting an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Pause before the first probe.
    pub settle: Duration,
    /// Pause between two probes.
    pub interval: Duration,
    pub max_attempts: u32,
    /// Upper bound for a single probe, added on top of the nominal budget.
    pub probe_timeout: Duration,
}

impl LivenessPolicy {
    /// `settle + max_attempts × interval`, plus room for one slow probe.
    pub fn deadline(&self) -> Duration {
        self.settle + self.interval * self.max_attempts + self.probe_timeout
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            interval: Duration::from_secs(6),
            max_attempts: 30,
            probe_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of a liveness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Listening, detected on the given attempt.
    Up { attempts: u32 },
    /// Never detected within the budget.
    Down { attempts: u32 },
}

impl Liveness {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Up { attempts } | Self::Down { attempts } => *attempts,
        }
    }
}

/// True iff the probe output reports a socket bound to the port.
pub fn is_listening(probe_output: &str) -> bool {
    probe_output.contains(LISTENING_MARKER)
}

/// True iff a `find` listing contains `<deploy_path>/<app_name>` itself.
/// Nested entries with the same name do not count.
pub fn lists_artifact(find_output: &str, deploy_path: &str, app_name: &str) -> bool {
    if app_name.is_empty() {
        return false;
    }
    let expected = format!("{}{}", with_trailing_separator(deploy_path), app_name);
    find_output
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("find:"))
        .any(|line| line.trim_end_matches('/') == expected)
}

pub fn probe_command(port: u16) -> String {
    format!("fuser -n tcp {}", port)
}

pub fn stop_command(port: u16) -> String {
    format!(
        "lsof -i :{}|grep -v \"PID\"|awk '{{print \"kill -9\",$2}}'|sh",
        port
    )
}

pub fn find_artifact_command(deploy_path: &str, app_name: &str) -> String {
    format!("find {} -name {}", deploy_path, app_name)
}

/// Stateless liveness checks built on a remote shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStatusProber;

impl ProcessStatusProber {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: an unreadable probe counts as "not running".
    pub async fn is_running(&self, port: u16, shell: &dyn RemoteShell) -> bool {
        match shell.execute_for_result(&probe_command(port)).await {
            Ok(output) => is_listening(&output),
            Err(err) => {
                tracing::warn!(host = shell.host(), port, "Liveness probe failed: {}", err);
                false
            }
        }
    }

    /// Kills whatever holds the port; a no-op when nothing does.
    pub async fn stop_process(&self, port: u16, shell: &dyn RemoteShell) {
        shell.execute(&stop_command(port)).await;
    }

    /// Whether `deploy_path` already holds an artifact named `app_name`.
    pub async fn artifact_exists(
        &self,
        shell: &dyn RemoteShell,
        deploy_path: &str,
        app_name: &str,
    ) -> bool {
        match shell
            .execute_for_result(&find_artifact_command(deploy_path, app_name))
            .await
        {
            Ok(output) => lists_artifact(&output, deploy_path, app_name),
            Err(err) => {
                tracing::warn!(host = shell.host(), "Artifact lookup failed: {}", err);
                false
            }
        }
    }

    /// Settles once, then probes up to `max_attempts` times, stopping at the
    /// first success. The whole wait is cut off at `policy.deadline()`.
    pub async fn wait_until_running(
        &self,
        port: u16,
        shell: &dyn RemoteShell,
        policy: &LivenessPolicy,
    ) -> Liveness {
        let mut attempts = 0;
        let polling = async {
            pause(policy.settle).await;
            while attempts < policy.max_attempts {
                attempts += 1;
                if self.is_running(port, shell).await {
                    return true;
                }
                if attempts < policy.max_attempts {
                    pause(policy.interval).await;
                }
            }
            false
        };

        let up = match tokio::time::timeout(policy.deadline(), polling).await {
            Ok(up) => up,
            Err(_) => {
                tracing::warn!(host = shell.host(), port, "Liveness wait hit its deadline");
                false
            }
        };

        if up {
            Liveness::Up { attempts }
        } else {
            Liveness::Down { attempts }
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
