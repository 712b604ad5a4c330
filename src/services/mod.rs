pub mod backup;
pub mod locks;
pub mod notifier;
pub mod orchestrator;
pub mod prober;
pub mod remote;

pub use backup::{BackupManager, BackupRequest};
pub use locks::DeploymentLocks;
pub use notifier::{
    BroadcastHub, Notification, NotificationPublisher, Severity, DEPLOY_CHANNEL, LINE_BREAK,
};
pub use orchestrator::{DeploymentOrchestrator, OrchestratorConfig};
pub use prober::{Liveness, LivenessPolicy, ProcessStatusProber};
pub use remote::{
    connect_with_retry, FileTransfer, RemoteSession, RemoteShell, RetryPolicy, SessionConnector,
};
