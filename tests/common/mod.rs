//! Scripted fleet shared by the orchestrator integration tests.
//!
//! Every fake host keeps a tiny model of the remote machine (is the app
//! listening, is an artifact deployed) and answers the orchestrator's shell
//! commands from it. All commands, uploads, connects and closes are recorded.
#![allow(dead_code)]

use async_trait::async_trait;
use rollout::db::{HistoryStore, MemoryStore};
use rollout::errors::DeployError;
use rollout::models::{Application, DeploymentHistory, TargetServer};
use rollout::services::{
    DeploymentOrchestrator, FileTransfer, LivenessPolicy, Notification, NotificationPublisher,
    OrchestratorConfig, RemoteSession, RemoteShell, RetryPolicy, SessionConnector, Severity,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEPLOYMENT_ID: i64 = 7;
pub const APP_NAME: &str = "billing";
pub const APP_PORT: u16 = 8080;
pub const WEB_1: &str = "10.0.0.5";
pub const WEB_2: &str = "10.0.0.6";
pub const DEPLOY_SCRIPT: &str = "sh /opt/scripts/deploy.sh";
pub const START_SCRIPT: &str = "sh /opt/scripts/start.sh";

/// What a fake host looks like from the outside.
#[derive(Debug, Clone)]
pub struct HostState {
    pub running: bool,
    pub artifact_present: bool,
    /// The deploy/start scripts bring the app up.
    pub launch_starts_app: bool,
    /// The kill pipeline brings the app down.
    pub stop_kills_app: bool,
    /// Probes answered "down" after a launch before the app shows up.
    pub probes_before_up: u32,
    /// Connect attempts refused before one succeeds.
    pub connect_failures: u32,
    pub fail_upload: bool,
    booting: Option<u32>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            running: false,
            artifact_present: false,
            launch_starts_app: true,
            stop_kills_app: true,
            probes_before_up: 0,
            connect_failures: 0,
            fail_upload: false,
            booting: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeHost {
    pub ip: String,
    state: Mutex<HostState>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
    snapshots: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeHost {
    fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    pub fn configure(&self, change: impl FnOnce(&mut HostState)) {
        change(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> HostState {
        self.state.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    /// `(file name, remote directory)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    /// Destination directories of every backup move.
    pub fn snapshots(&self) -> Vec<String> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn answer(&self, command: &str) -> String {
        self.commands.lock().unwrap().push(command.to_string());
        let mut state = self.state.lock().unwrap();

        if let Some(port) = command.strip_prefix("fuser -n tcp ") {
            if let Some(remaining) = state.booting {
                if remaining == 0 {
                    state.running = true;
                    state.booting = None;
                } else {
                    state.booting = Some(remaining - 1);
                }
            }
            return if state.running {
                format!("{}/tcp:              4242\n", port.trim())
            } else {
                String::new()
            };
        }
        if command.starts_with("lsof -i :") {
            if state.stop_kills_app {
                state.running = false;
                state.booting = None;
            }
            return String::new();
        }
        if command.starts_with("find ") {
            let parts: Vec<&str> = command.split_whitespace().collect();
            return if state.artifact_present {
                format!("{}/{}\n", parts[1].trim_end_matches('/'), parts[3])
            } else {
                String::new()
            };
        }
        if command.starts_with("mkdir -p ") && command.contains("&& mv -f") {
            let destination = command
                .trim_start_matches("mkdir -p ")
                .split(" && ")
                .next()
                .unwrap_or_default()
                .to_string();
            self.snapshots.lock().unwrap().push(destination);
            state.artifact_present = false;
            return String::new();
        }
        if command.starts_with("rm -rf ") {
            state.artifact_present = false;
            return String::new();
        }
        if command.starts_with("cp -r ") {
            state.artifact_present = true;
            return String::new();
        }
        if command == DEPLOY_SCRIPT || command == START_SCRIPT {
            if command == DEPLOY_SCRIPT {
                state.artifact_present = true;
            }
            if state.launch_starts_app && !state.running {
                state.booting = Some(state.probes_before_up);
            }
        }
        String::new()
    }
}

/// Connector over a set of fake hosts. Unknown ips get a fresh default host.
#[derive(Debug, Default)]
pub struct FakeFleet {
    hosts: Mutex<HashMap<String, Arc<FakeHost>>>,
    /// Delay added to every remote command.
    pub latency: Mutex<Duration>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeFleet {
    pub fn host(&self, ip: &str) -> Arc<FakeHost> {
        self.hosts
            .lock()
            .unwrap()
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(FakeHost::new(ip)))
            .clone()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Most sessions that were open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_commands(&self) -> usize {
        self.hosts
            .lock()
            .unwrap()
            .values()
            .map(|host| host.commands().len())
            .sum()
    }

    pub fn total_connects(&self) -> usize {
        self.hosts
            .lock()
            .unwrap()
            .values()
            .map(|host| host.connects())
            .sum()
    }
}

#[async_trait]
impl SessionConnector for FakeFleet {
    async fn connect(&self, server: &TargetServer) -> Result<Box<dyn RemoteSession>, DeployError> {
        let host = self.host(&server.ip);
        let attempt = host.connects.fetch_add(1, Ordering::SeqCst) as u32;
        if attempt < host.state().connect_failures {
            return Err(DeployError::connection(&server.ip, "connection refused"));
        }

        let open = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            host,
            latency: *self.latency.lock().unwrap(),
            active: self.active.clone(),
            closed: Mutex::new(false),
        }))
    }
}

struct FakeSession {
    host: Arc<FakeHost>,
    latency: Duration,
    active: Arc<AtomicUsize>,
    closed: Mutex<bool>,
}

impl FakeSession {
    async fn lag(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RemoteShell for FakeSession {
    fn host(&self) -> &str {
        &self.host.ip
    }

    async fn execute(&self, command: &str) {
        self.lag().await;
        self.host.answer(command);
    }

    async fn execute_for_result(&self, command: &str) -> Result<String, DeployError> {
        self.lag().await;
        Ok(self.host.answer(command))
    }

    async fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.host.closes.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FileTransfer for FakeSession {
    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<(), DeployError> {
        self.lag().await;
        if self.host.state().fail_upload {
            return Err(DeployError::transfer(&self.host.ip, "disk full"));
        }
        let file_name = local
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.host
            .uploads
            .lock()
            .unwrap()
            .push((file_name, remote_dir.to_string()));
        Ok(())
    }
}

/// Keeps every published notification.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: Mutex<Vec<(String, Notification)>>,
}

impl NotificationLog {
    pub fn all(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    pub fn channels(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn containing(&self, needle: &str) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|notification| notification.text.contains(needle))
            .collect()
    }

    pub fn errors(&self) -> Vec<Notification> {
        self.all()
            .into_iter()
            .filter(|notification| notification.severity == Severity::Error)
            .collect()
    }
}

impl NotificationPublisher for NotificationLog {
    fn publish(&self, channel: &str, notification: Notification) {
        self.entries
            .lock()
            .unwrap()
            .push((channel.to_string(), notification));
    }
}

/// History store whose writes always fail.
pub struct BrokenHistory;

#[async_trait]
impl HistoryStore for BrokenHistory {
    async fn create(&self, _record: DeploymentHistory) -> Result<DeploymentHistory, DeployError> {
        Err(DeployError::Store("connection reset".to_string()))
    }

    async fn find_by_id(&self, _id: i64) -> Result<Option<DeploymentHistory>, DeployError> {
        Ok(None)
    }
}

pub fn billing() -> Application {
    Application {
        id: 1,
        name: APP_NAME.to_string(),
        port: APP_PORT,
        upload_path: "/opt/upload".to_string(),
        deploy_path: "/opt/app".to_string(),
        backup_path: "/opt/backup".to_string(),
        deploy_script: DEPLOY_SCRIPT.to_string(),
        start_script: START_SCRIPT.to_string(),
    }
}

pub fn server(ip: &str, name: &str) -> TargetServer {
    TargetServer {
        ip: ip.to_string(),
        name: name.to_string(),
        account: "deploy".to_string(),
        password: "secret".to_string(),
        port: 22,
    }
}

/// No waiting anywhere; three probes per liveness wait.
pub fn quick_config() -> OrchestratorConfig {
    OrchestratorConfig {
        liveness: LivenessPolicy {
            settle: Duration::ZERO,
            interval: Duration::ZERO,
            max_attempts: 3,
            probe_timeout: Duration::from_secs(5),
        },
        stop_settle: Duration::ZERO,
        connect_retry: RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        },
        max_parallel_servers: 1,
    }
}

pub struct TestFleet {
    pub store: Arc<MemoryStore>,
    pub fleet: Arc<FakeFleet>,
    pub notifications: Arc<NotificationLog>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
}

impl TestFleet {
    /// Deployment 7 ships `billing` to web-1 (10.0.0.5) and web-2 (10.0.0.6).
    pub fn new() -> Self {
        Self::with_config(quick_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(seeded_store());
        Self::assemble(store.clone(), store, config)
    }

    pub fn with_history(history: Arc<dyn HistoryStore>) -> Self {
        Self::assemble(Arc::new(seeded_store()), history, quick_config())
    }

    fn assemble(
        store: Arc<MemoryStore>,
        history: Arc<dyn HistoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let fleet = Arc::new(FakeFleet::default());
        let notifications = Arc::new(NotificationLog::default());
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            store.clone(),
            history,
            fleet.clone(),
            notifications.clone(),
            config,
        ));
        Self {
            store,
            fleet,
            notifications,
            orchestrator,
        }
    }

    pub fn web_1(&self) -> Arc<FakeHost> {
        self.fleet.host(WEB_1)
    }

    pub fn web_2(&self) -> Arc<FakeHost> {
        self.fleet.host(WEB_2)
    }
}

pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.put_application(billing());
    store.put_server(server(WEB_1, "web-1"));
    store.put_server(server(WEB_2, "web-2"));
    store.put_deployment(
        DEPLOYMENT_ID,
        1,
        vec![WEB_1.to_string(), WEB_2.to_string()],
    );
    store
}

/// A local artifact named like the application.
pub fn artifact() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(APP_NAME);
    std::fs::write(&path, b"artifact bytes").unwrap();
    (dir, path)
}
