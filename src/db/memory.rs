use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use super::{DeploymentRepository, HistoryStore};
use crate::errors::DeployError;
use crate::models::{Application, DeployTarget, Deployment, DeploymentHistory, TargetServer};

/// Deployment as written in an inventory file: servers are referenced by ip.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryDeployment {
    pub id: i64,
    pub app_id: i64,
    #[serde(default)]
    pub servers: Vec<String>,
}

/// Static description of applications, servers and deployments.
///
/// ```yaml
/// applications:
///   - { id: 1, name: billing, port: 8080, upload_path: /opt/upload, ... }
/// servers:
///   - { ip: 10.0.0.5, name: web-1, account: deploy, password: secret }
/// deployments:
///   - { id: 1, app_id: 1, servers: [10.0.0.5] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub applications: Vec<Application>,
    #[serde(default)]
    pub servers: Vec<TargetServer>,
    #[serde(default)]
    pub deployments: Vec<InventoryDeployment>,
}

impl Inventory {
    pub fn from_yaml(source: &str) -> Result<Self, DeployError> {
        serde_yaml::from_str(source)
            .map_err(|err| DeployError::configuration(format!("invalid inventory: {}", err)))
    }

    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let source = std::fs::read_to_string(path).map_err(|err| {
            DeployError::configuration(format!("cannot read inventory {}: {}", path.display(), err))
        })?;
        Self::from_yaml(&source)
    }
}

#[derive(Debug, Default)]
struct Tables {
    applications: HashMap<i64, Application>,
    servers: HashMap<String, TargetServer>,
    deployments: HashMap<i64, InventoryDeployment>,
    history: Vec<DeploymentHistory>,
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let store = Self::new();
        for application in inventory.applications {
            store.put_application(application);
        }
        for server in inventory.servers {
            store.put_server(server);
        }
        for deployment in inventory.deployments {
            store.put_deployment(deployment.id, deployment.app_id, deployment.servers);
        }
        store
    }

    pub fn put_application(&self, application: Application) {
        self.write().applications.insert(application.id, application);
    }

    pub fn remove_application(&self, id: i64) -> Option<Application> {
        self.write().applications.remove(&id)
    }

    pub fn put_server(&self, server: TargetServer) {
        self.write().servers.insert(server.ip.clone(), server);
    }

    pub fn remove_server(&self, ip: &str) -> Option<TargetServer> {
        self.write().servers.remove(ip)
    }

    pub fn put_deployment(&self, id: i64, app_id: i64, server_ips: Vec<String>) {
        self.write().deployments.insert(
            id,
            InventoryDeployment {
                id,
                app_id,
                servers: server_ips,
            },
        );
    }

    /// Every history row, oldest first.
    pub fn history(&self) -> Vec<DeploymentHistory> {
        self.read().history.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DeploymentRepository for MemoryStore {
    async fn find_deployment(&self, id: i64) -> Result<Option<Deployment>, DeployError> {
        let tables = self.read();
        let Some(record) = tables.deployments.get(&id) else {
            return Ok(None);
        };

        // A target whose server row is gone keeps its ip so the profile lookup
        // can report it.
        let targets = record
            .servers
            .iter()
            .map(|ip| DeployTarget {
                ip: ip.clone(),
                name: tables
                    .servers
                    .get(ip)
                    .map(|server| server.name.clone())
                    .unwrap_or_else(|| ip.clone()),
            })
            .collect();

        Ok(Some(Deployment::new(
            id,
            tables.applications.get(&record.app_id).cloned(),
            targets,
        )))
    }

    async fn find_server_by_ip(&self, ip: &str) -> Result<Option<TargetServer>, DeployError> {
        Ok(self.read().servers.get(ip).cloned())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn create(&self, mut record: DeploymentHistory) -> Result<DeploymentHistory, DeployError> {
        let mut tables = self.write();
        record.id = tables.history.len() as i64 + 1;
        tables.history.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<DeploymentHistory>, DeployError> {
        Ok(self
            .read()
            .history
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }
}
